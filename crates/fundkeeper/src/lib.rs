//! Core of the fund tracker: secret tokens, the password-reset transaction,
//! image attachments kept consistent with an external object store, and
//! best-effort email notifications.

pub mod attachments;
pub mod clock;
pub mod config;
pub mod context;
pub mod credentials;
pub mod crypto;
pub mod db;
pub mod error;
pub mod funds;
pub mod mail;
pub mod members;
pub mod notify;
pub mod saga;
pub mod storage;
pub mod sweep;
pub mod tokens;
pub mod util;

pub use context::AppContext;
pub use error::{Error, Result};
