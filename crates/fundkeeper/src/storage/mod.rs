//! Object store collaborators.
//!
//! The store is the source of truth for whether a blob exists; it knows nothing
//! about which blobs are live. That is what the attachment tables are for.

mod drive;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use drive::DriveObjectStore;
pub use memory::{MemoryObject, MemoryObjectStore};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object store not configured: {0}")]
    NotConfigured(String),

    #[error("object store request failed: {0}")]
    Transport(String),

    #[error("object store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("object store timed out")]
    Timeout,

    #[error("unexpected object store response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StorageError::Timeout
        } else {
            StorageError::Transport(e.to_string())
        }
    }
}

/// Logical folder an object is filed under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Folder {
    Contributions,
    Causes,
}

impl Folder {
    pub fn name(&self) -> &'static str {
        match self {
            Folder::Contributions => "contributions",
            Folder::Causes => "causes",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub id: String,
    pub public_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedObject {
    pub id: String,
    pub name: String,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        folder: Folder,
        bytes: Vec<u8>,
        mime_type: &str,
        name: &str,
    ) -> Result<StoredObject, StorageError>;

    /// Deleting an id that no longer exists succeeds.
    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    async fn list(&self, folder: Folder) -> Result<Vec<ListedObject>, StorageError>;

    /// Recover the object id from a URL previously returned by [`ObjectStore::upload`].
    fn id_from_url(&self, url: &str) -> Option<String>;
}
