use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

use crate::mail::MailError;
use crate::storage::StorageError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure kinds surfaced by the core to its callers.
///
/// The HTTP layer maps these to status codes via [`Error::status`]; the core itself
/// never deals in status codes.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("token expired")]
    Expired,

    #[error("token already used")]
    AlreadyUsed,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::ValidationFailed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Stable machine-readable code, suitable for an error body.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Expired => "expired",
            Error::AlreadyUsed => "already_used",
            Error::Conflict(_) => "conflict",
            Error::ValidationFailed(_) => "validation_failed",
            Error::UpstreamUnavailable(_) => "upstream_unavailable",
            Error::Internal(_) => "internal_error",
        }
    }

    /// HTTP status hint for the caller-side collaborator.
    pub fn status(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::Expired | Error::AlreadyUsed | Error::ValidationFailed(_) => 400,
            Error::Conflict(_) => 409,
            Error::UpstreamUnavailable(_) => 502,
            Error::Internal(_) => 500,
        }
    }
}

impl From<DbErr> for Error {
    fn from(e: DbErr) -> Self {
        match e.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => return Error::Conflict(detail),
            Some(SqlErr::ForeignKeyConstraintViolation(detail)) => {
                return Error::NotFound(format!("referenced resource ({detail})"))
            }
            _ => {}
        }
        match e {
            DbErr::RecordNotFound(what) => Error::NotFound(what),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::UpstreamUnavailable(e.to_string())
    }
}

impl From<MailError> for Error {
    fn from(e: MailError) -> Self {
        Error::UpstreamUnavailable(e.to_string())
    }
}
