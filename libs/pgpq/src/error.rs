//! Error types for the queue

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Queue errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("namespace {0:?} contains non-ASCII characters")]
    InvalidNamespace(String),

    #[error("duplicate ID: {0}")]
    DuplicateId(Uuid),

    /// Lookup found nothing.
    #[error("no task")]
    NoTask,

    /// Acquire found no eligible, unlocked task.
    #[error("no task available")]
    NoTaskAvailable,

    #[error("transaction already closed")]
    ClaimClosed,

    #[error("claim on task {id} expired at {deadline}")]
    ClaimExpired { id: Uuid, deadline: DateTime<Utc> },

    #[error("postgres server version {version} does not meet requirement >= {required}")]
    UnsupportedServer { version: i32, required: i32 },

    #[error("schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i32, supported: i32 },

    #[error("invalid schema version marker: {0:?}")]
    InvalidSchemaVersion(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// True for the "nothing there" outcomes that are expected during normal
    /// operation (empty queue, lost race).
    pub fn is_empty(&self) -> bool {
        matches!(self, Error::NoTask | Error::NoTaskAvailable)
    }
}
