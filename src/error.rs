use std::{path::PathBuf, time::Duration};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    /// Existence check, creation or reopen of an index failed.
    #[error("index '{index}' unavailable: {source}")]
    Index {
        index: String,
        #[source]
        source: EngineError,
    },

    /// Serialization or remote rejection while writing a document.
    #[error("write of '{id}' to index '{index}' failed: {reason}")]
    Write {
        index: String,
        id: String,
        reason: String,
        #[source]
        source: Option<EngineError>,
    },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Query execution or top-level response decoding failed.
    #[error("search on index '{index}' failed: {source}")]
    Search {
        index: String,
        #[source]
        source: EngineError,
    },
}

impl Error {
    pub(crate) fn document_not_found(index: &str, id: &str) -> Self {
        Error::NotFound {
            kind: "document",
            name: format!("{index}/{id}"),
        }
    }

    pub(crate) fn write(index: &str, id: &str, source: EngineError) -> Self {
        Error::Write {
            index: index.to_string(),
            id: id.to_string(),
            reason: source.to_string(),
            source: Some(source),
        }
    }
}

/// Failures reported by a search engine backend.
///
/// The services in this crate wrap these into the categorized [`Error`]
/// variants depending on which operation was running.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("engine returned {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("no such index: {0}")]
    IndexMissing(String),

    #[error("index is closed: {0}")]
    IndexClosed(String),

    #[error("index already exists: {0}")]
    IndexAlreadyExists(String),

    #[error("invalid index name '{name}': {reason}")]
    InvalidIndexName { name: String, reason: &'static str },

    #[error("could not decode engine response: {0}")]
    Decode(String),

    #[error("tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),

    #[error("background task failed: {0}")]
    TaskJoin(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EngineError::Transport(format!("request timed out: {e}"))
        } else if e.is_connect() {
            EngineError::Transport(format!("failed to connect: {e}"))
        } else if e.is_decode() {
            EngineError::Decode(e.to_string())
        } else {
            EngineError::Transport(e.to_string())
        }
    }
}

impl From<tantivy::directory::error::OpenDirectoryError> for EngineError {
    fn from(e: tantivy::directory::error::OpenDirectoryError) -> Self {
        EngineError::Tantivy(tantivy::TantivyError::SystemError(e.to_string()))
    }
}
