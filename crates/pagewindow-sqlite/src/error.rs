use std::path::PathBuf;

use pagewindow_core::SourceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaVersionMismatch { expected: i64, got: i64 },
    #[error("duplicate unique id: {0}")]
    DuplicateId(String),
}

impl From<StoreError> for SourceError {
    fn from(err: StoreError) -> Self {
        SourceError::database(err)
    }
}
