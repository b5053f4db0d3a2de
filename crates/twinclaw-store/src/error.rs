use thiserror::Error;
use twinclaw_common::{ErrorKind, Kind};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to connect to store: {0}")]
    Connect(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

impl ErrorKind for StoreError {
    fn kind(&self) -> Kind {
        match self {
            StoreError::NotFound(_) => Kind::NotFound,
            StoreError::Conflict(_) => Kind::Conflict,
            StoreError::Connect(_) | StoreError::Io(_) => Kind::Fatal,
            StoreError::Database(_) | StoreError::Serialization(_) => Kind::Transient,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
