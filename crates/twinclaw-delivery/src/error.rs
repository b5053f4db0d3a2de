use thiserror::Error;
use twinclaw_common::{ErrorKind, Kind};

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("no delivery record with id {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] twinclaw_store::StoreError),
}

impl ErrorKind for DeliveryError {
    fn kind(&self) -> Kind {
        match self {
            DeliveryError::NotFound(_) => Kind::NotFound,
            DeliveryError::Store(e) => e.kind(),
        }
    }
}

pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;
