use thiserror::Error;
use twinclaw_common::{ErrorKind, Kind};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("unknown platform/sender pair has no open buffer")]
    NoBuffer,

    #[error(transparent)]
    Pairing(#[from] twinclaw_pairing::PairingError),

    #[error(transparent)]
    Delivery(#[from] twinclaw_delivery::DeliveryError),
}

impl ErrorKind for DispatchError {
    fn kind(&self) -> Kind {
        match self {
            DispatchError::NoBuffer => Kind::NotFound,
            DispatchError::Pairing(e) => e.kind(),
            DispatchError::Delivery(e) => e.kind(),
        }
    }
}

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
