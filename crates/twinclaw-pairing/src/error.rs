use thiserror::Error;
use twinclaw_common::{ErrorKind, Kind};

#[derive(Error, Debug)]
pub enum PairingError {
    #[error("exhausted pairing code generation attempts, code space likely saturated")]
    CodeSpaceExhausted,

    #[error("pairing code is unknown, already used, or expired")]
    InvalidCode,

    #[error(transparent)]
    Store(#[from] twinclaw_store::StoreError),
}

impl ErrorKind for PairingError {
    fn kind(&self) -> Kind {
        match self {
            PairingError::CodeSpaceExhausted => Kind::Unavailable,
            PairingError::InvalidCode => Kind::AuthError,
            PairingError::Store(e) => e.kind(),
        }
    }
}

pub type PairingResult<T> = std::result::Result<T, PairingError>;
