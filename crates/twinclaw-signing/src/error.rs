use thiserror::Error;
use twinclaw_common::{ErrorKind, Kind};

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("missing or malformed X-Signature header")]
    MissingHeader,

    #[error("signature does not match payload")]
    InvalidSignature,

    #[error("signing secret is not configured: {0}")]
    SecretUnavailable(String),
}

impl ErrorKind for SigningError {
    fn kind(&self) -> Kind {
        match self {
            SigningError::MissingHeader => Kind::AuthError,
            SigningError::InvalidSignature => Kind::Forbidden,
            SigningError::SecretUnavailable(_) => Kind::Unavailable,
        }
    }
}

pub type SigningResult<T> = std::result::Result<T, SigningError>;
