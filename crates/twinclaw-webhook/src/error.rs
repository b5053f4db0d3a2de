use thiserror::Error;
use twinclaw_common::{ErrorKind, Kind};

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error(transparent)]
    Store(#[from] twinclaw_store::StoreError),

    /// Processing failed after the receipt was already accepted; the
    /// receipt has been flipped to `outcome=rejected` and the caller
    /// still owes the sender a 500.
    #[error("webhook processing failed: {0}")]
    Processing(String),
}

impl ErrorKind for WebhookError {
    fn kind(&self) -> Kind {
        match self {
            WebhookError::Store(e) => e.kind(),
            WebhookError::Processing(_) => Kind::Fatal,
        }
    }
}

pub type WebhookResult<T> = std::result::Result<T, WebhookError>;
