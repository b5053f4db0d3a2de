//! Shared types, error taxonomy, redaction, and logging for the TwinClaw
//! runtime core.

pub mod error;
pub mod logging;
pub mod redact;
pub mod types;

pub use error::{CommonError, ErrorKind, Kind};
pub use types::{ApiEnvelope, ApiError, EventEnvelope, InboundMessage, Platform, Topic};
