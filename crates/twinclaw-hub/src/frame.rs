//! Wire frames exchanged over `/ws` (C11, spec §6).

use serde::{Deserialize, Serialize};
use twinclaw_common::{EventEnvelope, Topic};

/// Sent by the client. Auth must be the first frame; everything else is
/// only honored once the session is authenticated.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth { token: String },
    Subscribe { topics: Vec<String> },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame<'a> {
    Subscribed { topics: Vec<Topic> },
    Snapshot { topic: Topic, payload: serde_json::Value },
    Event {
        #[serde(flatten)]
        envelope: &'a EventEnvelope,
    },
    Pong,
    Error { code: &'a str, message: String },
}

/// Close codes used on `/ws`, in the private-use range reserved by RFC
/// 6455 (4000-4999) so they never collide with a standard code.
pub mod close_code {
    /// Malformed frame or a frame sent before authentication completed.
    pub const PROTOCOL_ERROR: u16 = 4001;
    /// Auth frame missing, invalid, or not sent within `authTimeoutMs`.
    pub const AUTH_FAILED: u16 = 4002;
    /// Subscribe request named a topic the hub doesn't recognize.
    pub const UNKNOWN_TOPIC: u16 = 4003;
    /// No pong received within the heartbeat staleness window.
    pub const HEARTBEAT_STALE: u16 = 4004;
    /// Server is shutting down or was halted via the control plane.
    pub const SERVER_SHUTDOWN: u16 = 4005;
}
