//! Core value types shared across the runtime core.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A supported chat channel. Normalization rules for sender IDs differ per
/// platform (see `twinclaw-pairing`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    Whatsapp,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Telegram => write!(f, "telegram"),
            Platform::Whatsapp => write!(f, "whatsapp"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "telegram" => Ok(Platform::Telegram),
            "whatsapp" => Ok(Platform::Whatsapp),
            other => Err(format!("unsupported channel: {other}")),
        }
    }
}

/// An ephemeral, in-memory normalized inbound event from a channel adapter.
/// Never persisted directly; it is consumed by the dispatcher and discarded
/// once handed off to the delivery queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub platform: Platform,
    pub sender_id: String,
    pub chat_id: String,
    pub text: Option<String>,
    pub audio_path: Option<String>,
    pub raw_payload: serde_json::Value,
}

impl InboundMessage {
    pub fn is_voice(&self) -> bool {
        self.audio_path.is_some()
    }
}

/// The standard HTTP control-plane response envelope (§6).
#[derive(Debug, Serialize)]
pub struct ApiEnvelope<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub correlation_id: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub kind: String,
    pub message: String,
}

impl<T: Serialize> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn err(kind: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ApiError {
                kind: kind.to_string(),
                message: message.into(),
            }),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A topic an Event Hub client may subscribe to (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Health,
    Reliability,
    Incidents,
    Routing,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Topic::Health => "health",
            Topic::Reliability => "reliability",
            Topic::Incidents => "incidents",
            Topic::Routing => "routing",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Topic {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "health" => Ok(Topic::Health),
            "reliability" => Ok(Topic::Reliability),
            "incidents" => Ok(Topic::Incidents),
            "routing" => Ok(Topic::Routing),
            _ => Err(()),
        }
    }
}

/// The versioned envelope broadcast by the Event Hub (C11, §3).
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub v: u8,
    pub topic: Topic,
    pub seq: u64,
    pub ts: String,
    pub payload: serde_json::Value,
}

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
