//! TwinClaw configuration: TOML file with environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub store: StoreConfig,
    pub pairing: PairingConfig,
    pub debounce: DebounceConfig,
    pub chunker: ChunkerConfig,
    pub delivery: DeliveryConfig,
    pub dag: DagConfig,
    pub hub: HubConfig,
    pub scheduler: SchedulerConfig,
    pub signing: SigningConfig,
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            store: StoreConfig::default(),
            pairing: PairingConfig::default(),
            debounce: DebounceConfig::default(),
            chunker: ChunkerConfig::default(),
            delivery: DeliveryConfig::default(),
            dag: DagConfig::default(),
            hub: HubConfig::default(),
            scheduler: SchedulerConfig::default(),
            signing: SigningConfig::default(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the embedded SQLite database file.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "./data/twinclaw.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// `pairing` (challenge unknown senders) or `allowlist` (silently drop).
    pub policy: String,
    /// Max pending pairing requests per channel.
    pub max_pending_per_channel: usize,
    /// How often the expiry sweeper runs, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            policy: "pairing".to_string(),
            max_pending_per_channel: 100,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub debounce_ms: u64,
    /// If true, audio messages coalesce into the pending text buffer
    /// instead of flushing it immediately. Default false (flush-on-audio).
    pub coalesce_audio: bool,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1500,
            coalesce_audio: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    pub min_chars: usize,
    pub max_chars: usize,
    /// `paragraph` or `sentence`.
    pub boundary: String,
    pub human_delay_ms: u64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chars: 50,
            max_chars: 800,
            boundary: "paragraph".to_string(),
            human_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub tick_interval_ms: u64,
    pub min_send_interval_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 15_000,
            max_attempts: 3,
            tick_interval_ms: 500,
            min_send_interval_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DagConfig {
    pub max_nodes: usize,
    pub max_depth: usize,
    pub max_concurrency: usize,
    pub max_node_retries: u32,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self {
            max_nodes: 64,
            max_depth: 16,
            max_concurrency: 4,
            max_node_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub auth_timeout_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub max_client_queue_kb: u64,
    pub producer_tick_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            auth_timeout_ms: 5_000,
            heartbeat_interval_secs: 30,
            max_client_queue_kb: 200,
            producer_tick_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Name of the environment variable holding the HMAC signing secret.
    pub secret_env_var: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            secret_env_var: "TWINCLAW_SIGNING_SECRET".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the standard search paths, then apply
    /// environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = AppConfig::default();
        assert_eq!(config.http.port, 8787);
        assert_eq!(config.pairing.policy, "pairing");
        assert!(!config.debounce.coalesce_audio);
        assert_eq!(config.dag.max_node_retries, 1);
    }

    #[test]
    fn loads_from_toml_file_with_partial_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twinclaw.toml");
        std::fs::write(
            &path,
            r#"
            [http]
            port = 9090

            [pairing]
            policy = "allowlist"
            "#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.http.port, 9090);
        assert_eq!(config.pairing.policy, "allowlist");
        // untouched sections keep their defaults
        assert_eq!(config.delivery.max_attempts, 3);
    }
}
