//! Configuration loader: file discovery plus environment overrides.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &[
    "twinclaw.toml",
    "config.toml",
    "./config/twinclaw.toml",
    "/etc/twinclaw/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("TWINCLAW_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("TWINCLAW_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("TWINCLAW_HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = env::var("TWINCLAW_STORE_PATH") {
            config.store.path = val;
        }
        if let Ok(val) = env::var("TWINCLAW_PAIRING_POLICY") {
            config.pairing.policy = val;
        }
        if let Ok(val) = env::var("TWINCLAW_DEBOUNCE_MS") {
            if let Ok(ms) = val.parse() {
                config.debounce.debounce_ms = ms;
            }
        }
        if let Ok(val) = env::var("TWINCLAW_DEBOUNCE_COALESCE_AUDIO") {
            config.debounce.coalesce_audio = val.parse().unwrap_or(false);
        }
        if let Ok(val) = env::var("TWINCLAW_DELIVERY_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                config.delivery.max_attempts = n;
            }
        }
        if let Ok(val) = env::var("TWINCLAW_DAG_MAX_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                config.dag.max_concurrency = n;
            }
        }
        if let Ok(val) = env::var("TWINCLAW_DAG_MAX_NODE_RETRIES") {
            if let Ok(n) = val.parse() {
                config.dag.max_node_retries = n;
            }
        }
        if let Ok(val) = env::var("TWINCLAW_SIGNING_SECRET_ENV_VAR") {
            config.signing.secret_env_var = val;
        }
        if let Ok(val) = env::var("TWINCLAW_DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
