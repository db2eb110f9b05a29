//! Connect-time configuration.
//!
//! Mirrors what a caller can hand the client when connecting: the gateway
//! address, an optional log destination and severity, and the default
//! timeout for synchronous calls.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::logging::LogConfig;

pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:5570";

/// Default wait for a synchronous reply, in milliseconds.
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 3000;

/// Prefix of environment overrides, e.g. `VEX_SERVER_ADDRESS`.
pub const ENV_PREFIX: &str = "VEX";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port`, or a full endpoint with scheme.
    pub server_address: String,
    /// Private log sink for this client. `None` writes to the process logger.
    pub log: Option<LogConfig>,
    pub sync_timeout_ms: u64,
    /// Refuse every request but register/login until the gateway acknowledged a login.
    pub enforce_login: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            log: None,
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            enforce_login: true,
        }
    }
}

impl ClientConfig {
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            ..Default::default()
        }
    }

    /// Loads a config file (format picked from the extension), then applies
    /// `VEX_*` environment overrides (`VEX_LOG__LEVEL` for nested keys).
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}
