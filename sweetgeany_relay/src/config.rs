// Relay configuration.
//
// The host owns the real configuration; the relay only needs a handful of
// values. `RelayConfig` deserializes from a JSON object where every key is
// optional, so a host can write just `{"port": 7000}`. Durations are stored as
// integer milliseconds/seconds to keep the file format obvious.
//
// Setting `reply_mode` to `null` turns reply correlation off entirely.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::outbound::MessageKind;

/// Settings for the command listener and reply correlation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// How often the accept loop checks for shutdown.
    pub poll_interval_ms: u64,
    /// Whole-connection deadline; a client that has not sent its complete
    /// line by then is dropped, however steadily it trickles bytes.
    pub read_timeout_ms: u64,
    pub backlog: u32,
    pub max_line_len: usize,
    pub reply_mode: Option<MessageKind>,
    pub correlation_ttl_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 6668,
            poll_interval_ms: 500,
            read_timeout_ms: 5000,
            backlog: 5,
            max_line_len: sweetgeany_protocol::MAX_LINE_LEN,
            reply_mode: Some(MessageKind::Notice),
            correlation_ttl_secs: 300,
        }
    }
}

impl RelayConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than 0".into(),
            ));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "read_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.backlog == 0 {
            return Err(ConfigError::Invalid("backlog must be greater than 0".into()));
        }
        if self.max_line_len == 0 {
            return Err(ConfigError::Invalid(
                "max_line_len must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// `host:port`, bracketing bare IPv6 hosts.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn correlation_ttl(&self) -> Duration {
        Duration::from_secs(self.correlation_ttl_secs)
    }
}
