use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_NAME: &str = "quire.config.json";

/// Session configuration file format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Operations that may wait for the session before submitters block
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,

    /// Events buffered per subscriber before it starts lagging
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// JSON-lines file every accepted operation is appended to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_log: Option<PathBuf>,
}

fn default_command_capacity() -> usize {
    64
}

fn default_event_capacity() -> usize {
    1024
}

impl SessionConfig {
    /// Load config from a directory, falling back to defaults when there is
    /// no config file. A relative `operationLog` resolves against `dir`.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let config_path = dir.join(DEFAULT_CONFIG_NAME);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)?;
        let mut config: SessionConfig = serde_json::from_str(&content)?;
        if config.command_capacity == 0 || config.event_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        config.operation_log = config.operation_log.map(|log| dir.join(log));
        Ok(config)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_capacity: default_command_capacity(),
            event_capacity: default_event_capacity(),
            operation_log: None,
        }
    }
}
