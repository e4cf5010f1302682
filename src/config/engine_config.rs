use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::constants::{BROADCAST_CHANNEL_CAPACITY, DEFAULT_UNSUBSCRIBE_TIMEOUT_SECS};
use crate::config::errors::ConfigError;

fn default_event_capacity() -> usize {
    BROADCAST_CHANNEL_CAPACITY
}

fn default_unsubscribe_timeout() -> u64 {
    DEFAULT_UNSUBSCRIBE_TIMEOUT_SECS
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Capacity of the balance event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,

    /// Upper bound on how long a wire unsubscribe is awaited on detach
    #[serde(default = "default_unsubscribe_timeout")]
    pub unsubscribe_timeout_secs: u64,

    /// Capacity of the per-subscription batch outcome channel, `None` disables reporting
    #[serde(default)]
    pub outcome_channel_capacity: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_capacity(),
            unsubscribe_timeout_secs: default_unsubscribe_timeout(),
            outcome_channel_capacity: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(source: &str, content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(content)
            .map_err(|err| ConfigError::InvalidFormat(source.to_string(), err.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = path.display().to_string();

        let content = fs::read_to_string(path)
            .map_err(|err| ConfigError::UnableToRead(source.clone(), err.to_string()))?;

        let config = Self::from_json_str(&source, &content)?;

        tracing::info!(path = %source, ?config, "engine config loaded");

        Ok(config)
    }

    pub fn unsubscribe_timeout(&self) -> Duration {
        Duration::from_secs(self.unsubscribe_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "eventChannelCapacity",
                "should be greater than zero".to_string(),
            ));
        }

        if self.outcome_channel_capacity == Some(0) {
            return Err(ConfigError::InvalidValue(
                "outcomeChannelCapacity",
                "should be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
