//! Controller configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the capture/PiP controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// How long the error label stays up before reverting, in milliseconds
    #[serde(default = "default_error_revert_delay_ms")]
    pub error_revert_delay_ms: u64,
}

fn default_error_revert_delay_ms() -> u64 {
    2000
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            error_revert_delay_ms: default_error_revert_delay_ms(),
        }
    }
}

impl ControllerConfig {
    /// Get the error revert delay as a Duration
    #[must_use]
    pub fn error_revert_delay(&self) -> Duration {
        Duration::from_millis(self.error_revert_delay_ms)
    }

    /// Override the error revert delay
    #[must_use]
    pub fn with_error_revert_delay(mut self, delay: Duration) -> Self {
        self.error_revert_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delay() {
        let config = ControllerConfig::default();
        assert_eq!(config.error_revert_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_override_delay() {
        let config = ControllerConfig::default().with_error_revert_delay(Duration::from_millis(250));
        assert_eq!(config.error_revert_delay_ms, 250);
    }

    #[test]
    fn test_missing_field_uses_default() {
        let config: ControllerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ControllerConfig::default());
    }
}
