//! Configuration for the tunnel provider layer
//!
//! TOML-based configuration covering the engine handoff parameters and the
//! host-quirk toggles. The packet engine owns its own configuration below
//! this layer; only what the provider needs to coordinate lives here.

use crate::error::{ProviderError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Directory the engine persists its state into
    pub config_dir: String,
    /// User agent reported by the engine on API calls
    pub user_agent: String,
    /// Block `start` until the connectivity state reads connected.
    ///
    /// Some host framework versions cancel tunnels that report "connecting"
    /// for too long; on those, returning early from `start` is the safer
    /// behavior and this should be off.
    #[serde(default = "default_true")]
    pub wait_for_connected_on_start: bool,
    /// Raise the host-visible reasserting flag while the tunnel is active
    /// but the engine reports connecting or disconnected.
    #[serde(default = "default_true")]
    pub reassert_while_connecting: bool,
    /// Fixed backoff between status poll retries after an engine error,
    /// in seconds
    #[serde(default = "default_status_retry")]
    pub status_retry_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_status_retry() -> u64 {
    1
}

impl ProviderConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or contains invalid TOML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ProviderError::Config(format!("Failed to read config file: {e}")))?;
        content.parse()
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns an error if any field fails validation
    pub fn validate(&self) -> Result<()> {
        if self.config_dir.is_empty() {
            return Err(ProviderError::Config(
                "config_dir cannot be empty".to_string(),
            ));
        }
        if self.user_agent.is_empty() {
            return Err(ProviderError::Config(
                "user_agent cannot be empty".to_string(),
            ));
        }
        if self.status_retry_secs == 0 {
            return Err(ProviderError::Config(
                "status_retry_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Backoff between status poll retries
    #[must_use]
    pub fn status_retry_interval(&self) -> Duration {
        Duration::from_secs(self.status_retry_secs)
    }

    /// Default configuration for tests
    #[cfg(test)]
    pub fn default_test() -> Self {
        Self {
            config_dir: "/tmp/tunprov-test".to_string(),
            user_agent: "tunprov/test".to_string(),
            wait_for_connected_on_start: false,
            reassert_while_connecting: true,
            status_retry_secs: 1,
        }
    }
}

impl FromStr for ProviderConfig {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        let config: ProviderConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID_CONFIG: &str = r#"
config_dir = "/var/lib/tunprov"
user_agent = "example.net/macos/1.2.3"
"#;

    #[test]
    fn test_parse_valid_config() {
        let config: ProviderConfig = VALID_CONFIG.parse().unwrap();
        assert_eq!(config.config_dir, "/var/lib/tunprov");
        assert_eq!(config.user_agent, "example.net/macos/1.2.3");
        assert!(config.wait_for_connected_on_start);
        assert!(config.reassert_while_connecting);
        assert_eq!(config.status_retry_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_overrides() {
        let toml = r#"
config_dir = "/var/lib/tunprov"
user_agent = "example.net/ios/1.2.3"
wait_for_connected_on_start = false
status_retry_secs = 5
"#;
        let config: ProviderConfig = toml.parse().unwrap();
        assert!(!config.wait_for_connected_on_start);
        assert_eq!(config.status_retry_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_reject_empty_user_agent() {
        let toml = r#"
config_dir = "/var/lib/tunprov"
user_agent = ""
"#;
        let result: Result<ProviderConfig> = toml.parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_reject_invalid_toml() {
        let result: Result<ProviderConfig> = "not valid toml [".parse();
        assert!(matches!(result, Err(ProviderError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID_CONFIG.as_bytes()).unwrap();
        let config = ProviderConfig::from_file(file.path()).unwrap();
        assert_eq!(config.config_dir, "/var/lib/tunprov");
    }

    #[test]
    fn test_from_missing_file() {
        let result = ProviderConfig::from_file("/nonexistent/tunprov.toml");
        assert!(matches!(result, Err(ProviderError::Config(_))));
    }
}
