//! Host configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for the host daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Address to bind the network listener to
    pub bind_address: String,

    /// Port for the localhost-only status endpoint
    pub status_port: u16,

    /// Path to the session worker binary
    pub worker_path: PathBuf,

    /// Path to the credential store file
    pub users_path: PathBuf,

    /// How long a connection may take to complete the handshake
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// How long a spawned worker may take to signal readiness
    #[serde(with = "duration_secs")]
    pub spawn_timeout: Duration,

    /// How long a worker gets to exit after a terminate request
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,

    /// How long a session stays resident after its last client detaches
    #[serde(with = "duration_secs")]
    pub drain_grace: Duration,

    /// Outbound channel frames buffered before sends suspend
    pub channel_high_water: usize,

    /// Failed handshake attempts allowed per connection
    pub max_auth_attempts: u32,

    /// Maximum number of concurrent sessions
    pub max_sessions: Option<u32>,
}

impl Default for HostConfig {
    fn default() -> Self {
        let config_dir = default_config_dir();

        Self {
            bind_address: "0.0.0.0:8940".to_string(),
            status_port: 8941,
            worker_path: PathBuf::from("sg-worker"),
            users_path: config_dir.join("users.toml"),
            handshake_timeout: Duration::from_secs(30),
            spawn_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(3),
            drain_grace: Duration::from_secs(30),
            channel_high_water: 64,
            max_auth_attempts: 3,
            max_sessions: None,
        }
    }
}

impl HostConfig {
    /// Get the status endpoint address (localhost only)
    pub fn status_address(&self) -> String {
        format!("127.0.0.1:{}", self.status_port)
    }
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spyglass")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("host.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

// Helper module for Duration serialization as whole seconds
mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = HostConfig::default();
        assert!(config.spawn_timeout < config.handshake_timeout);
        assert!(config.shutdown_timeout <= config.drain_grace);
        assert!(config.max_auth_attempts >= 1);
        assert!(config.channel_high_water >= 1);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");

        let mut config = HostConfig::default();
        config.bind_address = "127.0.0.1:9000".to_string();
        config.drain_grace = Duration::from_secs(45);

        save_config(&path, &config).unwrap();
        let loaded: HostConfig = load_config(&path).unwrap();

        assert_eq!(loaded.bind_address, "127.0.0.1:9000");
        assert_eq!(loaded.drain_grace, Duration::from_secs(45));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let result: Result<HostConfig, _> = load_config(Path::new("/nonexistent/host.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(&path, "bind_address = \"10.0.0.1:2000\"\n").unwrap();

        let loaded: HostConfig = load_config(&path).unwrap();
        assert_eq!(loaded.bind_address, "10.0.0.1:2000");
        assert_eq!(loaded.max_auth_attempts, HostConfig::default().max_auth_attempts);
    }
}
