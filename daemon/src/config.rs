//! Configuration loading and management
//!
//! Defaults, then `$HOME/.config/keyhook/config.json` when present, then
//! `KEYHOOK_*` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

const POLL_INTERVAL_VAR: &str = "KEYHOOK_POLL_INTERVAL_MS";
const CHANNEL_CAPACITY_VAR: &str = "KEYHOOK_CHANNEL_CAPACITY";

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Longest idle wait of the dispatcher before it re-checks the buffer
    pub poll_interval_ms: u64,

    /// Capacity of the channel bridging dispatched keys into the runtime
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            channel_capacity: 256,
        }
    }
}

impl Config {
    /// Load configuration from file, environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        let path = Self::default_path(Path::new(&home));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Location of the optional config file under `home`
    pub fn default_path(home: &Path) -> PathBuf {
        home.join(".config").join("keyhook").join("config.json")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Override fields from `KEYHOOK_*` variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(POLL_INTERVAL_VAR) {
            self.poll_interval_ms = value
                .trim()
                .parse::<u64>()
                .with_context(|| {
                    format!("{} must be an integer, got {:?}", POLL_INTERVAL_VAR, value)
                })?;
        }
        if let Some(value) = lookup(CHANNEL_CAPACITY_VAR) {
            self.channel_capacity = value
                .trim()
                .parse::<usize>()
                .with_context(|| {
                    format!("{} must be an integer, got {:?}", CHANNEL_CAPACITY_VAR, value)
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be greater than zero");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.channel_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = Config::from_json(r#"{ "poll_interval_ms": 25 }"#).unwrap();
        assert_eq!(config.poll_interval_ms, 25);
        assert_eq!(config.channel_capacity, 256);
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(Config::from_json(r#"{ "poll_interval_ms": "fast" }"#).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(|key| match key {
                POLL_INTERVAL_VAR => Some(" 5 ".to_string()),
                CHANNEL_CAPACITY_VAR => Some("64".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.poll_interval_ms, 5);
        assert_eq!(config.channel_capacity, 64);
    }

    #[test]
    fn test_env_override_must_be_numeric() {
        let mut config = Config::default();
        let result =
            config.apply_env(|key| (key == POLL_INTERVAL_VAR).then(|| "soon".to_string()));
        assert!(result.is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = Config {
            poll_interval_ms: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            channel_capacity: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_path() {
        let path = Config::default_path(Path::new("/home/alice"));
        assert_eq!(path, PathBuf::from("/home/alice/.config/keyhook/config.json"));
    }
}
