use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Data point ids the device uses for each attribute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataPoints {
    pub power: String,
    pub speed: String,
    pub direction: String,
    pub light: String,
}

impl Default for DataPoints {
    fn default() -> Self {
        Self {
            power: "1".to_string(),
            speed: "3".to_string(),
            direction: "4".to_string(),
            light: "9".to_string(),
        }
    }
}

/// Tunables for one managed fan. Fixed for the lifetime of the device session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FanConfig {
    pub name: String,
    pub has_light: bool,
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
    pub fast_retry_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub set_timeout_ms: u64,
    /// Consecutive failed polls before the transport object is rebuilt
    pub rebuild_threshold: u32,
    pub data_points: DataPoints,
}

impl Default for FanConfig {
    fn default() -> Self {
        Self {
            name: "Ceiling Fan".to_string(),
            has_light: true,
            debounce_ms: 500,
            poll_interval_ms: 10_000,
            fast_retry_interval_ms: 1_000,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 5_000,
            set_timeout_ms: 10_000,
            rebuild_threshold: 5,
            data_points: DataPoints::default(),
        }
    }
}

impl FanConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: FanConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading fan config from {}", path.display());
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("debounce_ms", self.debounce_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("fast_retry_interval_ms", self.fast_retry_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
            ("set_timeout_ms", self.set_timeout_ms),
        ];
        if let Some((field, _)) = periods.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be greater than zero", field)));
        }

        if self.fast_retry_interval_ms > self.poll_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "fast_retry_interval_ms ({}) must not exceed poll_interval_ms ({})",
                self.fast_retry_interval_ms, self.poll_interval_ms
            )));
        }

        if self.rebuild_threshold == 0 {
            return Err(ConfigError::Invalid("rebuild_threshold must be at least 1".to_string()));
        }

        let ids = [
            &self.data_points.power,
            &self.data_points.speed,
            &self.data_points.direction,
            &self.data_points.light,
        ];
        for (i, id) in ids.iter().enumerate() {
            if id.is_empty() {
                return Err(ConfigError::Invalid("data point ids must not be empty".to_string()));
            }
            if ids[..i].contains(id) {
                return Err(ConfigError::Invalid(format!("data point id {} is used twice", id)));
            }
        }

        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fast_retry_interval(&self) -> Duration {
        Duration::from_millis(self.fast_retry_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn set_timeout(&self) -> Duration {
        Duration::from_millis(self.set_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FanConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.fast_retry_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = FanConfig::from_json_str(
            r#"{ "name": "Bedroom", "has_light": false, "data_points": { "light": "15" } }"#,
        )
        .expect("config should parse");

        assert_eq!(config.name, "Bedroom");
        assert!(!config.has_light);
        assert_eq!(config.debounce_ms, 500);
        assert_eq!(config.data_points.power, "1");
        assert_eq!(config.data_points.light, "15");
    }

    #[test]
    fn test_rejects_zero_period() {
        let err = FanConfig::from_json_str(r#"{ "read_timeout_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("read_timeout_ms")));
    }

    #[test]
    fn test_rejects_fast_retry_slower_than_poll() {
        let config = FanConfig {
            poll_interval_ms: 1_000,
            fast_retry_interval_ms: 2_000,
            ..FanConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_data_points() {
        let mut config = FanConfig::default();
        config.data_points.light = config.data_points.power.clone();
        assert!(config.validate().is_err());

        config.data_points.light = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            FanConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
