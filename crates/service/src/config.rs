use std::path::Path;
use std::time::Duration;

use blockray_common::QueryLimits;
use blockray_index::IndexConfig;
use blockray_raycast::EngineConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub workers: usize,
    /// Queries that may wait for a worker before `submit` reports busy.
    pub queue_capacity: usize,
    /// How long shutdown waits for queued work to drain.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            shutdown_timeout_ms: 2000,
        }
    }
}

impl ServiceConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Everything the service reads at startup. Missing sections and fields
/// take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub index: IndexConfig,
    pub limits: QueryLimits,
    pub engine: EngineConfig,
    pub service: ServiceConfig,
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.index
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let limits = &self.limits;
        if !(limits.min_range.is_finite() && limits.min_range >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "limits.min_range must be finite and non-negative, got {}",
                limits.min_range
            )));
        }
        if limits.max_range.is_nan() || limits.min_range > limits.max_range {
            return Err(ConfigError::Invalid(format!(
                "limits.min_range {} exceeds limits.max_range {}",
                limits.min_range, limits.max_range
            )));
        }
        if self.engine.candidate_window == 0 {
            return Err(ConfigError::Invalid("engine.candidate_window must be positive".into()));
        }
        if self.service.workers == 0 {
            return Err(ConfigError::Invalid("service.workers must be positive".into()));
        }
        if self.service.queue_capacity == 0 {
            return Err(ConfigError::Invalid("service.queue_capacity must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.service.workers, 4);
        assert_eq!(config.limits.max_range, 2048.0);
        assert_eq!(config.engine.candidate_window, 16);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config = Config::from_yaml_str(
            "service:\n  workers: 2\nengine:\n  excluded_categories: [\"minecraft:item\"]\n",
        )
        .unwrap();
        assert_eq!(config.service.workers, 2);
        assert_eq!(config.service.queue_capacity, 256);
        assert_eq!(config.engine.excluded_categories, vec!["minecraft:item".to_string()]);
        assert_eq!(config.index, IndexConfig::default());
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(Config::from_yaml_str("{}").unwrap(), Config::default());
    }

    #[test]
    fn yaml_round_trip() {
        let mut config = Config::default();
        config.service.shutdown_timeout_ms = 50;
        config.index.depth = 12;
        config.index.min = [-2048, -2048, -2048];
        let text = config.to_yaml().unwrap();
        assert_eq!(Config::from_yaml_str(&text).unwrap(), config);
    }

    #[test]
    fn rejects_zero_workers() {
        let err = Config::from_yaml_str("service:\n  workers: 0\n").unwrap_err();
        assert!(err.to_string().contains("workers"), "{err}");
    }

    #[test]
    fn rejects_inverted_range() {
        let err = Config::from_yaml_str("limits:\n  min_range: 100.0\n  max_range: 10.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_depth() {
        let err = Config::from_yaml_str("index:\n  depth: 40\n").unwrap_err();
        assert!(err.to_string().contains("depth"), "{err}");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "service:\n  queue_capacity: 8\n  shutdown_timeout_ms: 100").unwrap();
        let config = Config::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.service.queue_capacity, 8);
        assert_eq!(config.service.shutdown_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_yaml_file(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
