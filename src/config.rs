//! Configuration management for Flowgate.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FlowgateError, Result};

/// Prefix for environment overrides, e.g. `FLOWGATE__LOGGING__LEVEL=debug`.
const ENV_PREFIX: &str = "FLOWGATE";

/// Main configuration for the Flowgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowgateConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Flow rule configuration
    #[serde(default)]
    pub rules: RulesConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Flow rule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Path to the flow rule file (YAML or JSON)
    pub path: Option<PathBuf>,

    /// How often the rule file is re-read, in seconds. Zero disables reloading.
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: None,
            reload_interval_secs: default_reload_interval(),
        }
    }
}

fn default_reload_interval() -> u64 {
    60
}

impl RulesConfig {
    /// The reload interval, or `None` when reloading is disabled.
    pub fn reload_interval(&self) -> Option<Duration> {
        (self.reload_interval_secs > 0).then(|| Duration::from_secs(self.reload_interval_secs))
    }
}

impl FlowgateConfig {
    /// Load configuration from an optional file layered with `FLOWGATE__*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| FlowgateError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlowgateConfig::default();
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(config.rules.path.is_none());
        assert_eq!(config.rules.reload_interval(), Some(Duration::from_secs(60)));
    }

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "flowgate-{}-{}.yaml",
            name,
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_file() {
        let path = write_config(
            "full",
            r#"
logging:
  json: true
rules:
  path: /etc/flowgate/rules.yaml
  reload_interval_secs: 0
"#,
        );

        let config = FlowgateConfig::load(Some(path.as_path()));
        std::fs::remove_file(&path).unwrap();
        let config = config.unwrap();

        assert!(config.logging.json);
        assert_eq!(
            config.rules.path.as_deref(),
            Some(Path::new("/etc/flowgate/rules.yaml"))
        );
        assert_eq!(config.rules.reload_interval(), None);
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let path = write_config("partial", "rules:\n  path: rules.json\n");

        let config = FlowgateConfig::load(Some(path.as_path()));
        std::fs::remove_file(&path).unwrap();
        let config = config.unwrap();

        assert!(!config.logging.json);
        assert_eq!(config.rules.path.as_deref(), Some(Path::new("rules.json")));
        assert_eq!(config.rules.reload_interval_secs, 60);
    }

    #[test]
    fn test_load_without_file() {
        let config = FlowgateConfig::load(None).unwrap();
        assert!(config.rules.path.is_none());
        assert_eq!(config.rules.reload_interval(), Some(Duration::from_secs(60)));
    }

    // The only test touching FLOWGATE__LOGGING__LEVEL, so parallel tests
    // never see the override.
    #[test]
    fn test_environment_overrides_file() {
        let path = write_config("env", "logging:\n  level: warn\n");

        std::env::set_var("FLOWGATE__LOGGING__LEVEL", "debug");
        let config = FlowgateConfig::load(Some(path.as_path()));
        std::env::remove_var("FLOWGATE__LOGGING__LEVEL");
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.unwrap().logging.level, "debug");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = FlowgateConfig::load(Some(Path::new("/nonexistent/flowgate.yaml")));
        assert!(matches!(result, Err(FlowgateError::Config(_))));
    }
}
