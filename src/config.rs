//! Application configuration
//!
//! One YAML file with a section per component. Every field has a default so a
//! partial file (or none at all) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use action_flow::InterpreterTiming;
use anyhow::{Context, Result};
use extensions_bridge::BridgeConfig;
use serde::{Deserialize, Serialize};
use sheetpilot_scheduler::RunConfig;
use tokio::fs;
use tracing::{info, warn};
use variable_store::VariableLimits;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub run: RunConfig,
    pub interpreter: InterpreterConfig,
    pub variables: VariablesConfig,
    pub bridge: BridgeConfig,
    pub cache: CacheConfig,
    /// Where the durable store keeps its blobs
    pub storage_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub command_timeout_ms: u64,
    pub composite_timeout_secs: u64,
    pub retry_backoff_ms: u64,
    pub wait_for_timeout_secs: u64,
    pub wait_url_timeout_secs: u64,
    pub url_poll_interval_ms: u64,
    pub navigation_grace_ms: u64,
    pub click_settle_ms: u64,
    pub fill_settle_ms: u64,
    pub extract_timeout_ms: u64,
    pub max_nesting_depth: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 10_000,
            composite_timeout_secs: 300,
            retry_backoff_ms: 1_000,
            wait_for_timeout_secs: 10,
            wait_url_timeout_secs: 15,
            url_poll_interval_ms: 500,
            navigation_grace_ms: 5_000,
            click_settle_ms: 500,
            fill_settle_ms: 1_000,
            extract_timeout_ms: 3_000,
            max_nesting_depth: 8,
        }
    }
}

impl InterpreterConfig {
    pub fn timing(&self) -> InterpreterTiming {
        InterpreterTiming {
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            composite_timeout: Duration::from_secs(self.composite_timeout_secs),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            wait_for_timeout: Duration::from_secs(self.wait_for_timeout_secs),
            wait_url_timeout: Duration::from_secs(self.wait_url_timeout_secs),
            url_poll_interval: Duration::from_millis(self.url_poll_interval_ms),
            navigation_grace: Duration::from_millis(self.navigation_grace_ms),
            click_settle: Duration::from_millis(self.click_settle_ms),
            fill_settle: Duration::from_millis(self.fill_settle_ms),
            extract_timeout: Duration::from_millis(self.extract_timeout_ms),
            max_nesting_depth: self.max_nesting_depth,
            ..InterpreterTiming::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariablesConfig {
    pub max_vars: usize,
    pub max_var_length: usize,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for VariablesConfig {
    fn default() -> Self {
        Self {
            max_vars: 50,
            max_var_length: 1_000,
            ttl_secs: 3_600,
            sweep_interval_secs: 300,
        }
    }
}

impl VariablesConfig {
    pub fn limits(&self) -> VariableLimits {
        VariableLimits {
            max_vars: self.max_vars,
            max_value_len: self.max_var_length,
            ttl: Duration::from_secs(self.ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a cached sheet download
    pub csv_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { csv_ttl_secs: 300 }
    }
}

impl CacheConfig {
    pub fn csv_ttl(&self) -> Duration {
        Duration::from_secs(self.csv_ttl_secs)
    }
}

impl AppConfig {
    /// `storage_dir`, else `<data dir>/sheetpilot`
    pub fn storage_dir(&self) -> Option<PathBuf> {
        self.storage_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("sheetpilot")))
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sheetpilot").join("config.yaml"))
    }
}

/// Reads the YAML config at `path` (or the default location). A missing file
/// yields the defaults; an unreadable or malformed one is an error.
pub async fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match AppConfig::default_path() {
            Some(path) => path,
            None => {
                warn!("No config directory on this platform, using defaults");
                return Ok(AppConfig::default());
            }
        },
    };

    if !path.exists() {
        warn!("Config file not found, using defaults: {}", path.display());
        return Ok(AppConfig::default());
    }
    let content = fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: AppConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
run:
  batch_item_delay_ms: 250
interpreter:
  command_timeout_ms: 2000
variables:
  max_vars: 10
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.run.batch_item_delay_ms, 250);
        assert_eq!(config.run.navigation_timeout_ms, 30_000);
        assert_eq!(config.interpreter.timing().command_timeout, Duration::from_secs(2));
        assert_eq!(config.interpreter.timing().fill_settle, Duration::from_secs(1));
        assert_eq!(config.variables.limits().max_vars, 10);
        assert_eq!(config.variables.limits().max_value_len, 1_000);
        assert_eq!(config.bridge, BridgeConfig::default());
        assert_eq!(config.cache.csv_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn defaults_match_the_interpreter() {
        assert_eq!(
            InterpreterConfig::default().timing(),
            InterpreterTiming::default()
        );
        assert_eq!(VariablesConfig::default().limits(), VariableLimits::default());
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.yaml")))
            .await
            .unwrap();
        assert_eq!(config, AppConfig::default());

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "run: [1, 2").unwrap();
        assert!(load_config(Some(&bad)).await.is_err());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    #[serial_test::serial]
    async fn default_location_follows_xdg_config_home() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sheetpilot")).unwrap();
        std::fs::write(
            dir.path().join("sheetpilot/config.yaml"),
            "cache:\n  csv_ttl_secs: 60\n",
        )
        .unwrap();

        let previous = std::env::var_os("XDG_CONFIG_HOME");
        std::env::set_var("XDG_CONFIG_HOME", dir.path());
        let loaded = load_config(None).await;
        match previous {
            Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }

        assert_eq!(loaded.unwrap().cache.csv_ttl(), Duration::from_secs(60));
    }
}
