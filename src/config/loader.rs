//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles YAML file discovery,
//! environment detection, and base-plus-override merging.

use super::error::{ConfigResult, ConfigurationError};
use super::RouterConfig;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_CONFIG_FILE: &str = "router-config.yaml";

/// Loaded configuration plus the environment it was resolved for
pub struct ConfigManager {
    config: RouterConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading router configuration"
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            primary = %config.primary.name,
            replicas = config.replicas.len(),
            pool_size = config.pool.max_connections,
            lag_threshold_ms = config.health.lag_threshold_ms,
            consistency_window_ms = config.session.consistency_window_ms,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with credentials masked, for logging/debugging.
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        if let Some(primary) = value.pointer_mut("/primary/password") {
            *primary = serde_json::Value::String("*****".to_string());
        }
        if let Some(serde_json::Value::Array(replicas)) = value.get_mut("replicas") {
            for replica in replicas {
                if let Some(password) = replica.get_mut("password") {
                    *password = serde_json::Value::String("*****".to_string());
                }
            }
        }
        value
    }

    /// Detect current environment from ROUTER_ENV or APP_ENV
    fn detect_environment() -> String {
        env::var("ROUTER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<RouterConfig> {
        let base_path = config_directory.join(BASE_CONFIG_FILE);
        let base_raw = Self::read_config_file_safely(&base_path)?;
        let mut merged: YamlValue = serde_yaml::from_str(&base_raw)
            .map_err(|e| ConfigurationError::parse_error(base_path.display().to_string(), e))?;

        // Optional per-environment overlay: router-config.{environment}.yaml
        let overlay_path =
            config_directory.join(format!("router-config.{environment}.yaml"));
        if overlay_path.is_file() {
            let overlay_raw = Self::read_config_file_safely(&overlay_path)?;
            let overlay: YamlValue = serde_yaml::from_str(&overlay_raw).map_err(|e| {
                ConfigurationError::parse_error(overlay_path.display().to_string(), e)
            })?;
            debug!(
                overlay = %overlay_path.display(),
                "Applying environment configuration overlay"
            );
            Self::merge_yaml(&mut merged, overlay);
        }

        serde_yaml::from_value(merged)
            .map_err(|e| ConfigurationError::parse_error(base_path.display().to_string(), e))
    }

    /// Recursively merge `overlay` into `base`. Mappings merge key-by-key;
    /// any other value type in the overlay replaces the base value wholesale
    /// (sequences included, so replica lists are replaced, not appended).
    fn merge_yaml(base: &mut YamlValue, overlay: YamlValue) {
        match (base, overlay) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(overlay_map)) => {
                for (key, overlay_value) in overlay_map {
                    if base_map.contains_key(&key) {
                        if let Some(base_value) = base_map.get_mut(&key) {
                            Self::merge_yaml(base_value, overlay_value);
                        }
                    } else {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
            (base_slot, overlay_value) => *base_slot = overlay_value,
        }
    }

    /// Read a configuration file with a size limit and regular-file check.
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024; // 1MB limit

        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!(
                    "configuration file exceeds {}KB limit",
                    MAX_CONFIG_FILE_SIZE / 1024
                ),
            ));
        }

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                path.display().to_string(),
                "configuration path must point to a regular file",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }
}
