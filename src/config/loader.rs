//! # Configuration Loader
//!
//! Environment-aware configuration loading: YAML file discovery, environment
//! detection, and validation. The loaded configuration is immutable for the
//! process lifetime and shared behind an `Arc`.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::error::{ConfigResult, ConfigurationError};
use super::DqmConfig;

const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Holds a loaded, validated configuration plus its provenance.
pub struct ConfigManager {
    config: DqmConfig,
    environment: String,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection. The file is
    /// resolved from `DQM_CONFIG_PATH`, then `config/dqm.<env>.yaml`, then
    /// `config/dqm.yaml`; when none exists the defaults apply.
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        match Self::find_config_file(&environment) {
            Some(path) => Self::load_from_file_with_env(&path, &environment),
            None => {
                warn!(
                    environment = %environment,
                    "No configuration file found - using defaults with no databases"
                );
                Ok(Arc::new(ConfigManager {
                    config: DqmConfig::default(),
                    environment,
                    config_path: None,
                }))
            }
        }
    }

    /// Load configuration from an explicit file path.
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_file_with_env(path.as_ref(), &environment)
    }

    fn load_from_file_with_env(path: &Path, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        debug!(
            environment = %environment,
            path = %path.display(),
            "Loading configuration"
        );

        let raw = Self::read_config_file_safely(path)?;
        let config: DqmConfig = serde_yaml::from_str(&raw)
            .map_err(|e| ConfigurationError::parse_error(path.display().to_string(), e.to_string()))?;

        config.validate()?;

        tracing::info!(
            environment = %environment,
            path = %path.display(),
            databases = config.databases.len(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_path: Some(path.to_path_buf()),
        }))
    }

    pub fn config(&self) -> &DqmConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Configuration as JSON with passwords masked, for logging.
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        if let Some(databases) = value
            .get_mut("databases")
            .and_then(|d| d.as_array_mut())
        {
            for db in databases {
                if let Some(obj) = db.as_object_mut() {
                    if obj.get("password").map(|p| !p.is_null()).unwrap_or(false) {
                        obj.insert(
                            "password".to_string(),
                            serde_json::Value::String("*****".to_string()),
                        );
                    }
                    if let Some(serde_json::Value::String(cs)) = obj.get("connection_string") {
                        let masked = crate::engine::mask_connection_string(cs);
                        obj.insert(
                            "connection_string".to_string(),
                            serde_json::Value::String(masked),
                        );
                    }
                }
            }
        }
        value
    }

    fn detect_environment() -> String {
        env::var("DQM_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn find_config_file(environment: &str) -> Option<PathBuf> {
        if let Ok(explicit) = env::var("DQM_CONFIG_PATH") {
            let path = PathBuf::from(explicit);
            if path.exists() {
                return Some(path);
            }
            warn!(path = %path.display(), "DQM_CONFIG_PATH does not exist");
        }

        let candidates = [
            PathBuf::from(format!("config/dqm.{environment}.yaml")),
            PathBuf::from("config/dqm.yaml"),
        ];
        candidates.into_iter().find(|p| p.exists())
    }

    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!(
                    "configuration file too large ({}MB > {}MB limit)",
                    metadata.len() / (1024 * 1024),
                    MAX_CONFIG_FILE_SIZE / (1024 * 1024)
                ),
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }
}
