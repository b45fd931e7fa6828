//! Configuration loader for YAML files and environment overrides

use std::env;
use std::path::Path;
use tokio::fs;

use crate::config::types::*;
use crate::errors::SandrunError;

pub const ENV_EXECUTION_MODE: &str = "SANDRUN_EXECUTION_MODE";
pub const ENV_SANDBOX_BACKEND: &str = "SANDRUN_SANDBOX_BACKEND";
pub const ENV_DEV_MODE: &str = "SANDRUN_DEV_MODE";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<SandrunConfig, SandrunError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            SandrunError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        log::info!("Loaded configuration from {}", path.display());
        Self::from_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_str(content: &str) -> Result<SandrunConfig, SandrunError> {
        let mut config: SandrunConfig = if content.trim().is_empty() {
            SandrunConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        Self::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn defaults() -> Result<SandrunConfig, SandrunError> {
        Self::from_str("")
    }

    fn apply_env_overrides(config: &mut SandrunConfig) -> Result<(), SandrunError> {
        if let Ok(mode) = env::var(ENV_EXECUTION_MODE) {
            config.execution.mode = mode.parse()?;
            log::info!("Execution mode overridden from {}: {:?}", ENV_EXECUTION_MODE, config.execution.mode);
        }
        if let Ok(backend) = env::var(ENV_SANDBOX_BACKEND) {
            config.sandbox.backend = backend.parse()?;
        }
        if let Ok(dev_mode) = env::var(ENV_DEV_MODE) {
            config.execution.dev_mode = match dev_mode.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => {
                    return Err(SandrunError::ConfigError(format!(
                        "Invalid {} value: {}",
                        ENV_DEV_MODE, other
                    )))
                }
            };
        }
        Ok(())
    }
}
