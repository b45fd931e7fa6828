//! Configuration type definitions
//!
//! Every field has a default, so an empty YAML document is a complete
//! configuration that runs the built-in language table in real sandbox mode
//! with the stock resource ceilings and admission limits.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::admission::EndpointPolicies;
use crate::errors::SandrunError;
use crate::registry::LanguageConfig;
use crate::sandbox::SandboxLimits;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandrunConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Replaces the built-in language table when present.
    #[serde(default)]
    pub languages: Option<Vec<LanguageConfig>>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Real,
    Mock,
}

impl std::str::FromStr for ExecutionMode {
    type Err = SandrunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "real" | "docker" => Ok(ExecutionMode::Real),
            "mock" => Ok(ExecutionMode::Mock),
            other => Err(SandrunError::ConfigError(format!(
                "Unknown execution mode '{}', expected 'real' or 'mock'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_execution_mode")]
    pub mode: ExecutionMode,
    #[serde(default = "default_max_code_bytes")]
    pub max_code_bytes: usize,
    /// Applies each tier's artificial delay before running.
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default)]
    pub mock: MockConfig,
    /// Parent directory for scratch directories; the system temp dir if unset.
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: default_execution_mode(),
            max_code_bytes: default_max_code_bytes(),
            dev_mode: false,
            mock: MockConfig::default(),
            scratch_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    #[serde(default = "default_mock_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_mock_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_mock_min_delay_ms(),
            max_delay_ms: default_mock_max_delay_ms(),
        }
    }
}

impl MockConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    /// Subprocess of a Docker-compatible CLI.
    Cli,
    /// Docker Engine API.
    Api,
}

impl std::str::FromStr for SandboxBackend {
    type Err = SandrunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cli" => Ok(SandboxBackend::Cli),
            "api" => Ok(SandboxBackend::Api),
            other => Err(SandrunError::ConfigError(format!(
                "Unknown sandbox backend '{}', expected 'cli' or 'api'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_sandbox_backend")]
    pub backend: SandboxBackend,
    #[serde(default = "default_cli_binary")]
    pub cli_binary: String,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: u32,
    #[serde(default = "default_true")]
    pub network_disabled: bool,
    #[serde(default = "default_tmpfs")]
    pub tmpfs: String,
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: default_sandbox_backend(),
            cli_binary: default_cli_binary(),
            memory_limit_mb: default_memory_limit_mb(),
            cpu_limit: default_cpu_limit(),
            pids_limit: default_pids_limit(),
            network_disabled: true,
            tmpfs: default_tmpfs(),
            mount_path: default_mount_path(),
        }
    }
}

impl SandboxConfig {
    pub fn limits(&self) -> SandboxLimits {
        SandboxLimits {
            memory_limit_mb: self.memory_limit_mb,
            cpu_limit: self.cpu_limit,
            pids_limit: self.pids_limit,
            network_disabled: self.network_disabled,
            tmpfs: self.tmpfs.clone(),
            mount_path: self.mount_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default)]
    pub burst: BurstConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub endpoints: EndpointPolicies,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstConfig {
    #[serde(default = "default_burst_capacity")]
    pub capacity: u32,
    #[serde(default = "default_refill_per_minute")]
    pub refill_per_minute: u32,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            capacity: default_burst_capacity(),
            refill_per_minute: default_refill_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_quota_window_seconds")]
    pub window_seconds: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_quota_window_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_store_idle_ttl_seconds")]
    pub idle_ttl_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: default_store_max_entries(),
            idle_ttl_seconds: default_store_idle_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SandrunConfig {
    pub fn validate(&self) -> Result<(), SandrunError> {
        let execution = &self.execution;
        if execution.max_code_bytes == 0 {
            return Err(SandrunError::ConfigError(
                "execution.max_code_bytes must be greater than zero".to_string(),
            ));
        }
        if execution.mock.min_delay_ms > execution.mock.max_delay_ms {
            return Err(SandrunError::ConfigError(format!(
                "execution.mock.min_delay_ms ({}) exceeds max_delay_ms ({})",
                execution.mock.min_delay_ms, execution.mock.max_delay_ms
            )));
        }

        let sandbox = &self.sandbox;
        if sandbox.memory_limit_mb == 0 || sandbox.pids_limit == 0 {
            return Err(SandrunError::ConfigError(
                "sandbox.memory_limit_mb and sandbox.pids_limit must be greater than zero".to_string(),
            ));
        }
        if !(sandbox.cpu_limit > 0.0) {
            return Err(SandrunError::ConfigError(
                "sandbox.cpu_limit must be positive".to_string(),
            ));
        }
        if sandbox.cli_binary.trim().is_empty() || !sandbox.mount_path.starts_with('/') {
            return Err(SandrunError::ConfigError(
                "sandbox.cli_binary must be set and sandbox.mount_path must be absolute".to_string(),
            ));
        }

        let admission = &self.admission;
        if admission.burst.capacity == 0 || admission.burst.refill_per_minute == 0 {
            return Err(SandrunError::ConfigError(
                "admission.burst.capacity and refill_per_minute must be greater than zero".to_string(),
            ));
        }
        if admission.quota.window_seconds == 0 || admission.store.max_entries == 0 {
            return Err(SandrunError::ConfigError(
                "admission.quota.window_seconds and admission.store.max_entries must be greater than zero"
                    .to_string(),
            ));
        }
        // An evicted window would hand its key a fresh quota.
        if admission.store.idle_ttl_seconds < admission.quota.window_seconds {
            return Err(SandrunError::ConfigError(format!(
                "admission.store.idle_ttl_seconds ({}) must be at least the quota window ({})",
                admission.store.idle_ttl_seconds, admission.quota.window_seconds
            )));
        }

        if let Some(languages) = &self.languages {
            crate::registry::LanguageRegistry::from_configs(languages.clone())?;
        }

        Ok(())
    }
}

fn default_execution_mode() -> ExecutionMode { ExecutionMode::Real }
fn default_max_code_bytes() -> usize { 10_240 }
fn default_mock_min_delay_ms() -> u64 { 500 }
fn default_mock_max_delay_ms() -> u64 { 1_500 }
fn default_sandbox_backend() -> SandboxBackend { SandboxBackend::Cli }
fn default_cli_binary() -> String { "docker".to_string() }
fn default_memory_limit_mb() -> u64 { 128 }
fn default_cpu_limit() -> f64 { 0.5 }
fn default_pids_limit() -> u32 { 50 }
fn default_tmpfs() -> String { "/tmp:exec".to_string() }
fn default_mount_path() -> String { "/workspace".to_string() }
fn default_burst_capacity() -> u32 { 20 }
fn default_refill_per_minute() -> u32 { 10 }
fn default_quota_window_seconds() -> u64 { 3_600 }
fn default_store_max_entries() -> usize { 100_000 }
fn default_store_idle_ttl_seconds() -> u64 { 7_200 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }
