//! Error types for every stage of an execution
//!
//! Failures are grouped by the stage that produced them so the orchestrator can
//! decide how much of the failure a caller is allowed to see. Validation and
//! admission errors are caller-facing and carry actionable detail. Sandbox
//! errors are internal: their full text is logged, but only a generic message
//! ever reaches the result record.

use thiserror::Error;

use crate::model::Tier;

#[derive(Error, Debug, Clone)]
pub enum SandrunError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

impl From<std::io::Error> for SandrunError {
    fn from(err: std::io::Error) -> Self {
        SandrunError::IoError(err.to_string())
    }
}

impl From<serde_yaml::Error> for SandrunError {
    fn from(err: serde_yaml::Error) -> Self {
        SandrunError::ConfigError(format!("Failed to parse YAML config: {}", err))
    }
}

/// Request-shape errors, detected before any resource is allocated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Code cannot be empty")]
    EmptyCode,
    #[error("Language must be specified")]
    EmptyLanguage,
    #[error("Code exceeds maximum length of {limit} bytes")]
    CodeTooLarge { limit: usize },
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
}

/// Errors raised while launching or supervising a sandboxed process.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Bollard (Docker client) error: {0}")]
    Bollard(#[from] bollard::errors::Error),
    #[error("I/O error during sandbox operation: {0}")]
    Io(#[from] std::io::Error),
    #[error("Execution timeout after {seconds} seconds")]
    Timeout { seconds: u64 },
    #[error("Sandbox launch failed: {0}")]
    LaunchFailed(String),
    #[error("Sandbox internal error: {0}")]
    Internal(String),
}

/// Which admission gate turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Burst,
    HourlyQuota,
}

#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct AdmissionDenied {
    pub gate: Gate,
    pub tier: Tier,
    pub authenticated: bool,
    pub remaining_requests: u32,
    pub remaining_burst_tokens: u32,
    pub message: String,
}

impl AdmissionDenied {
    pub fn burst(tier: Tier, authenticated: bool, remaining_requests: u32, remaining_tokens: u32) -> Self {
        Self {
            gate: Gate::Burst,
            tier,
            authenticated,
            remaining_requests,
            remaining_burst_tokens: remaining_tokens,
            message: format!(
                "Too many requests. Please try again later. Remaining burst tokens: {}",
                remaining_tokens
            ),
        }
    }

    pub fn quota(tier: Tier, authenticated: bool, remaining_requests: u32, remaining_tokens: u32) -> Self {
        let message = if authenticated {
            format!(
                "Rate limit exceeded. {}. Remaining requests this hour: {}",
                tier.description(),
                remaining_requests
            )
        } else {
            format!(
                "Rate limit exceeded for anonymous users. Please wait or sign up for higher limits. Remaining requests this hour: {}",
                remaining_requests
            )
        };
        Self {
            gate: Gate::HourlyQuota,
            tier,
            authenticated,
            remaining_requests,
            remaining_burst_tokens: remaining_tokens,
            message,
        }
    }
}
