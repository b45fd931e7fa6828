//! Request, result and caller types shared by the orchestrator and its callers

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::errors::{SandrunError, ValidationError};

/// Subscription tier of a caller, ordered by increasing privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Anonymous,
    Basic,
    Advanced,
    Master,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Anonymous, Tier::Basic, Tier::Advanced, Tier::Master];

    pub fn hourly_request_limit(&self) -> u32 {
        match self {
            Tier::Anonymous => 5,
            Tier::Basic => 10,
            Tier::Advanced => 50,
            Tier::Master => 200,
        }
    }

    /// Delay injected before execution in development mode only.
    pub fn artificial_delay_ms(&self) -> u64 {
        match self {
            Tier::Anonymous => 60_000,
            Tier::Basic => 30_000,
            Tier::Advanced => 15_000,
            Tier::Master => 0,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Tier::Anonymous => "Anonymous access - Sign up for higher limits",
            Tier::Basic => "Basic Plan - 30 second compilation delay",
            Tier::Advanced => "Advanced Plan - 15 second compilation delay",
            Tier::Master => "Master Plan - Instant compilation",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tier::Anonymous => "ANONYMOUS",
            Tier::Basic => "BASIC",
            Tier::Advanced => "ADVANCED",
            Tier::Master => "MASTER",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tier {
    type Err = SandrunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .iter()
            .copied()
            .find(|tier| tier.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SandrunError::ConfigError(format!("Unknown tier: {}", s)))
    }
}

/// A validated-by-the-caller execution request.
///
/// `caller_id` and `tier` are resolved by the authentication layer in front of
/// the orchestrator. `client_addr` is only used to key anonymous callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default = "default_tier")]
    pub tier: Tier,
    #[serde(default)]
    pub client_addr: Option<String>,
}

fn default_tier() -> Tier {
    Tier::Anonymous
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
            input: None,
            caller_id: None,
            tier: Tier::Anonymous,
            client_addr: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_caller(mut self, caller_id: impl Into<String>, tier: Tier) -> Self {
        self.caller_id = Some(caller_id.into());
        self.tier = tier;
        self
    }

    pub fn with_client_addr(mut self, addr: impl Into<String>) -> Self {
        self.client_addr = Some(addr.into());
        self
    }

    /// Stdin is only attached for non-empty input.
    pub fn stdin(&self) -> Option<&str> {
        self.input.as_deref().filter(|input| !input.is_empty())
    }

    pub fn validate(&self, max_code_bytes: usize) -> Result<(), ValidationError> {
        if self.code.trim().is_empty() {
            return Err(ValidationError::EmptyCode);
        }
        if self.language.trim().is_empty() {
            return Err(ValidationError::EmptyLanguage);
        }
        if self.code.len() > max_code_bytes {
            return Err(ValidationError::CodeTooLarge {
                limit: max_code_bytes,
            });
        }
        Ok(())
    }
}

/// Who is asking, as seen by the admission gates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: Option<String>,
    pub client_ip: String,
    pub tier: Tier,
}

impl CallerIdentity {
    pub fn authenticated(user_id: impl Into<String>, tier: Tier) -> Self {
        Self {
            user_id: Some(user_id.into()),
            client_ip: "unknown".to_string(),
            tier,
        }
    }

    /// Anonymous callers are always pinned to the most restrictive tier.
    pub fn anonymous(client_ip: impl Into<String>) -> Self {
        Self {
            user_id: None,
            client_ip: client_ip.into(),
            tier: Tier::Anonymous,
        }
    }

    pub fn from_request(request: &ExecutionRequest) -> Self {
        let client_ip = request
            .client_addr
            .clone()
            .filter(|addr| !addr.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        match request.caller_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Self {
                user_id: Some(id.to_string()),
                client_ip,
                tier: request.tier,
            },
            _ => Self::anonymous(client_ip),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Key for the burst gate.
    pub fn burst_key(&self) -> String {
        match &self.user_id {
            Some(id) => format!("user:{}", id),
            None => format!("ip:{}", self.client_ip),
        }
    }

    /// Key for the hourly quota gate.
    pub fn quota_key(&self) -> String {
        match &self.user_id {
            Some(id) => id.clone(),
            None => format!("anon_{}", self.client_ip),
        }
    }
}

/// Picks the client address from a forwarded-for header, falling back to the
/// remote peer.
pub fn resolve_client_ip(forwarded_for: Option<&str>, remote_addr: Option<&str>) -> String {
    let forwarded = forwarded_for
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty() && !ip.eq_ignore_ascii_case("unknown"));

    forwarded
        .or_else(|| remote_addr.map(str::trim).filter(|ip| !ip.is_empty()))
        .unwrap_or("unknown")
        .to_string()
}

/// Outcome of one execution, successful or not.
///
/// Error results never carry output from a killed or failed run: `stdout` and
/// `stderr` stay empty and `exit_code` is -1.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ExecutionResult {
    pub fn completed(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: -1,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_execution_time(mut self, millis: u64) -> Self {
        self.execution_time_ms = millis;
        self
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
