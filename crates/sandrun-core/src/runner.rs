//! Execution backend selection.
//!
//! The orchestrator holds exactly one `Runner`, chosen from `execution.mode`
//! at startup, and never branches on the mode itself.

use std::path::Path;

use crate::errors::SandboxError;
use crate::mock::MockExecutor;
use crate::registry::LanguageConfig;
use crate::sandbox::{ProcessOutput, SandboxRunner};

/// One prepared run. For the real runner `work_dir` already holds the source
/// file and, when `has_stdin` is set, the input artifact.
#[derive(Debug, Clone, Copy)]
pub struct RunJob<'a> {
    pub work_dir: Option<&'a Path>,
    pub language: &'a LanguageConfig,
    /// The language as the caller spelled it.
    pub requested_language: &'a str,
    pub code: &'a str,
    pub has_stdin: bool,
    pub timeout_override: Option<u64>,
}

#[derive(Clone)]
pub enum Runner {
    Real(SandboxRunner),
    Mock(MockExecutor),
}

impl Runner {
    pub async fn run(&self, job: RunJob<'_>) -> Result<ProcessOutput, SandboxError> {
        match self {
            Runner::Real(sandbox) => {
                let work_dir = job.work_dir.ok_or_else(|| {
                    SandboxError::Internal("sandbox run requested without a work directory".to_string())
                })?;
                sandbox
                    .run(work_dir, job.language, job.has_stdin, job.timeout_override)
                    .await
            }
            Runner::Mock(mock) => Ok(mock.run(job.code, job.requested_language).await),
        }
    }

    /// Whether runs need a prepared scratch directory. The mock never reads one.
    pub fn needs_scratch(&self) -> bool {
        matches!(self, Runner::Real(_))
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            Runner::Real(_) => "real",
            Runner::Mock(_) => "mock",
        }
    }
}
