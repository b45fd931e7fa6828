//! Execution orchestrator
//!
//! Drives a request through validation, admission, scratch preparation, the
//! configured runner and cleanup, and folds every outcome into an
//! [`ExecutionResult`]. Validation is pure and runs first, so malformed
//! requests never consume quota or touch the filesystem.
//!
//! The prepare-and-run stage is spawned as its own task that owns the scratch
//! directory. Whichever way that task ends (completion, timeout, error or
//! panic) the directory is dropped with it and removed from disk.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::admission::{AdmissionController, Endpoint, SystemClock};
use crate::config::{ExecutionMode, SandboxBackend, SandrunConfig};
use crate::errors::{AdmissionDenied, SandboxError, SandrunError, ValidationError};
use crate::mock::MockExecutor;
use crate::model::{CallerIdentity, ExecutionRequest, ExecutionResult, Tier};
use crate::registry::{LanguageConfig, LanguageRegistry};
use crate::runner::{RunJob, Runner};
use crate::sandbox::{DockerApiLauncher, DockerCliLauncher, SandboxLauncher, SandboxRunner, INPUT_FILE};

const SCRATCH_PREFIX: &str = "code_execution_";
const INTERNAL_ERROR: &str = "Internal server error";
const LAUNCH_ERROR: &str = "Execution environment unavailable";

#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub max_code_bytes: usize,
    /// Applies each tier's artificial delay after admission.
    pub dev_mode: bool,
    pub scratch_root: Option<PathBuf>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_code_bytes: 10_240,
            dev_mode: false,
            scratch_root: None,
        }
    }
}

pub struct Orchestrator {
    registry: Arc<LanguageRegistry>,
    admission: Arc<AdmissionController>,
    runner: Arc<Runner>,
    settings: ExecutionSettings,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        admission: Arc<AdmissionController>,
        runner: Runner,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            registry,
            admission,
            runner: Arc::new(runner),
            settings,
        }
    }

    /// Builds the registry, admission gates and runner described by `config`.
    pub fn from_config(config: &SandrunConfig) -> Result<Self, SandrunError> {
        let registry = match &config.languages {
            Some(languages) => LanguageRegistry::from_configs(languages.clone())?,
            None => LanguageRegistry::builtin(),
        };
        let admission = AdmissionController::from_config(&config.admission, Arc::new(SystemClock));

        let runner = match config.execution.mode {
            ExecutionMode::Mock => {
                log::warn!("Execution mode is 'mock': submitted code will not be run");
                Runner::Mock(MockExecutor::new(
                    config.execution.mock.min_delay(),
                    config.execution.mock.max_delay(),
                ))
            }
            ExecutionMode::Real => {
                let launcher: Arc<dyn SandboxLauncher> = match config.sandbox.backend {
                    SandboxBackend::Cli => Arc::new(DockerCliLauncher::new(config.sandbox.cli_binary.clone())),
                    SandboxBackend::Api => Arc::new(DockerApiLauncher::connect().map_err(|e| {
                        SandrunError::RuntimeError(format!("Failed to connect to Docker: {}", e))
                    })?),
                };
                Runner::Real(SandboxRunner::new(launcher, config.sandbox.limits()))
            }
        };

        if let Some(root) = &config.execution.scratch_root {
            std::fs::create_dir_all(root).map_err(|e| {
                SandrunError::ConfigError(format!(
                    "Cannot create scratch root {}: {}",
                    root.display(),
                    e
                ))
            })?;
        }

        log::info!(
            "Orchestrator ready: {} languages, {} runner",
            registry.len(),
            runner.mode_name()
        );

        Ok(Self::new(
            Arc::new(registry),
            Arc::new(admission),
            runner,
            ExecutionSettings {
                max_code_bytes: config.execution.max_code_bytes,
                dev_mode: config.execution.dev_mode,
                scratch_root: config.execution.scratch_root.clone(),
            },
        ))
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Identifiers of every language that can be executed.
    pub fn list_supported_languages(&self) -> BTreeSet<String> {
        self.registry.supported_languages()
    }

    /// Language enumeration behind the gates configured for that endpoint.
    pub fn languages_for(&self, caller: &CallerIdentity) -> Result<BTreeSet<String>, AdmissionDenied> {
        self.admission.admit(Endpoint::Languages, caller)?;
        Ok(self.list_supported_languages())
    }

    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let caller = CallerIdentity::from_request(&request);
        log::info!(
            "Received {} execution request from {} (tier: {})",
            request.language,
            caller.burst_key(),
            caller.tier
        );

        let language = match self.validate(&request) {
            Ok(language) => language.clone(),
            Err(e) => {
                log::warn!("Rejected request from {}: {}", caller.burst_key(), e);
                let mut result = ExecutionResult::error(e.to_string());
                attach_admission_metadata(
                    &mut result,
                    caller.tier,
                    caller.is_authenticated(),
                    self.admission.remaining_requests(&caller),
                    self.admission.remaining_burst_tokens(&caller),
                );
                return result.with_execution_time(elapsed_ms(started));
            }
        };

        let ticket = match self.admission.admit(Endpoint::Execute, &caller) {
            Ok(ticket) => ticket,
            Err(denied) => {
                let mut result = ExecutionResult::error(denied.message.clone());
                attach_admission_metadata(
                    &mut result,
                    denied.tier,
                    denied.authenticated,
                    denied.remaining_requests,
                    denied.remaining_burst_tokens,
                );
                return result.with_execution_time(elapsed_ms(started));
            }
        };

        if self.settings.dev_mode {
            let delay = ticket.tier.artificial_delay_ms();
            if delay > 0 {
                log::info!("Applying {}ms development delay for tier {}", delay, ticket.tier);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        let stdin = request.stdin().map(str::to_owned);
        let stage = run_stage(
            Arc::clone(&self.runner),
            self.settings.scratch_root.clone(),
            language,
            request.language,
            request.code,
            stdin,
        );

        let mut result = match tokio::spawn(stage).await {
            Ok(Ok(output)) => ExecutionResult::completed(output.stdout, output.stderr, output.exit_code),
            Ok(Err(SandboxError::Timeout { seconds })) => {
                ExecutionResult::error(SandboxError::Timeout { seconds }.to_string())
            }
            Ok(Err(SandboxError::LaunchFailed(detail))) => {
                log::error!("Sandbox launch failed: {}", detail);
                ExecutionResult::error(LAUNCH_ERROR)
            }
            Ok(Err(SandboxError::Bollard(e))) => {
                log::error!("Docker API error: {}", e);
                ExecutionResult::error(LAUNCH_ERROR)
            }
            Ok(Err(e)) => {
                log::error!("Error executing code: {}", e);
                ExecutionResult::error(INTERNAL_ERROR)
            }
            Err(e) => {
                log::error!("Execution task failed: {}", e);
                ExecutionResult::error(INTERNAL_ERROR)
            }
        };

        attach_admission_metadata(
            &mut result,
            ticket.tier,
            ticket.authenticated,
            ticket.remaining_requests,
            ticket.remaining_burst_tokens,
        );
        result.with_execution_time(elapsed_ms(started))
    }

    fn validate(&self, request: &ExecutionRequest) -> Result<&LanguageConfig, ValidationError> {
        request.validate(self.settings.max_code_bytes)?;
        self.registry.resolve(&request.language)
    }
}

/// Prepares the scratch directory when the runner needs one and runs the job.
/// The directory lives exactly as long as this future.
async fn run_stage(
    runner: Arc<Runner>,
    scratch_root: Option<PathBuf>,
    language: LanguageConfig,
    requested_language: String,
    code: String,
    stdin: Option<String>,
) -> Result<crate::sandbox::ProcessOutput, SandboxError> {
    let scratch = if runner.needs_scratch() {
        Some(prepare_scratch(scratch_root.as_deref(), &language, &code, stdin.as_deref()).await?)
    } else {
        None
    };

    let job = RunJob {
        work_dir: scratch.as_ref().map(TempDir::path),
        language: &language,
        requested_language: &requested_language,
        code: &code,
        has_stdin: stdin.is_some(),
        timeout_override: None,
    };
    let outcome = runner.run(job).await;

    if let Some(dir) = scratch {
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => log::debug!("Removed scratch directory {}", path.display()),
            Err(e) => log::warn!("Failed to remove scratch directory {}: {}", path.display(), e),
        }
    }
    outcome
}

async fn prepare_scratch(
    root: Option<&Path>,
    language: &LanguageConfig,
    code: &str,
    stdin: Option<&str>,
) -> Result<TempDir, SandboxError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(SCRATCH_PREFIX);
    let dir = match root {
        Some(root) => builder.tempdir_in(root)?,
        None => builder.tempdir()?,
    };
    log::info!("Created temporary directory: {}", dir.path().display());

    tokio::fs::write(dir.path().join(&language.source_file), code).await?;
    if let Some(input) = stdin {
        tokio::fs::write(dir.path().join(INPUT_FILE), input).await?;
    }
    Ok(dir)
}

fn attach_admission_metadata(
    result: &mut ExecutionResult,
    tier: Tier,
    authenticated: bool,
    remaining_requests: u32,
    remaining_burst_tokens: u32,
) {
    result.set_metadata("tier", tier.name());
    result.set_metadata("tierDescription", tier.description());
    result.set_metadata("remainingRequests", remaining_requests);
    result.set_metadata("remainingBurstTokens", remaining_burst_tokens);
    result.set_metadata("authenticated", authenticated);
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
