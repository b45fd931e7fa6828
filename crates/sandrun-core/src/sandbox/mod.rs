//! Sandboxed execution of a prepared work directory.
//!
//! The runner owns the wall-clock deadline and nothing else: memory, CPU,
//! process-count and network ceilings are handed to the isolation layer at
//! launch time and enforced there. Launchers hide which isolation runtime is
//! used, so the runner works the same against the container CLI, the Docker
//! Engine API, or a test double.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::SandboxError;
use crate::registry::LanguageConfig;

pub mod api;
pub mod cli;
pub mod process;

pub use api::DockerApiLauncher;
pub use cli::DockerCliLauncher;
pub use process::ChildProcess;

/// Name of the stdin artifact inside the work directory.
pub const INPUT_FILE: &str = "input.txt";

/// How long a kill may take before the runner stops waiting for it.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Resource ceilings applied to every sandbox instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxLimits {
    pub memory_limit_mb: u64,
    pub cpu_limit: f64,
    pub pids_limit: u32,
    pub network_disabled: bool,
    /// Ephemeral writable mount, `<path>[:<options>]`.
    pub tmpfs: String,
    /// Where the work directory is mounted and used as the working directory.
    pub mount_path: String,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_limit_mb: 128,
            cpu_limit: 0.5,
            pids_limit: 50,
            network_disabled: true,
            tmpfs: "/tmp:exec".to_string(),
            mount_path: "/workspace".to_string(),
        }
    }
}

impl SandboxLimits {
    pub fn memory_limit_bytes(&self) -> i64 {
        (self.memory_limit_mb * 1024 * 1024) as i64
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000f64) as i64
    }

    /// Splits the tmpfs setting into mount point and options.
    pub fn tmpfs_mount(&self) -> (&str, &str) {
        match self.tmpfs.split_once(':') {
            Some((path, options)) => (path, options),
            None => (self.tmpfs.as_str(), ""),
        }
    }
}

/// Everything a launcher needs to start one isolated run.
#[derive(Debug, Clone)]
pub struct LaunchSpec<'a> {
    pub work_dir: &'a Path,
    pub image: &'a str,
    pub command: &'a str,
    pub limits: &'a SandboxLimits,
    pub has_stdin: bool,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[async_trait]
pub trait SandboxLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn SandboxProcess>, SandboxError>;
}

/// Handle to a launched sandbox instance.
#[async_trait]
pub trait SandboxProcess: Send {
    /// Writes the whole input and closes the stream.
    async fn feed_stdin(&mut self, input: Vec<u8>) -> Result<(), SandboxError>;

    /// Waits for exit and drains both output streams.
    async fn wait(&mut self) -> Result<ProcessOutput, SandboxError>;

    /// Force-terminates the instance and everything it spawned. Slow runtime
    /// cleanup belongs in a background task so this returns promptly.
    async fn kill(&mut self);
}

#[derive(Clone)]
pub struct SandboxRunner {
    launcher: Arc<dyn SandboxLauncher>,
    limits: SandboxLimits,
}

impl SandboxRunner {
    pub fn new(launcher: Arc<dyn SandboxLauncher>, limits: SandboxLimits) -> Self {
        Self { launcher, limits }
    }

    pub async fn run(
        &self,
        work_dir: &Path,
        language: &LanguageConfig,
        has_stdin: bool,
        timeout_override: Option<u64>,
    ) -> Result<ProcessOutput, SandboxError> {
        let seconds = timeout_override.unwrap_or(language.timeout_seconds);
        let timeout = Duration::from_secs(seconds);
        let spec = LaunchSpec {
            work_dir,
            image: &language.image,
            command: &language.command,
            limits: &self.limits,
            has_stdin,
            timeout,
        };

        let mut process = self.launcher.launch(&spec).await?;

        let outcome = tokio::time::timeout(timeout, async {
            if has_stdin {
                let input = tokio::fs::read(work_dir.join(INPUT_FILE)).await?;
                process.feed_stdin(input).await?;
            }
            process.wait().await
        })
        .await;

        match outcome {
            Ok(Ok(output)) => {
                log::info!("Execution completed with exit code: {}", output.exit_code);
                Ok(output)
            }
            Ok(Err(e)) => {
                kill_within_grace(process.as_mut()).await;
                Err(e)
            }
            Err(_) => {
                log::warn!("Execution of {} timed out after {}s, killing sandbox", language.id, seconds);
                kill_within_grace(process.as_mut()).await;
                Err(SandboxError::Timeout { seconds })
            }
        }
    }
}

async fn kill_within_grace(process: &mut dyn SandboxProcess) {
    if tokio::time::timeout(KILL_GRACE, process.kill()).await.is_err() {
        log::warn!("Sandbox kill did not finish within {:?}, abandoning it", KILL_GRACE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedProcess {
        output: ProcessOutput,
        delay: Duration,
        kill_delay: Duration,
        fed: Arc<Mutex<Option<Vec<u8>>>>,
        killed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl SandboxProcess for ScriptedProcess {
        async fn feed_stdin(&mut self, input: Vec<u8>) -> Result<(), SandboxError> {
            *self.fed.lock().unwrap() = Some(input);
            Ok(())
        }

        async fn wait(&mut self) -> Result<ProcessOutput, SandboxError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.output.clone())
        }

        async fn kill(&mut self) {
            *self.killed.lock().unwrap() = true;
            tokio::time::sleep(self.kill_delay).await;
        }
    }

    struct ScriptedLauncher {
        delay: Duration,
        kill_delay: Duration,
        fed: Arc<Mutex<Option<Vec<u8>>>>,
        killed: Arc<Mutex<bool>>,
    }

    impl ScriptedLauncher {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                kill_delay: Duration::ZERO,
                fed: Arc::new(Mutex::new(None)),
                killed: Arc::new(Mutex::new(false)),
            }
        }
    }

    #[async_trait]
    impl SandboxLauncher for ScriptedLauncher {
        async fn launch(&self, _spec: &LaunchSpec<'_>) -> Result<Box<dyn SandboxProcess>, SandboxError> {
            Ok(Box::new(ScriptedProcess {
                output: ProcessOutput {
                    stdout: "out\n".to_string(),
                    stderr: String::new(),
                    exit_code: 3,
                },
                delay: self.delay,
                kill_delay: self.kill_delay,
                fed: self.fed.clone(),
                killed: self.killed.clone(),
            }))
        }
    }

    fn language(timeout_seconds: u64) -> LanguageConfig {
        LanguageConfig::new("python", "python:3", "python3 main.py", "main.py", timeout_seconds)
    }

    #[tokio::test]
    async fn passes_exit_code_through_unchanged() {
        let launcher = Arc::new(ScriptedLauncher::new(Duration::from_millis(5)));
        let runner = SandboxRunner::new(launcher.clone(), SandboxLimits::default());
        let dir = tempfile::tempdir().unwrap();
        let output = runner.run(dir.path(), &language(10), false, None).await.unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "out\n");
        assert!(launcher.fed.lock().unwrap().is_none());
        assert!(!*launcher.killed.lock().unwrap());
    }

    #[tokio::test]
    async fn feeds_input_artifact_when_stdin_requested() {
        let launcher = Arc::new(ScriptedLauncher::new(Duration::from_millis(5)));
        let runner = SandboxRunner::new(launcher.clone(), SandboxLimits::default());
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INPUT_FILE), "42\n").unwrap();
        runner.run(dir.path(), &language(10), true, None).await.unwrap();
        assert_eq!(launcher.fed.lock().unwrap().as_deref(), Some(&b"42\n"[..]));
    }

    #[tokio::test]
    async fn kills_and_reports_timeout_past_deadline() {
        let launcher = Arc::new(ScriptedLauncher::new(Duration::from_secs(30)));
        let runner = SandboxRunner::new(launcher.clone(), SandboxLimits::default());
        let dir = tempfile::tempdir().unwrap();
        let started = std::time::Instant::now();
        let err = runner.run(dir.path(), &language(10), false, Some(1)).await.unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { seconds: 1 }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(*launcher.killed.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_kill_does_not_hold_the_caller() {
        let launcher = Arc::new(ScriptedLauncher {
            kill_delay: Duration::from_secs(600),
            ..ScriptedLauncher::new(Duration::from_secs(30))
        });
        let runner = SandboxRunner::new(launcher.clone(), SandboxLimits::default());
        let dir = tempfile::tempdir().unwrap();
        let started = tokio::time::Instant::now();
        let err = runner.run(dir.path(), &language(10), false, Some(1)).await.unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { seconds: 1 }));
        assert!(*launcher.killed.lock().unwrap());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1) + KILL_GRACE);
        assert!(elapsed < Duration::from_secs(5), "kill held the caller for {:?}", elapsed);
    }

    #[test]
    fn limits_convert_to_engine_units() {
        let limits = SandboxLimits::default();
        assert_eq!(limits.memory_limit_bytes(), 134_217_728);
        assert_eq!(limits.nano_cpus(), 500_000_000);
        assert_eq!(limits.tmpfs_mount(), ("/tmp", "exec"));
    }
}
