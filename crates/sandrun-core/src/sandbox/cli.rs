// src/sandbox/cli.rs
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use uuid::Uuid;

use super::{ChildProcess, LaunchSpec, SandboxLauncher, SandboxProcess};
use crate::errors::SandboxError;

/// Launches sandboxes by shelling out to a Docker-compatible CLI
/// (`docker`, `podman`, ...).
pub struct DockerCliLauncher {
    binary: String,
}

impl DockerCliLauncher {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments for `<binary> run ...`, isolation flags first.
    pub fn run_args(spec: &LaunchSpec<'_>, container_name: &str) -> Vec<String> {
        let limits = spec.limits;
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container_name.to_string(),
            format!("--memory={}m", limits.memory_limit_mb),
            format!("--cpus={}", limits.cpu_limit),
        ];
        if limits.network_disabled {
            args.push("--network=none".to_string());
        }
        args.push(format!("--pids-limit={}", limits.pids_limit));
        args.push(format!("--tmpfs={}", limits.tmpfs));
        args.push("-v".to_string());
        args.push(format!("{}:{}", spec.work_dir.display(), limits.mount_path));
        args.push("-w".to_string());
        args.push(limits.mount_path.clone());
        if spec.has_stdin {
            args.push("--interactive".to_string());
        }
        args.push(spec.image.to_string());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(spec.command.to_string());
        args
    }
}

#[async_trait]
impl SandboxLauncher for DockerCliLauncher {
    async fn launch(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn SandboxProcess>, SandboxError> {
        let container_name = format!("sandrun-{}", Uuid::new_v4());
        let args = Self::run_args(spec, &container_name);
        log::info!(
            "Launching container {} from image {} via {}",
            container_name,
            spec.image,
            self.binary
        );
        log::debug!("Sandbox command: {} {}", self.binary, args.join(" "));

        let child = Command::new(&self.binary)
            .args(&args)
            .current_dir(spec.work_dir)
            .stdin(if spec.has_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SandboxError::LaunchFailed(format!("failed to spawn {}: {}", self.binary, e))
            })?;

        Ok(Box::new(
            ChildProcess::new(child).with_container(self.binary.clone(), container_name),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LanguageConfig;
    use crate::sandbox::{SandboxLimits, SandboxRunner};
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Writes an executable stand-in for the container CLI that dispatches on
    /// its subcommand.
    fn fake_cli(dir: &Path, run: &str, kill: &str) -> String {
        let path = dir.join("docker");
        let script = format!(
            "#!/bin/sh\ncase \"$1\" in\n  run) {} ;;\n  kill) {} ;;\nesac\n",
            run, kill
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    fn shell_language() -> LanguageConfig {
        LanguageConfig::new("sh", "alpine:3", "sh main.sh", "main.sh", 10)
    }

    #[test]
    fn run_args_carry_every_isolation_flag() {
        let limits = SandboxLimits::default();
        let spec = LaunchSpec {
            work_dir: Path::new("/tmp/code_execution_abc"),
            image: "online-compiler/python:latest",
            command: "python3 main.py",
            limits: &limits,
            has_stdin: false,
            timeout: Duration::from_secs(10),
        };
        let args = DockerCliLauncher::run_args(&spec, "sandrun-test");
        assert_eq!(
            args,
            vec![
                "run",
                "--rm",
                "--name",
                "sandrun-test",
                "--memory=128m",
                "--cpus=0.5",
                "--network=none",
                "--pids-limit=50",
                "--tmpfs=/tmp:exec",
                "-v",
                "/tmp/code_execution_abc:/workspace",
                "-w",
                "/workspace",
                "online-compiler/python:latest",
                "sh",
                "-c",
                "python3 main.py",
            ]
        );
    }

    #[test]
    fn interactive_only_with_stdin() {
        let limits = SandboxLimits::default();
        let spec = LaunchSpec {
            work_dir: Path::new("/w"),
            image: "img",
            command: "cat",
            limits: &limits,
            has_stdin: true,
            timeout: Duration::from_secs(10),
        };
        let args = DockerCliLauncher::run_args(&spec, "n");
        let image_at = args.iter().position(|a| a == "img").unwrap();
        assert_eq!(args[image_at - 1], "--interactive");
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_failure() {
        let launcher = DockerCliLauncher::new("/nonexistent/sandrun-container-cli");
        let limits = SandboxLimits::default();
        let dir = tempfile::tempdir().unwrap();
        let spec = LaunchSpec {
            work_dir: dir.path(),
            image: "img",
            command: "true",
            limits: &limits,
            has_stdin: false,
            timeout: Duration::from_secs(1),
        };
        let err = launcher.launch(&spec).await.err().unwrap();
        assert!(matches!(err, SandboxError::LaunchFailed(_)));
    }

    #[tokio::test]
    async fn program_exit_125_is_passed_through() {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let cli = fake_cli(bin.path(), "echo partial; echo warning >&2; exit 125", "exit 0");
        let runner = SandboxRunner::new(Arc::new(DockerCliLauncher::new(cli)), SandboxLimits::default());

        let output = runner.run(work.path(), &shell_language(), false, None).await.unwrap();
        assert_eq!(output.exit_code, 125);
        assert_eq!(output.stdout, "partial\n");
        assert_eq!(output.stderr, "warning\n");
    }

    #[tokio::test]
    async fn runtime_error_with_125_is_a_launch_failure() {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let cli = fake_cli(
            bin.path(),
            "echo 'docker: Error response from daemon: pull access denied.' >&2; exit 125",
            "exit 0",
        );
        let runner = SandboxRunner::new(Arc::new(DockerCliLauncher::new(cli)), SandboxLimits::default());

        let err = runner.run(work.path(), &shell_language(), false, None).await.unwrap_err();
        match err {
            SandboxError::LaunchFailed(detail) => assert!(detail.contains("pull access denied")),
            other => panic!("expected launch failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn timeout_does_not_wait_for_a_stalled_container_kill() {
        let bin = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let marker = bin.path().join("killed");
        let cli = fake_cli(
            bin.path(),
            "exec sleep 30",
            &format!("touch '{}'; sleep 8", marker.display()),
        );
        let runner = SandboxRunner::new(Arc::new(DockerCliLauncher::new(cli)), SandboxLimits::default());

        let started = Instant::now();
        let err = runner.run(work.path(), &shell_language(), false, Some(1)).await.unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { seconds: 1 }));
        assert!(started.elapsed() < Duration::from_secs(4), "timeout took {:?}", started.elapsed());

        // The container kill still runs, in the background.
        for _ in 0..50 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(marker.exists());
    }
}
