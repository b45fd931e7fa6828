// src/sandbox/api.rs
use async_trait::async_trait;
use bollard::container::{AttachContainerResults, LogOutput};
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    AttachContainerOptions, CreateContainerOptions, KillContainerOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use futures_util::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use super::process::LineBuffer;
use super::{LaunchSpec, ProcessOutput, SandboxLauncher, SandboxProcess};
use crate::errors::SandboxError;

/// Launches sandboxes through the Docker Engine API.
pub struct DockerApiLauncher {
    docker: Docker,
}

impl DockerApiLauncher {
    pub fn connect() -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    pub fn container_body(spec: &LaunchSpec<'_>) -> ContainerCreateBody {
        let limits = spec.limits;
        let (tmpfs_path, tmpfs_options) = limits.tmpfs_mount();
        let mut tmpfs = HashMap::new();
        tmpfs.insert(tmpfs_path.to_string(), tmpfs_options.to_string());

        ContainerCreateBody {
            image: Some(spec.image.to_string()),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                spec.command.to_string(),
            ]),
            working_dir: Some(limits.mount_path.clone()),
            network_disabled: Some(limits.network_disabled),
            open_stdin: Some(spec.has_stdin),
            stdin_once: Some(spec.has_stdin),
            attach_stdin: Some(spec.has_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            stop_timeout: Some(spec.timeout.as_secs() as i64),
            host_config: Some(HostConfig {
                binds: Some(vec![format!(
                    "{}:{}",
                    spec.work_dir.display(),
                    limits.mount_path
                )]),
                memory: Some(limits.memory_limit_bytes()),
                nano_cpus: Some(limits.nano_cpus()),
                pids_limit: Some(limits.pids_limit as i64),
                network_mode: limits.network_disabled.then(|| "none".to_string()),
                tmpfs: Some(tmpfs),
                // Removed explicitly once the logs have been read.
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl SandboxLauncher for DockerApiLauncher {
    async fn launch(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn SandboxProcess>, SandboxError> {
        let name = format!("sandrun-{}", Uuid::new_v4());
        let options = Some(CreateContainerOptions {
            name: Some(name.clone()),
            ..Default::default()
        });
        let container = self
            .docker
            .create_container(options, Self::container_body(spec))
            .await?;
        log::info!("Created container {} ({}) from image {}", name, container.id, spec.image);

        let mut process = ApiContainer {
            docker: self.docker.clone(),
            id: container.id,
            input: None,
            removed: false,
        };

        if spec.has_stdin {
            let attach = self
                .docker
                .attach_container(
                    &process.id,
                    Some(AttachContainerOptions {
                        stdin: true,
                        stream: true,
                        ..Default::default()
                    }),
                )
                .await;
            match attach {
                Ok(AttachContainerResults { input, .. }) => process.input = Some(input),
                Err(e) => {
                    process.remove().await;
                    return Err(e.into());
                }
            }
        }

        if let Err(e) = self
            .docker
            .start_container(&process.id, None::<StartContainerOptions>)
            .await
        {
            process.remove().await;
            return Err(e.into());
        }

        Ok(Box::new(process))
    }
}

struct ApiContainer {
    docker: Docker,
    id: String,
    input: Option<Pin<Box<dyn AsyncWrite + Send>>>,
    removed: bool,
}

async fn collect_logs(docker: &Docker, id: &str) -> Result<(String, String), SandboxError> {
    let output_stream = docker.logs(
        id,
        Some(LogsOptions {
            stdout: true,
            stderr: true,
            ..Default::default()
        }),
    );
    split_output(output_stream).await
}

/// Demultiplexes log frames into line-buffered stdout and stderr.
async fn split_output<S>(output_stream: S) -> Result<(String, String), SandboxError>
where
    S: Stream<Item = Result<LogOutput, bollard::errors::Error>>,
{
    let mut output_stream = std::pin::pin!(output_stream);
    let mut stdout = LineBuffer::default();
    let mut stderr = LineBuffer::default();
    while let Some(log_result) = output_stream.next().await {
        match log_result? {
            LogOutput::StdOut { message } => stdout.push(&message),
            LogOutput::StdErr { message } => stderr.push(&message),
            _ => {}
        }
    }
    Ok((stdout.finish(), stderr.finish()))
}

impl ApiContainer {
    async fn remove(&mut self) {
        if self.removed {
            return;
        }
        let options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });
        match self.docker.remove_container(&self.id, options).await {
            Ok(()) => self.removed = true,
            Err(e) => log::warn!("Failed to remove container {}: {}", self.id, e),
        }
    }
}

#[async_trait]
impl SandboxProcess for ApiContainer {
    async fn feed_stdin(&mut self, input: Vec<u8>) -> Result<(), SandboxError> {
        if let Some(mut writer) = self.input.take() {
            writer.write_all(&input).await?;
            writer.shutdown().await?;
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<ProcessOutput, SandboxError> {
        drop(self.input.take());
        // bollard reports a non-zero exit as an error carrying the code.
        let exit_code = {
            let mut wait_stream = self
                .docker
                .wait_container(&self.id, None::<WaitContainerOptions>);
            let outcome = wait_stream.next().await;
            match outcome {
                Some(Ok(response)) => response.status_code,
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(SandboxError::Internal(
                        "Container wait stream ended unexpectedly".to_string(),
                    ))
                }
            }
        };

        let (stdout, stderr) = collect_logs(&self.docker, &self.id).await?;
        self.remove().await;

        Ok(ProcessOutput {
            stdout,
            stderr,
            exit_code: exit_code as i32,
        })
    }

    async fn kill(&mut self) {
        drop(self.input.take());
        if self.removed {
            return;
        }
        self.removed = true;
        let docker = self.docker.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            if let Err(e) = docker.kill_container(&id, None::<KillContainerOptions>).await {
                log::debug!("Kill of container {} failed: {}", id, e);
            }
            let options = Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            });
            if let Err(e) = docker.remove_container(&id, options).await {
                log::warn!("Failed to remove container {}: {}", id, e);
            }
        });
    }
}

impl Drop for ApiContainer {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // Dropped mid-run (e.g. the owning task panicked); clean up in the background.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let docker = self.docker.clone();
            let id = self.id.clone();
            handle.spawn(async move {
                let options = Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                });
                if let Err(e) = docker.remove_container(&id, options).await {
                    log::warn!("Failed to remove abandoned container {}: {}", id, e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxLimits;
    use std::path::Path;
    use std::time::Duration;

    #[tokio::test]
    async fn log_frames_are_line_buffered_per_stream() {
        let frames = futures_util::stream::iter(vec![
            Ok(LogOutput::StdOut { message: "a\nb".into() }),
            Ok(LogOutput::StdErr { message: "oops\n".into() }),
            Ok(LogOutput::StdOut { message: "c\nd".into() }),
        ]);
        let (stdout, stderr) = split_output(frames).await.unwrap();
        assert_eq!(stdout, "a\nbc\nd\n");
        assert_eq!(stderr, "oops\n");
    }

    #[test]
    fn container_body_applies_limits() {
        let limits = SandboxLimits::default();
        let spec = LaunchSpec {
            work_dir: Path::new("/tmp/code_execution_xyz"),
            image: "online-compiler/go:latest",
            command: "go run main.go",
            limits: &limits,
            has_stdin: true,
            timeout: Duration::from_secs(20),
        };
        let body = DockerApiLauncher::container_body(&spec);
        assert_eq!(body.working_dir.as_deref(), Some("/workspace"));
        assert_eq!(body.open_stdin, Some(true));
        assert_eq!(body.network_disabled, Some(true));

        let host = body.host_config.unwrap();
        assert_eq!(host.memory, Some(128 * 1024 * 1024));
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.pids_limit, Some(50));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(
            host.binds,
            Some(vec!["/tmp/code_execution_xyz:/workspace".to_string()])
        );
        assert_eq!(
            host.tmpfs.unwrap().get("/tmp").map(String::as_str),
            Some("exec")
        );
    }
}
