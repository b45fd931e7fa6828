//! Supervision of a local child process.
//!
//! Output streams are drained concurrently with the wait so a chatty program
//! cannot stall on a full pipe. Each stream is accumulated line by line.

use async_trait::async_trait;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use super::{ProcessOutput, SandboxProcess};
use crate::errors::SandboxError;

/// Exit status a container CLI reports when the runtime itself failed. A
/// program inside the container may exit with the same status, so the CLI's
/// own diagnostics on stderr decide which one happened.
const RUNTIME_FAILURE_EXIT_CODE: i32 = 125;
const DAEMON_ERROR_MARKER: &str = "Error response from daemon";

type Capture = JoinHandle<std::io::Result<String>>;

/// A running container, addressed through the CLI that started it.
#[derive(Debug, Clone)]
struct ContainerRef {
    binary: String,
    name: String,
}

impl ContainerRef {
    /// Whether stderr carries the CLI's own error output rather than the program's.
    fn reported_failure(&self, stderr: &str) -> bool {
        let cli_name = Path::new(&self.binary)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.binary);
        let prefix = format!("{}: ", cli_name);
        stderr
            .lines()
            .any(|line| line.starts_with(&prefix) || line.contains(DAEMON_ERROR_MARKER))
    }

    async fn kill(self) {
        let status = Command::new(&self.binary)
            .arg("kill")
            .arg(&self.name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => log::info!("Killed container {}", self.name),
            // The container may already be gone.
            Ok(status) => log::debug!("{} kill {} exited with {}", self.binary, self.name, status),
            Err(e) => log::warn!("Failed to run {} kill {}: {}", self.binary, self.name, e),
        }
    }
}

pub struct ChildProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<Capture>,
    stderr: Option<Capture>,
    container: Option<ContainerRef>,
}

impl ChildProcess {
    /// Wraps a spawned child. Stdout and stderr must have been piped.
    pub fn new(mut child: Child) -> Self {
        let stdin = child.stdin.take();
        let stdout = Some(capture_lines(child.stdout.take()));
        let stderr = Some(capture_lines(child.stderr.take()));
        Self {
            child,
            stdin,
            stdout,
            stderr,
            container: None,
        }
    }

    /// Marks the child as a container CLI client so that a kill also stops the
    /// container, not just the local client process.
    pub fn with_container(mut self, binary: impl Into<String>, name: impl Into<String>) -> Self {
        self.container = Some(ContainerRef {
            binary: binary.into(),
            name: name.into(),
        });
        self
    }

    fn abort_captures(&mut self) {
        for capture in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            capture.abort();
        }
    }
}

#[async_trait]
impl SandboxProcess for ChildProcess {
    async fn feed_stdin(&mut self, input: Vec<u8>) -> Result<(), SandboxError> {
        let Some(mut stdin) = self.stdin.take() else {
            return Ok(());
        };
        match stdin.write_all(&input).await {
            Ok(()) => {}
            // The program exited without consuming all of its input.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = stdin.shutdown().await {
            log::debug!("Closing sandbox stdin failed: {}", e);
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<ProcessOutput, SandboxError> {
        drop(self.stdin.take());
        let status = self.child.wait().await?;
        let stdout = join_capture(self.stdout.take()).await?;
        let stderr = join_capture(self.stderr.take()).await?;
        let exit_code = exit_code(status);

        if let Some(container) = &self.container {
            if exit_code == RUNTIME_FAILURE_EXIT_CODE && container.reported_failure(&stderr) {
                return Err(SandboxError::LaunchFailed(format!(
                    "{} could not run container {}: {}",
                    container.binary,
                    container.name,
                    stderr.trim()
                )));
            }
        }

        Ok(ProcessOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            log::warn!("Failed to kill sandbox process: {}", e);
        }
        // A wedged runtime must not hold the caller past the deadline.
        if let Some(container) = self.container.clone() {
            tokio::spawn(container.kill());
        }
        self.abort_captures();
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.abort_captures();
    }
}

/// Accumulates raw output into newline-terminated lines. Chunks may split a
/// line anywhere; a trailing partial line is terminated on `finish`.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
    collected: String,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            self.append(&line[..end]);
        }
    }

    pub(crate) fn finish(mut self) -> String {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.append(&rest);
        }
        self.collected
    }

    fn append(&mut self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        self.collected.push_str(&String::from_utf8_lossy(line));
        self.collected.push('\n');
    }
}

fn capture_lines<R>(stream: Option<R>) -> Capture
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = LineBuffer::default();
        let Some(stream) = stream else {
            return Ok(lines.finish());
        };
        let mut reader = BufReader::new(stream);
        let mut chunk = Vec::new();
        loop {
            chunk.clear();
            if reader.read_until(b'\n', &mut chunk).await? == 0 {
                break;
            }
            lines.push(&chunk);
        }
        Ok(lines.finish())
    })
}

async fn join_capture(capture: Option<Capture>) -> Result<String, SandboxError> {
    match capture {
        Some(handle) => handle
            .await
            .map_err(|e| SandboxError::Internal(format!("output capture task failed: {}", e)))?
            .map_err(SandboxError::from),
        None => Ok(String::new()),
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str, stdin: bool) -> ChildProcess {
        let child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(if stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        ChildProcess::new(child)
    }

    #[tokio::test]
    async fn captures_both_streams_line_by_line() {
        let mut process = shell("printf 'a\\nb'; echo oops >&2; exit 4", false);
        let output = process.wait().await.unwrap();
        assert_eq!(output.stdout, "a\nb\n");
        assert_eq!(output.stderr, "oops\n");
        assert_eq!(output.exit_code, 4);
    }

    #[tokio::test]
    async fn stdin_is_written_then_closed() {
        let mut process = shell("cat", true);
        process.feed_stdin(b"hello\nworld".to_vec()).await.unwrap();
        let output = process.wait().await.unwrap();
        assert_eq!(output.stdout, "hello\nworld\n");
        assert_eq!(output.exit_code, 0);
    }

    #[test]
    fn line_buffer_joins_split_chunks() {
        let mut lines = LineBuffer::default();
        lines.push(b"a\nb");
        lines.push(b"c\r\n");
        lines.push(b"d");
        assert_eq!(lines.finish(), "a\nbc\nd\n");
        assert_eq!(LineBuffer::default().finish(), "");
    }

    #[test]
    fn only_cli_diagnostics_mark_a_runtime_failure() {
        let container = ContainerRef {
            binary: "/usr/local/bin/docker".to_string(),
            name: "sandrun-test".to_string(),
        };
        assert!(container.reported_failure("docker: invalid reference format.\n"));
        assert!(container.reported_failure(
            "Unable to find image 'x:latest' locally\nError response from daemon: pull access denied\n"
        ));
        assert!(!container.reported_failure(""));
        assert!(!container.reported_failure("Traceback (most recent call last):\n"));
    }

    #[tokio::test]
    async fn killed_process_reports_signal_exit() {
        let mut process = shell("exec sleep 30", false);
        process.kill().await;
        let status = process.child.wait().await.unwrap();
        assert_eq!(exit_code(status), 128 + 9);
    }
}
