// ABOUTME: Shell command execution scoped to a project sandbox
// ABOUTME: Streams output line by line, enforces a timeout and caps captured output

use crate::error::{SandboxError, SandboxResult};
use crate::project::ProjectSandbox;
use conduit_core::truncate_output;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Which pipe a line of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of process output, forwarded while the process runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

/// Per-invocation options.
#[derive(Debug, Default)]
pub struct CommandOptions {
    /// Extra variables layered over the sandbox environment
    pub env: BTreeMap<String, String>,
    /// Overrides the sandbox's default command timeout
    pub timeout: Option<Duration>,
    /// Receives each output line as it is produced
    pub output: Option<mpsc::UnboundedSender<OutputLine>>,
}

impl CommandOptions {
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_output(mut self, sender: mpsc::UnboundedSender<OutputLine>) -> Self {
        self.output = Some(sender);
        self
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, for reporting.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Output kept from one pipe, plus how much the process wrote in total
#[derive(Default)]
struct Captured {
    text: String,
    total_bytes: usize,
}

/// Read `reader` to the end, forwarding every line but keeping at most `max_bytes`.
async fn pump<R>(
    reader: R,
    stream: OutputStream,
    sink: Option<mpsc::UnboundedSender<OutputLine>>,
    max_bytes: usize,
) -> Captured
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut captured = Captured::default();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                captured.total_bytes += line.len() + 1;
                let room = max_bytes.saturating_sub(captured.text.len());
                if line.len() < room {
                    captured.text.push_str(&line);
                    captured.text.push('\n');
                } else if room > 0 {
                    let mut end = room;
                    while !line.is_char_boundary(end) {
                        end -= 1;
                    }
                    captured.text.push_str(&line[..end]);
                }
                if let Some(sink) = &sink {
                    // Receiver gone means nobody is listening; keep draining
                    let _ = sink.send(OutputLine { stream, line });
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Stopped reading {:?}: {}", stream, e);
                break;
            }
        }
    }
    captured
}

/// The process group a command runs in. Dropping it kills every member, so
/// nothing a command started outlives the call, including on timeout or when
/// the caller abandons the future.
struct ProcessGroup {
    #[cfg_attr(not(unix), allow(dead_code))]
    pid: Option<u32>,
}

impl ProcessGroup {
    fn kill(&self) {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid {
                match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(e) => warn!("Failed to kill process group {}: {}", pid, e),
                }
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

impl ProjectSandbox {
    /// Run `command` through `sh -c` with the sandbox root as working directory.
    ///
    /// A non-zero exit is reported through [`CommandOutput::exit_code`], not as
    /// an error. The command runs in its own process group, which is killed
    /// once the shell exits, when the timeout elapses, or when the returned
    /// future is dropped.
    pub async fn run_command(
        &self,
        command: &str,
        options: CommandOptions,
    ) -> SandboxResult<CommandOutput> {
        let limit = options.timeout.unwrap_or(self.limits().command_timeout);
        let mut env = self.environment();
        env.extend(options.env);

        debug!(
            "Running '{}' in project {} (timeout {:?})",
            command,
            self.project_id(),
            limit
        );

        let started = Instant::now();
        let mut process = Command::new("sh");
        process
            .arg("-c")
            .arg(command)
            .current_dir(self.root())
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        process.process_group(0);

        let mut child = process.spawn().map_err(|e| SandboxError::CommandSpawn {
            command: command.to_string(),
            error: e.to_string(),
        })?;
        let group = ProcessGroup { pid: child.id() };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let max = self.limits().max_output_bytes;
        let stdout_task =
            stdout.map(|r| tokio::spawn(pump(r, OutputStream::Stdout, options.output.clone(), max)));
        let stderr_task = stderr.map(|r| tokio::spawn(pump(r, OutputStream::Stderr, options.output, max)));

        let outcome = tokio::time::timeout(limit, child.wait()).await;
        let status = match outcome {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    "Command '{}' in project {} exceeded {:?}, killing",
                    command,
                    self.project_id(),
                    limit
                );
                group.kill();
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out command: {}", e);
                }
                return Err(SandboxError::Timeout {
                    command: command.to_string(),
                    seconds: limit.as_secs(),
                });
            }
        };

        // Background children still hold the pipes open until they are gone
        group.kill();
        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Captured::default(),
        };
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Captured::default(),
        };

        Ok(CommandOutput {
            exit_code: status.code(),
            stdout: truncate_output(&stdout.text, stdout.total_bytes, max),
            stderr: truncate_output(&stderr.text, stderr.total_bytes, max),
            duration: started.elapsed(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use conduit_config::SandboxLimits;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn sandbox(dir: &TempDir) -> ProjectSandbox {
        ProjectSandbox::open("cmd", dir.path(), SandboxLimits::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_runs_in_project_root() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir).await;
        sandbox.write_file("marker.txt", "here").await.unwrap();

        let output = sandbox
            .run_command("cat marker.txt", CommandOptions::default())
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "here\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir).await;

        let output = sandbox
            .run_command("echo boom >&2; exit 3", CommandOptions::default())
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr, "boom\n");
        assert_eq!(output.combined(), "boom\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir).await;

        let err = sandbox
            .run_command(
                "sleep 5",
                CommandOptions::default().with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn test_streams_lines_and_passes_env() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let output = sandbox
            .run_command(
                "echo $GREETING; echo second",
                CommandOptions::default()
                    .with_env("GREETING", "hello")
                    .with_output(tx),
            )
            .await
            .unwrap();
        assert!(output.success());

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line.line);
        }
        assert_eq!(lines, vec!["hello".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_output_is_truncated() {
        let dir = TempDir::new().unwrap();
        let limits = SandboxLimits {
            max_output_bytes: 8,
            ..SandboxLimits::default()
        };
        let sandbox = ProjectSandbox::open("cmd", dir.path(), limits).await.unwrap();

        let output = sandbox
            .run_command("printf '0123456789abcdef'", CommandOptions::default())
            .await
            .unwrap();
        assert!(output.stdout.starts_with("01234567"));
        assert!(output.stdout.contains("truncated"));
    }

    #[tokio::test]
    async fn test_large_output_is_capped_while_streaming() {
        let dir = TempDir::new().unwrap();
        let limits = SandboxLimits {
            max_output_bytes: 64,
            ..SandboxLimits::default()
        };
        let sandbox = ProjectSandbox::open("cmd", dir.path(), limits).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let output = sandbox
            .run_command("yes | head -n 20000", CommandOptions::default().with_output(tx))
            .await
            .unwrap();

        assert!(output.stdout.len() < 128);
        assert!(output.stdout.contains("total_bytes=40000"));
        let mut forwarded = 0;
        while rx.try_recv().is_ok() {
            forwarded += 1;
        }
        assert_eq!(forwarded, 20000);
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir).await;

        let err = sandbox
            .run_command(
                "(sleep 1; touch survived); true",
                CommandOptions::default().with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("survived").exists());
    }

    #[tokio::test]
    async fn test_dropped_command_kills_its_children() {
        let dir = TempDir::new().unwrap();
        let sandbox = sandbox(&dir).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(100),
            sandbox.run_command("(sleep 1; touch survived); true", CommandOptions::default()),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("survived").exists());
    }
}
