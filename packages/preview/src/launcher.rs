// ABOUTME: Runtime launching seam for dev servers
// ABOUTME: ProcessLauncher spawns the detected command in the project sandbox as its own process group

use crate::detector::detect_runtime_command;
use crate::error::{DevServerError, DevServerResult};
use async_trait::async_trait;
use conduit_config::constants::PORT;
use conduit_sandbox::{OutputLine, OutputStream, ProjectSandbox};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// A started runtime process owned by the manager.
#[async_trait]
pub trait RuntimeHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Whether the process is gone
    async fn has_exited(&mut self) -> bool;

    /// Ask the process to stop, force-killing it once `grace` has elapsed.
    async fn terminate(&mut self, grace: Duration) -> DevServerResult<()>;
}

/// Result of a successful launch
pub struct LaunchedRuntime {
    pub handle: Box<dyn RuntimeHandle>,
    pub command: String,
    /// Process output, line by line, until the process exits
    pub output: Option<mpsc::UnboundedReceiver<OutputLine>>,
}

/// Starts a project's runtime listening on `port`.
#[async_trait]
pub trait RuntimeLauncher: Send + Sync {
    async fn launch(&self, sandbox: &ProjectSandbox, port: u16) -> DevServerResult<LaunchedRuntime>;
}

/// Launches real OS processes through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    fallback_command: Option<String>,
}

impl ProcessLauncher {
    pub fn new(fallback_command: Option<String>) -> Self {
        Self { fallback_command }
    }
}

#[async_trait]
impl RuntimeLauncher for ProcessLauncher {
    async fn launch(&self, sandbox: &ProjectSandbox, port: u16) -> DevServerResult<LaunchedRuntime> {
        let runtime = detect_runtime_command(sandbox.root(), port, self.fallback_command.as_deref())
            .ok_or_else(|| DevServerError::NoRuntimeCommand {
                project_id: sandbox.project_id().to_string(),
            })?;

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&runtime.command)
            .current_dir(sandbox.root())
            .envs(sandbox.environment())
            .env(PORT, port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| DevServerError::LaunchFailed {
            project_id: sandbox.project_id().to_string(),
            reason: format!("'{}': {}", runtime.command, e),
        })?;

        let pid = child.id();
        info!(
            "Spawned dev server for {} with command '{}' and PID: {:?}",
            sandbox.project_id(),
            runtime.command,
            pid
        );

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, OutputStream::Stderr, tx));
        }

        Ok(LaunchedRuntime {
            handle: Box::new(ChildHandle { child, pid }),
            command: runtime.command,
            output: Some(rx),
        })
    }
}

async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(OutputLine { stream, line }).is_err() {
            break;
        }
    }
}

/// Handle over a spawned child process
pub struct ChildHandle {
    child: Child,
    pid: Option<u32>,
}

impl ChildHandle {
    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) -> DevServerResult<()> {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(());
        };
        match killpg(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(DevServerError::ProcessKill {
                pid,
                error: format!("Failed to send {}: {}", signal, e),
            }),
        }
    }
}

#[async_trait]
impl RuntimeHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(&mut self, grace: Duration) -> DevServerResult<()> {
        if self.has_exited().await {
            return Ok(());
        }

        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGTERM)?;
        #[cfg(not(unix))]
        let _ = self.child.start_kill();

        let waited = tokio::time::timeout(grace, self.child.wait()).await;
        if waited.is_ok() {
            info!("Process {:?} terminated gracefully", self.pid);
            return Ok(());
        }

        warn!(
            "Process {:?} did not stop within {:?}, sending SIGKILL",
            self.pid, grace
        );
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL)?;

        self.child.kill().await.map_err(|e| DevServerError::ProcessKill {
            pid: self.pid.unwrap_or_default(),
            error: e.to_string(),
        })
    }
}
