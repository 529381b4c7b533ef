// ABOUTME: Error types for dev server lifecycle operations

use conduit_core::ValidationError;
use conduit_sandbox::SandboxError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DevServerError {
    #[error(transparent)]
    InvalidProjectId(#[from] ValidationError),

    #[error("No free port in {range_start}-{range_end} for project {project_id}")]
    PortExhausted {
        project_id: String,
        range_start: u16,
        range_end: u16,
    },

    #[error("Dev server for project {project_id} failed health checks after {attempts} attempts: {reason}")]
    HealthCheckFailed {
        project_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Dev server for project {project_id} crashed {restarts} times, exceeding the restart budget")]
    RestartBudgetExceeded { project_id: String, restarts: u32 },

    #[error("No runtime command found for project {project_id}")]
    NoRuntimeCommand { project_id: String },

    #[error("Failed to launch dev server for project {project_id}: {reason}")]
    LaunchFailed { project_id: String, reason: String },

    #[error("Failed to kill process with PID {pid}: {error}")]
    ProcessKill { pid: u32, error: String },

    #[error("Dev server not running for project: {project_id}")]
    NotRunning { project_id: String },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl DevServerError {
    pub fn kind(&self) -> &'static str {
        match self {
            DevServerError::InvalidProjectId(_) => "invalid_project_id",
            DevServerError::PortExhausted { .. } => "port_exhausted",
            DevServerError::HealthCheckFailed { .. } => "health_check_failed",
            DevServerError::RestartBudgetExceeded { .. } => "restart_budget_exceeded",
            DevServerError::NoRuntimeCommand { .. } => "no_runtime_command",
            DevServerError::LaunchFailed { .. } => "launch_failed",
            DevServerError::ProcessKill { .. } => "process_kill",
            DevServerError::NotRunning { .. } => "not_running",
            DevServerError::Sandbox(e) => e.kind(),
        }
    }

    /// Fatal errors persist until the project is explicitly reset
    pub fn is_fatal(&self) -> bool {
        matches!(self, DevServerError::RestartBudgetExceeded { .. })
    }
}

pub type DevServerResult<T> = Result<T, DevServerError>;
