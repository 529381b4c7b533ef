// ABOUTME: Error types for action execution
// ABOUTME: Action-level errors are local to the action; batch-level errors reject the request

use conduit_core::ErrorInfo;
use conduit_preview::DevServerError;
use conduit_sandbox::SandboxError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Action {action_id} violated the sandbox: {message}")]
    SandboxViolation { action_id: String, message: String },

    #[error("Command '{command}' failed for action {action_id}: {reason}")]
    CommandFailed {
        action_id: String,
        command: String,
        exit_code: Option<i32>,
        reason: String,
        #[source]
        source: Option<DevServerError>,
    },

    #[error("Action {action_id} timed out after {seconds} seconds")]
    Timeout { action_id: String, seconds: u64 },

    #[error("Action {action_id} cannot run: {reason}")]
    InvalidAction { action_id: String, reason: String },

    #[error("Action {action_id} failed: {source}")]
    Sandbox {
        action_id: String,
        #[source]
        source: SandboxError,
    },

    #[error("Batch for project {project_id} cannot run: {source}")]
    Project {
        project_id: String,
        #[source]
        source: SandboxError,
    },

    #[error("No paused batch with token {0}")]
    UnknownBatch(String),

    #[error("Batch {batch_token} does not belong to project {project_id}")]
    ForeignBatch { batch_token: String, project_id: String },

    #[error("Batch aborted: {0}")]
    Aborted(String),
}

impl ExecutionError {
    /// Map a sandbox failure of one action onto the execution taxonomy.
    pub fn from_sandbox(action_id: &str, error: SandboxError) -> Self {
        if error.is_violation() {
            return ExecutionError::SandboxViolation {
                action_id: action_id.to_string(),
                message: error.to_string(),
            };
        }
        match error {
            SandboxError::Timeout { seconds, .. } => ExecutionError::Timeout {
                action_id: action_id.to_string(),
                seconds,
            },
            other => ExecutionError::Sandbox {
                action_id: action_id.to_string(),
                source: other,
            },
        }
    }

    /// A dev server that could not be made available fails the command using it.
    pub fn runtime_unavailable(action_id: &str, command: &str, error: DevServerError) -> Self {
        ExecutionError::CommandFailed {
            action_id: action_id.to_string(),
            command: command.to_string(),
            exit_code: None,
            reason: error.to_string(),
            source: Some(error),
        }
    }

    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::SandboxViolation { .. } => "sandbox_violation",
            ExecutionError::CommandFailed { .. } => "command_failed",
            ExecutionError::Timeout { .. } => "timeout",
            ExecutionError::InvalidAction { .. } => "invalid_action",
            ExecutionError::Sandbox { source, .. } => source.kind(),
            ExecutionError::Project { source, .. } => source.kind(),
            ExecutionError::UnknownBatch(_) => "unknown_batch",
            ExecutionError::ForeignBatch { .. } => "foreign_batch",
            ExecutionError::Aborted(_) => "aborted",
        }
    }

    pub fn action_id(&self) -> Option<&str> {
        match self {
            ExecutionError::SandboxViolation { action_id, .. }
            | ExecutionError::CommandFailed { action_id, .. }
            | ExecutionError::Timeout { action_id, .. }
            | ExecutionError::InvalidAction { action_id, .. }
            | ExecutionError::Sandbox { action_id, .. } => Some(action_id),
            ExecutionError::Project { .. }
            | ExecutionError::UnknownBatch(_)
            | ExecutionError::ForeignBatch { .. }
            | ExecutionError::Aborted(_) => None,
        }
    }

    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutionError::CommandFailed { source, .. } => source.is_none(),
            ExecutionError::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn to_info(&self) -> ErrorInfo {
        let info = ErrorInfo::new(self.kind(), self.to_string());
        match self.action_id() {
            Some(id) => info.for_action(id),
            None => info,
        }
    }
}

pub type ExecutorResult<T> = Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_path_violation_maps_to_sandbox_violation() {
        let err = ExecutionError::from_sandbox(
            "a1",
            SandboxError::PathViolation {
                project_id: "p".into(),
                path: "../x".into(),
                reason: "escapes root".into(),
            },
        );
        assert_eq!(err.kind(), "sandbox_violation");
        assert_eq!(err.to_info().action_id.as_deref(), Some("a1"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_dev_server_failure_is_command_failed() {
        let err = ExecutionError::runtime_unavailable(
            "a2",
            "npm test",
            DevServerError::PortExhausted {
                project_id: "p".into(),
                range_start: 8000,
                range_end: 8000,
            },
        );
        assert_eq!(err.kind(), "command_failed");
        assert!(err.to_string().contains("No free port"));
        assert!(!err.is_retryable());
    }
}
