// ABOUTME: Error types for sandboxed file and command operations
// ABOUTME: Every variant maps to a stable kind string for structured reporting

use conduit_core::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error(transparent)]
    InvalidProjectId(#[from] ValidationError),

    #[error("Path '{path}' escapes the sandbox of project {project_id}: {reason}")]
    PathViolation {
        project_id: String,
        path: String,
        reason: String,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("File {path} is {size} bytes, exceeding the {limit} byte limit")]
    FileTooLarge {
        path: String,
        size: usize,
        limit: usize,
    },

    #[error("Failed to spawn command '{command}': {error}")]
    CommandSpawn { command: String, error: String },

    #[error("Command '{command}' timed out after {seconds} seconds")]
    Timeout { command: String, seconds: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::InvalidProjectId(_) => "invalid_project_id",
            SandboxError::PathViolation { .. } => "sandbox_violation",
            SandboxError::FileNotFound { .. } => "file_not_found",
            SandboxError::FileTooLarge { .. } => "resource_limit",
            SandboxError::CommandSpawn { .. } => "command_spawn",
            SandboxError::Timeout { .. } => "timeout",
            SandboxError::Io(_) => "io",
        }
    }

    pub fn is_violation(&self) -> bool {
        matches!(self, SandboxError::PathViolation { .. })
    }
}

pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
