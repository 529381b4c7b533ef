// ABOUTME: Per-action execution results and the structured error record they carry
// ABOUTME: Errors are flattened to kind + message + action id for rendering partial success

use crate::types::ActionStatus;
use serde::{Deserialize, Serialize};

/// Structured, serializable error description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Stable machine-readable error kind, e.g. `sandbox_violation`
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            action_id: None,
        }
    }

    pub fn for_action(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = Some(action_id.into());
        self
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.action_id {
            Some(id) => write!(f, "[{}] {} (action {})", self.kind, self.message, id),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// Outcome of one action in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub action_id: String,
    pub success: bool,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub duration_ms: u64,
    pub attempts: u32,
}

impl ExecutionResult {
    pub fn completed(action_id: &str, output: String, duration_ms: u64, attempts: u32) -> Self {
        Self {
            action_id: action_id.to_string(),
            success: true,
            status: ActionStatus::Completed,
            output: Some(output),
            error: None,
            duration_ms,
            attempts,
        }
    }

    pub fn failed(action_id: &str, error: ErrorInfo, duration_ms: u64, attempts: u32) -> Self {
        Self {
            action_id: action_id.to_string(),
            success: false,
            status: ActionStatus::Failed,
            output: None,
            error: Some(error),
            duration_ms,
            attempts,
        }
    }

    /// Result for an action that never ran.
    pub fn not_run(action_id: &str, status: ActionStatus, error: ErrorInfo) -> Self {
        Self {
            action_id: action_id.to_string(),
            success: false,
            status,
            output: None,
            error: Some(error),
            duration_ms: 0,
            attempts: 0,
        }
    }
}
