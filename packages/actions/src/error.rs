// ABOUTME: Error types for plan validation
// ABOUTME: Any validation error aborts the whole batch before side effects

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Duplicate action id: {0}")]
    DuplicateId(String),

    #[error("Malformed action {action_id}: {reason}")]
    Malformed { action_id: String, reason: String },

    #[error("Action {action_id} depends on unknown action {dependency}")]
    UnknownDependency {
        action_id: String,
        dependency: String,
    },

    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },
}

impl ValidationError {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::DuplicateId(_) => "duplicate_id",
            ValidationError::Malformed { .. } => "malformed_action",
            ValidationError::UnknownDependency { .. } => "unknown_dependency",
            ValidationError::CycleDetected { .. } => "cycle_detected",
        }
    }

    /// The offending action, when one can be named
    pub fn action_id(&self) -> Option<&str> {
        match self {
            ValidationError::DuplicateId(id) => Some(id),
            ValidationError::Malformed { action_id, .. }
            | ValidationError::UnknownDependency { action_id, .. } => Some(action_id),
            ValidationError::CycleDetected { cycle } => cycle.first().map(String::as_str),
        }
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;
