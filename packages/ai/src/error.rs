// ABOUTME: Errors surfaced by the chat service
// ABOUTME: Wraps model, validation, execution and sandbox failures behind one kind() taxonomy

use conduit_actions::ValidationError;
use conduit_core::ErrorInfo;
use conduit_executions::ExecutionError;
use conduit_sandbox::SandboxError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Invalid chat request: {0}")]
    InvalidRequest(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Model API error: {0}")]
    ApiError(String),

    #[error("Failed to parse model response: {0}")]
    ParseError(String),

    #[error("No API key configured")]
    NoApiKey,

    #[error("Model returned no text")]
    EmptyResponse,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl ChatError {
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::InvalidRequest(_) => "invalid_request",
            ChatError::RequestFailed(_) | ChatError::ApiError(_) => "model_unavailable",
            ChatError::ParseError(_) | ChatError::EmptyResponse => "model_response_invalid",
            ChatError::NoApiKey => "no_api_key",
            ChatError::Validation(e) => e.kind(),
            ChatError::Execution(e) => e.kind(),
            ChatError::Sandbox(e) => e.kind(),
        }
    }

    pub fn to_info(&self) -> ErrorInfo {
        let info = ErrorInfo::new(self.kind(), self.to_string());
        let action_id = match self {
            ChatError::Validation(e) => e.action_id(),
            ChatError::Execution(e) => e.action_id(),
            _ => None,
        };
        match action_id {
            Some(id) => info.for_action(id),
            None => info,
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
