// ABOUTME: Chat request and response shapes exchanged with the transport layer
// ABOUTME: camelCase on the wire; responses are wrapped in the core ApiResponse envelope

use conduit_core::{ActionIntent, ExecutionResult};
use conduit_executions::{ConfirmationRequest, RollbackRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOptions {
    /// List the project's files for the model and the extractor
    #[serde(default)]
    pub include_project_context: bool,
    /// Run confirmation-gated actions without pausing
    #[serde(default)]
    pub auto_execute: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub project_id: String,
    pub message: String,
    #[serde(default)]
    pub options: ChatOptions,
}

impl ChatRequest {
    pub fn new(project_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            message: message.into(),
            options: ChatOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// Validated actions in execution order
    pub actions: Vec<ActionIntent>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    pub content: String,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatData {
    pub response: AssistantMessage,
    /// Results of the actions that ran, in execution order
    pub executed_actions: Vec<ExecutionResult>,
    pub results: Vec<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub rollbacks: Vec<RollbackRecord>,
    /// Present when the batch paused for a decision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ConfirmationRequest>,
}
