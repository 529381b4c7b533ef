// ABOUTME: ChatService - turns one chat request into model text, a validated plan and an executed batch
// ABOUTME: Publishes ai:thinking / ai:response around the model call and tracks batches paused for confirmation

use crate::error::{ChatError, ChatResult};
use crate::model::{ModelClient, ModelPrompt};
use crate::suggestions::suggest;
use crate::types::{AssistantMessage, ChatData, ChatRequest, ResponseMetadata};
use conduit_actions::{ActionExtractor, ActionValidator, ConversationContext, ExecutionPlan};
use conduit_core::{ApiResponse, ExecutionResult, RiskLevel};
use conduit_events::{EventBroadcaster, EventKind};
use conduit_executions::{ActionExecutor, BatchOutcome, CancellationHandle, ExecuteOptions};
use conduit_sandbox::SandboxRegistry;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str = "You are a coding assistant working inside one project directory. \
When you want files changed or commands run, describe each operation with an action block:\n\
```action\n{\"type\": \"file_create\", \"path\": \"src/app.js\", \"content\": \"...\"}\n```\n\
Supported types: file_create, file_update, file_delete, command_execute, refactor, test_create, debug. \
Use \"dependsOn\" to order actions and \"rollback\" to say how to undo one.";

/// A paused batch remembered so that confirming it can report against its plan
struct PendingConfirmation {
    project_id: String,
    plan: ExecutionPlan,
    content: String,
}

pub struct ChatService {
    model: Arc<dyn ModelClient>,
    extractor: ActionExtractor,
    validator: ActionValidator,
    executor: ActionExecutor,
    sandboxes: Arc<SandboxRegistry>,
    events: EventBroadcaster,
    confirm_threshold: RiskLevel,
    pending: Mutex<HashMap<String, PendingConfirmation>>,
}

impl ChatService {
    pub fn new(
        model: Arc<dyn ModelClient>,
        executor: ActionExecutor,
        sandboxes: Arc<SandboxRegistry>,
        events: EventBroadcaster,
    ) -> Self {
        Self {
            model,
            extractor: ActionExtractor::default(),
            validator: ActionValidator::new(),
            executor,
            sandboxes,
            events,
            confirm_threshold: RiskLevel::Medium,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_extractor(mut self, extractor: ActionExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Lowest risk level that requires confirmation
    pub fn with_confirm_threshold(mut self, threshold: RiskLevel) -> Self {
        self.confirm_threshold = threshold;
        self
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    /// Handle a chat request, packaging any failure into the response envelope.
    pub async fn handle(&self, request: ChatRequest) -> ApiResponse<ChatData> {
        let project_id = request.project_id.clone();
        match self.process(request).await {
            Ok(data) => ApiResponse::success(data),
            Err(e) => {
                warn!("Chat request for project {} failed: {}", project_id, e);
                ApiResponse::error(e.to_info())
            }
        }
    }

    pub async fn process(&self, request: ChatRequest) -> ChatResult<ChatData> {
        self.process_with_cancel(request, &CancellationHandle::new()).await
    }

    /// Like [`process`](Self::process); `cancel` stops the batch between actions.
    pub async fn process_with_cancel(
        &self,
        request: ChatRequest,
        cancel: &CancellationHandle,
    ) -> ChatResult<ChatData> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(ChatError::InvalidRequest("message is empty".to_string()));
        }
        let project_id = request.project_id.as_str();
        let sandbox = self.sandboxes.get(project_id).await?;

        let mut context = ConversationContext::new(project_id).with_confirm_threshold(self.confirm_threshold);
        let mut system = SYSTEM_PROMPT.to_string();
        if request.options.include_project_context {
            let files = sandbox.list_files().await?;
            debug!("Including {} files of project {} as context", files.len(), project_id);
            if !files.is_empty() {
                system.push_str("\n\nProject files:\n");
                for file in &files {
                    system.push_str("- ");
                    system.push_str(file);
                    system.push('\n');
                }
            }
            context = context.with_known_files(files);
        }

        self.events.publish(
            project_id,
            EventKind::AiThinking,
            json!({ "message": message }),
        );

        let prompt = ModelPrompt {
            project_id: project_id.to_string(),
            message: message.to_string(),
            system: Some(system),
        };
        let content = self.model.complete(&prompt).await?;

        let intents = self.extractor.extract_all(&content, &context);
        info!(
            "Extracted {} actions for project {}",
            intents.len(),
            project_id
        );
        let plan = self.validator.validate(intents, &context)?;

        self.events.publish(
            project_id,
            EventKind::AiResponse,
            json!({ "content": &content, "actions": plan.actions() }),
        );

        if plan.is_empty() {
            return Ok(self.respond(content, &plan, None));
        }

        let options = ExecuteOptions {
            auto_execute: request.options.auto_execute,
            ..ExecuteOptions::default()
        };
        let outcome = self
            .executor
            .execute_with_cancel(project_id, plan.clone(), options, cancel)
            .await?;
        self.remember_pause(&outcome, &plan, &content);
        Ok(self.respond(content, &plan, Some(outcome)))
    }

    /// Resume a batch that paused for confirmation.
    ///
    /// Actions in `approved` run; a paused action left out is declined.
    pub async fn confirm<I, S>(&self, project_id: &str, batch_token: &str, approved: I) -> ChatResult<ChatData>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pending = {
            let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if pending
                .get(batch_token)
                .is_some_and(|entry| entry.project_id != project_id)
            {
                return Err(ChatError::InvalidRequest(format!(
                    "batch {} does not belong to project {}",
                    batch_token, project_id
                )));
            }
            pending.remove(batch_token)
        };

        let outcome = self.executor.resume(project_id, batch_token, approved).await?;
        let (plan, content) = match pending {
            Some(entry) => (entry.plan, entry.content),
            None => (ExecutionPlan::default(), String::new()),
        };
        self.remember_pause(&outcome, &plan, &content);
        Ok(self.respond(content, &plan, Some(outcome)))
    }

    fn remember_pause(&self, outcome: &BatchOutcome, plan: &ExecutionPlan, content: &str) {
        if let Some(request) = &outcome.confirmation {
            self.pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(
                    request.batch_token.clone(),
                    PendingConfirmation {
                        project_id: outcome.project_id.clone(),
                        plan: plan.clone(),
                        content: content.to_string(),
                    },
                );
        }
    }

    fn respond(&self, content: String, plan: &ExecutionPlan, outcome: Option<BatchOutcome>) -> ChatData {
        let suggestions = suggest(plan, outcome.as_ref());
        let response = AssistantMessage {
            content,
            metadata: ResponseMetadata {
                actions: plan.actions().to_vec(),
                suggestions,
            },
        };
        match outcome {
            Some(outcome) => ChatData {
                response,
                executed_actions: executed_results(&outcome),
                results: outcome.results,
                batch_id: Some(outcome.batch_id),
                rollbacks: outcome.rollbacks,
                confirmation: outcome.confirmation,
            },
            None => ChatData {
                response,
                ..ChatData::default()
            },
        }
    }
}

/// Results of the actions that actually ran, in the order they ran
fn executed_results(outcome: &BatchOutcome) -> Vec<ExecutionResult> {
    outcome
        .executed
        .iter()
        .filter_map(|id| outcome.result(id).cloned())
        .collect()
}
