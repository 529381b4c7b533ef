// ABOUTME: Chat service tests from scripted model replies through to files on disk
// ABOUTME: Response envelope, event order, confirmation round-trip and project context

use conduit_actions::{ActionValidator, ConversationContext};
use conduit_ai::{ChatOptions, ChatRequest, ChatService, ScriptedModelClient};
use conduit_config::{ExecutorConfig, SandboxLimits};
use conduit_core::{ActionIntent, ActionStatus, ActionType, RiskLevel};
use conduit_events::{EventBroadcaster, EventKind, Subscription};
use conduit_executions::{ActionExecutor, ExecuteOptions};
use conduit_sandbox::SandboxRegistry;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

const PROJECT: &str = "chat-demo";

struct Setup {
    service: ChatService,
    model: Arc<ScriptedModelClient>,
    sandboxes: Arc<SandboxRegistry>,
    events: EventBroadcaster,
    _dir: TempDir,
}

fn setup(replies: &[&str]) -> Setup {
    let dir = TempDir::new().unwrap();
    let sandboxes = Arc::new(SandboxRegistry::new(dir.path(), SandboxLimits::default()));
    let events = EventBroadcaster::new(1024);
    let executor = ActionExecutor::new(
        ExecutorConfig::default(),
        sandboxes.clone(),
        None,
        Some(events.clone()),
    );
    let model = Arc::new(ScriptedModelClient::new(replies.iter().copied()));
    let service = ChatService::new(model.clone(), executor, sandboxes.clone(), events.clone());
    Setup {
        service,
        model,
        sandboxes,
        events,
        _dir: dir,
    }
}

fn request(message: &str, auto_execute: bool) -> ChatRequest {
    ChatRequest::new(PROJECT, message).with_options(ChatOptions {
        include_project_context: false,
        auto_execute,
    })
}

fn kinds(subscription: &mut Subscription) -> Vec<EventKind> {
    let mut kinds = Vec::new();
    while let Some(event) = subscription.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}

#[cfg(unix)]
#[tokio::test]
async fn test_marker_reply_is_executed_in_order() {
    let reply = r#"Sure, here you go.

```action
[
  {"id": "write", "type": "file_create", "path": "hello.txt", "content": "hi there"},
  {"id": "show", "type": "command_execute", "command": "cat hello.txt", "dependsOn": ["write"]}
]
```
"#;
    let s = setup(&[reply]);
    let mut subscription = s.events.subscribe(PROJECT);

    let response = s.service.handle(request("add a greeting", true)).await;

    assert!(response.success, "{:?}", response.error);
    let data = response.data.unwrap();
    assert_eq!(
        data.executed_actions
            .iter()
            .map(|r| r.action_id.as_str())
            .collect::<Vec<_>>(),
        vec!["write", "show"]
    );
    assert!(data.executed_actions.iter().all(|r| r.success));
    assert_eq!(
        data.results.iter().map(|r| r.status).collect::<Vec<_>>(),
        vec![ActionStatus::Completed, ActionStatus::Completed]
    );
    assert_eq!(data.results[1].output.as_deref().map(str::trim), Some("hi there"));
    assert_eq!(data.response.content, reply);
    assert_eq!(data.response.metadata.actions.len(), 2);
    assert!(data
        .response
        .metadata
        .suggestions
        .contains(&"Start the dev server to preview changes".to_string()));

    let kinds = kinds(&mut subscription);
    assert_eq!(kinds[0], EventKind::AiThinking);
    assert_eq!(kinds[1], EventKind::AiResponse);
    assert_eq!(kinds[2], EventKind::Status);
    assert_eq!(kinds[3], EventKind::ActionStarted);
}

#[tokio::test]
async fn test_reply_without_actions_executes_nothing() {
    let s = setup(&["React renders components from state."]);

    let response = s.service.handle(request("what is react?", true)).await;

    assert!(response.success);
    let data = response.data.unwrap();
    assert!(data.results.is_empty());
    assert!(data.executed_actions.is_empty());
    assert!(data.batch_id.is_none());
    assert_eq!(data.response.metadata.suggestions.len(), 1);
}

#[tokio::test]
async fn test_cyclic_plan_is_rejected_before_side_effects() {
    let reply = r#"```action
[
  {"id": "a", "type": "file_create", "path": "a.txt", "content": "a", "dependsOn": ["b"]},
  {"id": "b", "type": "file_create", "path": "b.txt", "content": "b", "dependsOn": ["a"]}
]
```"#;
    let s = setup(&[reply]);

    let response = s.service.handle(request("make two files", true)).await;

    assert!(!response.success);
    assert!(response.data.is_none());
    assert_eq!(response.error.unwrap().kind, "cycle_detected");
    let sandbox = s.sandboxes.get(PROJECT).await.unwrap();
    assert!(!sandbox.file_exists("a.txt").await.unwrap());
    assert!(!sandbox.file_exists("b.txt").await.unwrap());
}

#[tokio::test]
async fn test_delete_waits_for_confirmation() {
    let reply = r#"<action id="rm-old" type="file_delete" path="old.txt" />"#;
    let s = setup(&[reply]);
    let sandbox = s.sandboxes.get(PROJECT).await.unwrap();
    sandbox.write_file("old.txt", "legacy").await.unwrap();

    let paused = s
        .service
        .process(request("remove old.txt", false))
        .await
        .unwrap();

    let confirmation = paused.confirmation.clone().unwrap();
    assert_eq!(confirmation.action_id, "rm-old");
    assert!(paused.executed_actions.is_empty());
    assert_eq!(paused.results[0].status, ActionStatus::AwaitingConfirmation);
    assert!(sandbox.file_exists("old.txt").await.unwrap());
    assert!(paused
        .response
        .metadata
        .suggestions
        .iter()
        .any(|s| s.starts_with("Confirm")));

    let resumed = s
        .service
        .confirm(PROJECT, &confirmation.batch_token, ["rm-old"])
        .await
        .unwrap();

    assert_eq!(resumed.results[0].status, ActionStatus::Completed);
    assert_eq!(resumed.response.metadata.actions.len(), 1);
    assert!(!sandbox.file_exists("old.txt").await.unwrap());
}

#[tokio::test]
async fn test_confirm_rejects_token_of_another_project() {
    let reply = r#"<action id="rm-old" type="file_delete" path="old.txt" />"#;
    let s = setup(&[reply]);
    let sandbox = s.sandboxes.get(PROJECT).await.unwrap();
    sandbox.write_file("old.txt", "legacy").await.unwrap();

    let paused = s
        .service
        .process(request("remove old.txt", false))
        .await
        .unwrap();
    let token = paused.confirmation.unwrap().batch_token;

    let err = s
        .service
        .confirm("someone-else", &token, ["rm-old"])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_request");
    assert!(sandbox.file_exists("old.txt").await.unwrap());
}

#[tokio::test]
async fn test_confirm_checks_owner_of_batches_paused_elsewhere() {
    let s = setup(&[]);
    let sandbox = s.sandboxes.get(PROJECT).await.unwrap();
    sandbox.write_file("old.txt", "legacy").await.unwrap();

    // Paused through the executor directly, so the chat service never saw it
    let plan = ActionValidator::new()
        .validate(
            vec![ActionIntent::new("rm-old", ActionType::FileDelete, "Delete old.txt")
                .with_param("path", "old.txt")
                .with_risk(RiskLevel::High)],
            &ConversationContext::new(PROJECT),
        )
        .unwrap();
    let paused = s
        .service
        .executor()
        .execute(PROJECT, plan, ExecuteOptions::confirm_each())
        .await
        .unwrap();
    let token = paused.confirmation.unwrap().batch_token;

    let err = s
        .service
        .confirm("someone-else", &token, ["rm-old"])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "foreign_batch");
    assert!(sandbox.file_exists("old.txt").await.unwrap());

    let resumed = s.service.confirm(PROJECT, &token, ["rm-old"]).await.unwrap();
    assert_eq!(resumed.results[0].status, ActionStatus::Completed);
    assert!(!sandbox.file_exists("old.txt").await.unwrap());
}

#[tokio::test]
async fn test_project_context_reaches_model_and_extractor() {
    let reply = "Create index.js with a log line.\n\n```js\nconsole.log('v2');\n```\n";
    let s = setup(&[reply]);
    let sandbox = s.sandboxes.get(PROJECT).await.unwrap();
    sandbox.write_file("index.js", "console.log('v1');\n").await.unwrap();

    let data = s
        .service
        .process(ChatRequest::new(PROJECT, "log v2").with_options(ChatOptions {
            include_project_context: true,
            auto_execute: true,
        }))
        .await
        .unwrap();

    let prompts = s.model.prompts();
    assert!(prompts[0].system.as_deref().unwrap().contains("- index.js"));
    assert_eq!(data.response.metadata.actions[0].action_type, ActionType::FileUpdate);
    assert_eq!(data.results[0].status, ActionStatus::Completed);
    assert_eq!(sandbox.read_file("index.js").await.unwrap(), "console.log('v2');\n");
}

#[tokio::test]
async fn test_empty_message_is_invalid() {
    let s = setup(&[]);

    let response = s.service.handle(request("   ", true)).await;

    assert_eq!(response.error.unwrap().kind, "invalid_request");
    assert!(s.model.prompts().is_empty());
}

#[tokio::test]
async fn test_bad_project_id_is_reported() {
    let s = setup(&["irrelevant"]);

    let response = s
        .service
        .handle(ChatRequest::new("../escape", "hello"))
        .await;

    assert_eq!(response.error.unwrap().kind, "invalid_project_id");
}
