// ABOUTME: Wiring test for the orchestrator the binary builds

use conduit_ai::{ChatOptions, ChatRequest, ScriptedModelClient};
use conduit_cli::Orchestrator;
use conduit_config::OrchestratorConfig;
use conduit_core::ActionStatus;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

fn orchestrator(dir: &TempDir, replies: &[&str]) -> Orchestrator {
    let config = OrchestratorConfig {
        workspace_root: dir.path().to_path_buf(),
        ..OrchestratorConfig::default()
    };
    Orchestrator::new(config, Arc::new(ScriptedModelClient::new(replies.iter().copied())))
}

#[tokio::test]
async fn test_chat_turn_writes_into_workspace() {
    let dir = TempDir::new().unwrap();
    let reply = r#"<action id="readme" type="file_create" path="README.md">
# Demo
</action>"#;
    let orchestrator = orchestrator(&dir, &[reply]);

    let data = orchestrator
        .chat
        .process(ChatRequest::new("site", "add a readme").with_options(ChatOptions {
            include_project_context: false,
            auto_execute: true,
        }))
        .await
        .unwrap();

    assert_eq!(data.results[0].status, ActionStatus::Completed);
    let written = std::fs::read_to_string(dir.path().join("site").join("README.md")).unwrap();
    assert!(written.contains("# Demo"));
}

#[tokio::test]
async fn test_shutdown_without_servers_is_quiet() {
    let dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&dir, &[]);
    let monitor = orchestrator.start_health_monitor();

    assert!(orchestrator.shutdown().await.is_empty());
    monitor.await.unwrap();
    assert!(orchestrator.dev_servers.list_servers().is_empty());
}
