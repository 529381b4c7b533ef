// ABOUTME: Integration tests launching real processes through ProcessLauncher
// ABOUTME: Covers PORT injection, log capture, graceful stop and early exit detection

#![cfg(unix)]

mod common;

use common::{test_config, FakeProbe};
use conduit_config::{DevServerConfig, SandboxLimits};
use conduit_preview::{DevServerManager, LogType, ProcessLauncher};
use conduit_sandbox::SandboxRegistry;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn process_manager(command: &str, config: DevServerConfig) -> (DevServerManager, Arc<FakeProbe>, TempDir) {
    let workspace = TempDir::new().unwrap();
    let sandboxes = Arc::new(SandboxRegistry::new(workspace.path(), SandboxLimits::default()));
    let probe = Arc::new(FakeProbe::default());
    let manager = DevServerManager::new(
        config,
        sandboxes,
        Arc::new(ProcessLauncher::new(Some(command.to_string()))),
        probe.clone(),
        None,
    );
    (manager, probe, workspace)
}

#[tokio::test]
async fn test_real_process_gets_port_and_logs_are_captured() {
    let (manager, _probe, _workspace) =
        process_manager("echo listening on $PORT; exec sleep 30", test_config());

    let response = manager.start("real", "tester").await;
    assert!(response.success, "start failed: {:?}", response.error);
    let port = response.port.unwrap();
    let pid = manager.get_server_status("real").unwrap().pid.unwrap();

    let expected = format!("listening on {}", port);
    let mut found = false;
    for _ in 0..40 {
        let logs = manager.get_server_logs("real", None, None).await;
        if logs
            .iter()
            .any(|log| log.log_type == LogType::Stdout && log.message == expected)
        {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(found, "dev server output was not captured");

    assert!(manager.stop("real").await.success);
    let gone = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_err();
    assert!(gone, "process {} still alive after stop", pid);
}

#[tokio::test]
async fn test_process_exiting_during_startup_is_reported() {
    let config = DevServerConfig {
        health_retries: 50,
        health_backoff: Duration::from_millis(20),
        health_backoff_max: Duration::from_millis(20),
        ..test_config()
    };
    let (manager, probe, _workspace) = process_manager("exit 1", config);
    probe.set_healthy(false);

    let response = manager.start("flaky", "tester").await;

    assert!(!response.success);
    assert!(response
        .error
        .unwrap()
        .contains("process exited during startup"));
    assert!(manager.port_assignments().is_empty());
}

#[tokio::test]
async fn test_project_without_runtime_command_fails_cleanly() {
    let workspace = TempDir::new().unwrap();
    let sandboxes = Arc::new(SandboxRegistry::new(workspace.path(), SandboxLimits::default()));
    let manager = DevServerManager::new(
        test_config(),
        sandboxes,
        Arc::new(ProcessLauncher::new(None)),
        Arc::new(FakeProbe::default()),
        None,
    );

    let err = manager.ensure_running("empty").await.unwrap_err();
    assert_eq!(err.kind(), "no_runtime_command");
    assert!(manager.list_servers().is_empty());
}
