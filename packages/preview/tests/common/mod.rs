// ABOUTME: Shared fakes for dev server manager tests
// ABOUTME: In-memory launcher and health probe with switches to simulate crashes and failures

#![allow(dead_code)]

use async_trait::async_trait;
use conduit_config::{DevServerConfig, SandboxLimits};
use conduit_events::EventBroadcaster;
use conduit_preview::{
    DevServerManager, DevServerResult, HealthProbe, LaunchedRuntime, RuntimeHandle,
    RuntimeLauncher,
};
use conduit_sandbox::{ProjectSandbox, SandboxRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub struct FakeHandle {
    pid: u32,
    exited: Arc<AtomicBool>,
}

#[async_trait]
impl RuntimeHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn has_exited(&mut self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    async fn terminate(&mut self, _grace: Duration) -> DevServerResult<()> {
        self.exited.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Launcher that "starts" a server instantly (or after `delay`)
#[derive(Default)]
pub struct FakeLauncher {
    pub delay: Duration,
    launches: AtomicUsize,
    next_pid: AtomicU32,
    running: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl FakeLauncher {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Make the latest process of `project_id` die
    pub fn crash(&self, project_id: &str) {
        if let Some(flag) = self.running.lock().unwrap().get(project_id) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_alive(&self, project_id: &str) -> bool {
        self.running
            .lock()
            .unwrap()
            .get(project_id)
            .map(|flag| !flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

#[async_trait]
impl RuntimeLauncher for FakeLauncher {
    async fn launch(&self, sandbox: &ProjectSandbox, _port: u16) -> DevServerResult<LaunchedRuntime> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.launches.fetch_add(1, Ordering::SeqCst);

        let exited = Arc::new(AtomicBool::new(false));
        self.running
            .lock()
            .unwrap()
            .insert(sandbox.project_id().to_string(), exited.clone());

        Ok(LaunchedRuntime {
            handle: Box::new(FakeHandle {
                pid: 10_000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
                exited,
            }),
            command: "fake-server".to_string(),
            output: None,
        })
    }
}

/// Probe whose answer is controlled by the test
pub struct FakeProbe {
    healthy: AtomicBool,
    checks: AtomicUsize,
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            checks: AtomicUsize::new(0),
        }
    }
}

impl FakeProbe {
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn check(&self, _url: &str) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }
}

pub fn test_config() -> DevServerConfig {
    DevServerConfig {
        port_range_start: 9400,
        port_range_end: 9409,
        probe_host_ports: false,
        max_running: 4,
        idle_timeout: Duration::from_secs(3600),
        restart_budget: 2,
        stop_grace: Duration::from_millis(100),
        health_interval: Duration::from_millis(50),
        health_retries: 3,
        health_backoff: Duration::from_millis(1),
        health_backoff_max: Duration::from_millis(5),
        health_timeout: Duration::from_secs(2),
        ..DevServerConfig::default()
    }
}

pub struct Harness {
    pub manager: DevServerManager,
    pub launcher: Arc<FakeLauncher>,
    pub probe: Arc<FakeProbe>,
    pub events: EventBroadcaster,
    _workspace: TempDir,
}

pub fn harness(config: DevServerConfig, launcher: FakeLauncher) -> Harness {
    let workspace = TempDir::new().expect("Failed to create workspace");
    let sandboxes = Arc::new(SandboxRegistry::new(
        workspace.path(),
        SandboxLimits::default(),
    ));
    let launcher = Arc::new(launcher);
    let probe = Arc::new(FakeProbe::default());
    let events = EventBroadcaster::default();
    let manager = DevServerManager::new(
        config,
        sandboxes,
        launcher.clone(),
        probe.clone(),
        Some(events.clone()),
    );
    Harness {
        manager,
        launcher,
        probe,
        events,
        _workspace: workspace,
    }
}
