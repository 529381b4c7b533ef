// ABOUTME: Wires the Conduit components into one running orchestrator
// ABOUTME: Shared by the `conduit` binary and its integration tests

use conduit_ai::{ChatService, ModelClient};
use conduit_config::OrchestratorConfig;
use conduit_events::EventBroadcaster;
use conduit_executions::{ActionExecutor, RuntimeProvider};
use conduit_preview::DevServerManager;
use conduit_sandbox::SandboxRegistry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Every long-lived component, built once per process.
pub struct Orchestrator {
    pub config: OrchestratorConfig,
    pub sandboxes: Arc<SandboxRegistry>,
    pub events: EventBroadcaster,
    pub dev_servers: DevServerManager,
    pub executor: ActionExecutor,
    pub chat: ChatService,
    monitor: CancellationToken,
}

impl Orchestrator {
    /// Components backed by real processes and an HTTP health probe.
    pub fn new(config: OrchestratorConfig, model: Arc<dyn ModelClient>) -> Self {
        let sandboxes = Arc::new(SandboxRegistry::new(
            config.workspace_root.clone(),
            config.sandbox.clone(),
        ));
        let events = EventBroadcaster::new(config.events.queue_depth);
        let dev_servers = DevServerManager::with_process_runtime(
            config.dev_servers.clone(),
            sandboxes.clone(),
            Some(events.clone()),
        );
        Self::assemble(config, sandboxes, events, dev_servers, model)
    }

    /// Same wiring around a caller-built dev server manager.
    pub fn assemble(
        config: OrchestratorConfig,
        sandboxes: Arc<SandboxRegistry>,
        events: EventBroadcaster,
        dev_servers: DevServerManager,
        model: Arc<dyn ModelClient>,
    ) -> Self {
        let runtime: Arc<dyn RuntimeProvider> = Arc::new(dev_servers.clone());
        let executor = ActionExecutor::new(
            config.executor.clone(),
            sandboxes.clone(),
            Some(runtime),
            Some(events.clone()),
        );
        let chat = ChatService::new(model, executor.clone(), sandboxes.clone(), events.clone());

        Self {
            config,
            sandboxes,
            events,
            dev_servers,
            executor,
            chat,
            monitor: CancellationToken::new(),
        }
    }

    /// Background health and idle sweeps until [`shutdown`](Self::shutdown).
    pub fn start_health_monitor(&self) -> JoinHandle<()> {
        self.dev_servers.start_health_monitor(self.monitor.child_token())
    }

    /// Stop the monitor and every dev server. Returns the projects stopped.
    pub async fn shutdown(&self) -> Vec<String> {
        self.monitor.cancel();
        let stopped = self.dev_servers.stop_all().await;
        if !stopped.is_empty() {
            info!("Stopped {} dev server(s) on shutdown", stopped.len());
        }
        stopped
    }
}
