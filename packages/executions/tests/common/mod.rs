// ABOUTME: Shared harness for executor tests
// ABOUTME: Temp workspace, recording event bus and a runtime provider the test controls

#![allow(dead_code)]

use async_trait::async_trait;
use conduit_actions::{ActionValidator, ConversationContext, ExecutionPlan};
use conduit_config::{ExecutorConfig, SandboxLimits};
use conduit_core::{ActionIntent, ActionType, RiskLevel};
use conduit_events::{EventBroadcaster, ProjectEvent};
use conduit_executions::{ActionExecutor, RuntimeEndpoint, RuntimeProvider};
use conduit_preview::{DevServerError, DevServerResult};
use conduit_sandbox::SandboxRegistry;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const PROJECT: &str = "demo";

/// Runtime that is always up on a fixed port unless told to fail
#[derive(Default)]
pub struct FakeRuntime {
    calls: AtomicUsize,
    failing: AtomicBool,
    absent: AtomicBool,
}

impl FakeRuntime {
    pub const PORT: u16 = 8123;

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every later call reports an exhausted port pool
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Behave like a project with nothing to run
    pub fn no_runtime(&self) {
        self.absent.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuntimeProvider for FakeRuntime {
    async fn ensure_running(&self, project_id: &str) -> DevServerResult<Option<RuntimeEndpoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(DevServerError::PortExhausted {
                project_id: project_id.to_string(),
                range_start: Self::PORT,
                range_end: Self::PORT,
            });
        }
        if self.absent.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(RuntimeEndpoint {
            url: format!("http://127.0.0.1:{}", Self::PORT),
            port: Self::PORT,
        }))
    }
}

pub struct Harness {
    pub executor: ActionExecutor,
    pub sandboxes: Arc<SandboxRegistry>,
    pub runtime: Arc<FakeRuntime>,
    pub events: EventBroadcaster,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let sandboxes = Arc::new(SandboxRegistry::new(
            dir.path().join("projects"),
            SandboxLimits::default(),
        ));
        let runtime = Arc::new(FakeRuntime::default());
        let events = EventBroadcaster::new(1024);
        let executor = ActionExecutor::new(
            config,
            sandboxes.clone(),
            Some(runtime.clone() as Arc<dyn RuntimeProvider>),
            Some(events.clone()),
        );
        Self {
            executor,
            sandboxes,
            runtime,
            events,
            dir,
        }
    }

    pub fn project_root(&self, project_id: &str) -> PathBuf {
        self.dir.path().join("projects").join(project_id)
    }

    pub async fn read(&self, path: &str) -> Option<String> {
        let sandbox = self.sandboxes.get(PROJECT).await.unwrap();
        sandbox.read_file(path).await.ok()
    }

    pub async fn write(&self, path: &str, content: &str) {
        let sandbox = self.sandboxes.get(PROJECT).await.unwrap();
        sandbox.write_file(path, content).await.unwrap();
    }
}

pub fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        max_concurrent_batches: 4,
        action_timeout: Duration::from_secs(10),
        command_retries: 2,
        retry_delay: Duration::from_millis(10),
        rollback_timeout: Duration::from_secs(5),
    }
}

/// Validate intents into a plan; only high risk needs confirmation.
pub fn plan(intents: Vec<ActionIntent>) -> ExecutionPlan {
    let ctx = ConversationContext::new(PROJECT).with_confirm_threshold(RiskLevel::High);
    ActionValidator.validate(intents, &ctx).unwrap()
}

pub fn create(id: &str, path: &str, content: &str) -> ActionIntent {
    ActionIntent::new(id, ActionType::FileCreate, format!("Create {}", path))
        .with_param("path", path)
        .with_param("content", content)
}

pub fn update(id: &str, path: &str, content: &str) -> ActionIntent {
    ActionIntent::new(id, ActionType::FileUpdate, format!("Update {}", path))
        .with_param("path", path)
        .with_param("content", content)
}

pub fn run(id: &str, command: &str) -> ActionIntent {
    ActionIntent::new(id, ActionType::CommandExecute, format!("Run {}", command))
        .with_param("command", command)
}

/// Everything already published for a subscription
pub fn drain(subscription: &mut conduit_events::Subscription) -> Vec<ProjectEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.try_recv() {
        events.push(event);
    }
    events
}
