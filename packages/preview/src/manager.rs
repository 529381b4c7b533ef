// ABOUTME: DevServerManager - owns every project's live runtime process
// ABOUTME: Serializes start/stop per project, bounds running servers globally and owns the port map

use crate::error::{DevServerError, DevServerResult};
use crate::health::{HealthProbe, HttpHealthProbe};
use crate::launcher::{ProcessLauncher, RuntimeHandle, RuntimeLauncher};
use crate::logs::LogStore;
use crate::ports::PortPool;
use crate::types::*;
use chrono::{DateTime, Utc};
use conduit_config::DevServerConfig;
use conduit_core::validate_project_id;
use conduit_events::{EventBroadcaster, EventKind};
use conduit_sandbox::{OutputLine, OutputStream, SandboxRegistry};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub(crate) type SharedHandle = Arc<tokio::sync::Mutex<Box<dyn RuntimeHandle>>>;

/// Registry entry for one project's server.
struct ServerEntry {
    instance: DevServerInstance,
    handle: Option<SharedHandle>,
    last_used: Instant,
    /// Admission slot, returned when the entry is dropped
    _permit: OwnedSemaphorePermit,
}

/// Everything guarded by the manager's single synchronization point.
struct RegistryState {
    servers: HashMap<String, ServerEntry>,
    ports: PortPool,
    /// Crash restarts since the last clean stop
    restarts: HashMap<String, u32>,
    /// Projects that exhausted their restart budget, with the reason
    fatal: HashMap<String, String>,
}

/// What the health monitor needs to probe one running server
pub(crate) struct RunningServer {
    pub project_id: String,
    pub instance_id: Uuid,
    pub url: String,
    pub handle: Option<SharedHandle>,
    pub last_used: Instant,
}

struct Inner {
    config: DevServerConfig,
    sandboxes: Arc<SandboxRegistry>,
    launcher: Arc<dyn RuntimeLauncher>,
    probe: Arc<dyn HealthProbe>,
    state: Mutex<RegistryState>,
    project_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    admission: Arc<Semaphore>,
    /// Signalled whenever a server becomes evictable
    became_running: Notify,
    logs: LogStore,
    events: Option<EventBroadcaster>,
}

/// Manages one dev server per project.
///
/// Cloning is cheap; all clones share the same registry.
#[derive(Clone)]
pub struct DevServerManager {
    inner: Arc<Inner>,
}

impl DevServerManager {
    pub fn new(
        config: DevServerConfig,
        sandboxes: Arc<SandboxRegistry>,
        launcher: Arc<dyn RuntimeLauncher>,
        probe: Arc<dyn HealthProbe>,
        events: Option<EventBroadcaster>,
    ) -> Self {
        let ports = PortPool::new(config.port_range(), config.probe_host_ports);
        let admission = Arc::new(Semaphore::new(config.max_running.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                sandboxes,
                launcher,
                probe,
                state: Mutex::new(RegistryState {
                    servers: HashMap::new(),
                    ports,
                    restarts: HashMap::new(),
                    fatal: HashMap::new(),
                }),
                project_locks: Mutex::new(HashMap::new()),
                admission,
                became_running: Notify::new(),
                logs: LogStore::default(),
                events,
            }),
        }
    }

    /// Manager that launches real processes and probes them over HTTP.
    pub fn with_process_runtime(
        config: DevServerConfig,
        sandboxes: Arc<SandboxRegistry>,
        events: Option<EventBroadcaster>,
    ) -> Self {
        let launcher = Arc::new(ProcessLauncher::new(config.fallback_command.clone()));
        Self::new(
            config,
            sandboxes,
            launcher,
            Arc::new(HttpHealthProbe::default()),
            events,
        )
    }

    pub fn config(&self) -> &DevServerConfig {
        &self.inner.config
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn project_lock(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .project_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // A lock only the map still references is neither held nor awaited
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub(crate) fn health_url(&self, base_url: &str) -> String {
        let path = &self.inner.config.health_path;
        if path.starts_with('/') {
            format!("{}{}", base_url, path)
        } else {
            format!("{}/{}", base_url, path)
        }
    }

    fn publish_status(&self, project_id: &str, status: DevServerStatus, port: Option<u16>) {
        if let Some(events) = &self.inner.events {
            events.publish(
                project_id,
                EventKind::Status,
                json!({ "devServer": { "status": status.as_str(), "port": port } }),
            );
        }
    }

    /// Start the dev server for a project, or report the one already running.
    pub async fn start(&self, project_id: &str, user_id: &str) -> StartResponse {
        match self.start_server(project_id, Some(user_id)).await {
            Ok(instance) => StartResponse::started(&instance),
            Err(e) => {
                warn!("Failed to start dev server for {}: {}", project_id, e);
                StartResponse::failed(e)
            }
        }
    }

    /// Running instance for a project, starting it first if needed.
    ///
    /// Counts as use of the server for idle tracking.
    pub async fn ensure_running(&self, project_id: &str) -> DevServerResult<DevServerInstance> {
        self.start_server(project_id, None).await
    }

    async fn start_server(
        &self,
        project_id: &str,
        user_id: Option<&str>,
    ) -> DevServerResult<DevServerInstance> {
        validate_project_id(project_id)?;
        let lock = self.project_lock(project_id);
        let _guard = lock.lock().await;
        self.start_locked(project_id, user_id).await
    }

    /// Caller must hold the project lock.
    async fn start_locked(
        &self,
        project_id: &str,
        user_id: Option<&str>,
    ) -> DevServerResult<DevServerInstance> {
        {
            let mut state = self.state();
            if state.fatal.contains_key(project_id) {
                return Err(DevServerError::RestartBudgetExceeded {
                    project_id: project_id.to_string(),
                    restarts: state.restarts.get(project_id).copied().unwrap_or(0),
                });
            }
            if let Some(entry) = state.servers.get_mut(project_id) {
                if entry.instance.status == DevServerStatus::Running {
                    entry.last_used = Instant::now();
                    entry.instance.last_used_at = Utc::now();
                    debug!("Dev server for {} already running", project_id);
                    return Ok(entry.instance.clone());
                }
            }
        }

        let permit = self.admit(project_id).await?;

        let instance = {
            let mut state = self.state();
            let port = state.ports.allocate(project_id).ok_or_else(|| {
                let range = state.ports.range();
                DevServerError::PortExhausted {
                    project_id: project_id.to_string(),
                    range_start: *range.start(),
                    range_end: *range.end(),
                }
            })?;

            let instance = DevServerInstance {
                id: Uuid::new_v4(),
                project_id: project_id.to_string(),
                port,
                url: format!("http://127.0.0.1:{}", port),
                pid: None,
                status: DevServerStatus::Starting,
                command: None,
                started_by: user_id.map(str::to_string),
                started_at: None,
                last_health_check_at: None,
                last_used_at: Utc::now(),
            };
            state.servers.insert(
                project_id.to_string(),
                ServerEntry {
                    instance: instance.clone(),
                    handle: None,
                    last_used: Instant::now(),
                    _permit: permit,
                },
            );
            instance
        };

        info!(
            "Starting dev server for {} on port {}",
            project_id, instance.port
        );
        self.publish_status(project_id, DevServerStatus::Starting, Some(instance.port));
        self.inner
            .logs
            .add(
                project_id,
                LogType::System,
                format!("Starting dev server on port {}", instance.port),
            )
            .await;

        match self.launch_and_wait(project_id, &instance).await {
            Ok(()) => {
                let running = {
                    let mut state = self.state();
                    let entry = state.servers.get_mut(project_id).ok_or_else(|| {
                        DevServerError::NotRunning {
                            project_id: project_id.to_string(),
                        }
                    })?;
                    let now = Utc::now();
                    entry.instance.status = DevServerStatus::Running;
                    entry.instance.started_at = Some(now);
                    entry.instance.last_health_check_at = Some(now);
                    entry.instance.last_used_at = now;
                    entry.last_used = Instant::now();
                    entry.instance.clone()
                };
                self.inner.became_running.notify_waiters();
                info!(
                    "Dev server for {} running at {} (PID: {:?})",
                    project_id, running.url, running.pid
                );
                self.publish_status(project_id, DevServerStatus::Running, Some(running.port));
                self.inner
                    .logs
                    .add(
                        project_id,
                        LogType::System,
                        format!("Dev server running at {}", running.url),
                    )
                    .await;
                Ok(running)
            }
            Err(e) => {
                error!("Dev server for {} failed to start: {}", project_id, e);
                let handle = {
                    let mut state = self.state();
                    state.servers.get_mut(project_id).and_then(|entry| {
                        entry.instance.status = DevServerStatus::Crashed;
                        entry.handle.clone()
                    })
                };
                self.publish_status(project_id, DevServerStatus::Crashed, Some(instance.port));
                if let Some(handle) = handle {
                    if let Err(kill_err) = handle.lock().await.terminate(self.inner.config.stop_grace).await {
                        warn!("Failed to clean up dev server for {}: {}", project_id, kill_err);
                    }
                }
                self.discard(project_id);
                self.inner
                    .logs
                    .add(project_id, LogType::System, format!("Start failed: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    async fn launch_and_wait(
        &self,
        project_id: &str,
        instance: &DevServerInstance,
    ) -> DevServerResult<()> {
        let sandbox = self.inner.sandboxes.get(project_id).await?;
        let launched = self.inner.launcher.launch(&sandbox, instance.port).await?;

        let pid = launched.handle.pid();
        let handle: SharedHandle = Arc::new(tokio::sync::Mutex::new(launched.handle));
        {
            let mut state = self.state();
            if let Some(entry) = state.servers.get_mut(project_id) {
                entry.instance.pid = pid;
                entry.instance.command = Some(launched.command.clone());
                entry.handle = Some(handle.clone());
            }
        }
        if let Some(output) = launched.output {
            self.spawn_log_pump(project_id, output);
        }

        self.wait_until_healthy(project_id, &instance.url, &handle)
            .await
    }

    /// Poll the health endpoint with exponential backoff until it answers.
    async fn wait_until_healthy(
        &self,
        project_id: &str,
        url: &str,
        handle: &SharedHandle,
    ) -> DevServerResult<()> {
        let config = &self.inner.config;
        let health_url = self.health_url(url);
        let retries = config.health_retries.max(1);
        let mut attempts = 0u32;

        let poll = async {
            let mut delay = config.health_backoff;
            while attempts < retries {
                attempts += 1;
                if handle.lock().await.has_exited().await {
                    return Err("process exited during startup".to_string());
                }
                if self.inner.probe.check(&health_url).await {
                    debug!(
                        "Dev server for {} healthy after {} probes",
                        project_id, attempts
                    );
                    return Ok(());
                }
                if attempts < retries {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(config.health_backoff_max);
                }
            }
            Err(format!("no healthy response from {}", health_url))
        };

        let outcome = tokio::time::timeout(config.health_timeout, poll).await;
        let reason = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(reason)) => reason,
            Err(_) => format!("timed out after {:?}", config.health_timeout),
        };
        Err(DevServerError::HealthCheckFailed {
            project_id: project_id.to_string(),
            attempts,
            reason,
        })
    }

    fn spawn_log_pump(&self, project_id: &str, mut output: mpsc::UnboundedReceiver<OutputLine>) {
        let manager = self.clone();
        let project_id = project_id.to_string();
        tokio::spawn(async move {
            while let Some(line) = output.recv().await {
                let log_type = match line.stream {
                    OutputStream::Stdout => LogType::Stdout,
                    OutputStream::Stderr => LogType::Stderr,
                };
                if let Some(events) = &manager.inner.events {
                    events.publish(
                        &project_id,
                        EventKind::TerminalOutput,
                        json!({ "source": "devServer", "stream": line.stream, "line": &line.line }),
                    );
                }
                manager.inner.logs.add(&project_id, log_type, line.line).await;
            }
        });
    }

    /// Take an admission slot, evicting the least recently used server if at the cap.
    ///
    /// When every slot belongs to a server that is still starting, waits until
    /// a slot frees up or one of those servers becomes running and evictable.
    async fn admit(&self, project_id: &str) -> DevServerResult<OwnedSemaphorePermit> {
        loop {
            let became_running = self.inner.became_running.notified();

            if let Ok(permit) = self.inner.admission.clone().try_acquire_owned() {
                return Ok(permit);
            }

            if let Some(victim) = self.least_recently_used(project_id) {
                info!(
                    "Running server cap reached, evicting least recently used project {}",
                    victim
                );
                self.inner
                    .logs
                    .add(
                        &victim,
                        LogType::System,
                        "Stopped to make room for another project",
                    )
                    .await;
                if let Err(e) = self.stop_server(&victim).await {
                    warn!("Failed to evict dev server for {}: {}", victim, e);
                }
                continue;
            }

            debug!("Server cap reached, {} queued for admission", project_id);
            tokio::select! {
                permit = self.inner.admission.clone().acquire_owned() => {
                    return permit.map_err(|e| DevServerError::LaunchFailed {
                        project_id: project_id.to_string(),
                        reason: e.to_string(),
                    });
                }
                _ = became_running => {}
            }
        }
    }

    fn least_recently_used(&self, exclude: &str) -> Option<String> {
        self.state()
            .servers
            .iter()
            .filter(|(id, entry)| {
                id.as_str() != exclude && entry.instance.status == DevServerStatus::Running
            })
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(id, _)| id.clone())
    }

    /// Remove a project's entry and free its port and admission slot.
    fn discard(&self, project_id: &str) -> Option<DevServerInstance> {
        let mut state = self.state();
        state.ports.release(project_id);
        state
            .servers
            .remove(project_id)
            .map(|entry| entry.instance)
    }

    /// Stop a project's dev server. Stopping a project with no server succeeds.
    pub async fn stop(&self, project_id: &str) -> StopResponse {
        match self.stop_server(project_id).await {
            Ok(()) => StopResponse::stopped(),
            Err(e) => {
                warn!("Failed to stop dev server for {}: {}", project_id, e);
                StopResponse::failed(e)
            }
        }
    }

    pub async fn stop_server(&self, project_id: &str) -> DevServerResult<()> {
        validate_project_id(project_id)?;
        let lock = self.project_lock(project_id);
        let _guard = lock.lock().await;
        self.stop_locked(project_id).await
    }

    async fn stop_locked(&self, project_id: &str) -> DevServerResult<()> {
        let (handle, port) = {
            let mut state = self.state();
            state.restarts.remove(project_id);
            match state.servers.get_mut(project_id) {
                Some(entry) => {
                    entry.instance.status = DevServerStatus::Stopping;
                    (entry.handle.clone(), entry.instance.port)
                }
                None => return Ok(()),
            }
        };

        info!("Stopping dev server for {}", project_id);
        self.publish_status(project_id, DevServerStatus::Stopping, Some(port));

        let result = match handle {
            Some(handle) => handle.lock().await.terminate(self.inner.config.stop_grace).await,
            None => Ok(()),
        };

        self.discard(project_id);
        self.publish_status(project_id, DevServerStatus::Stopped, None);
        self.inner
            .logs
            .add(project_id, LogType::System, "Dev server stopped")
            .await;
        result
    }

    /// Stop every server. Returns the projects that were stopped.
    pub async fn stop_all(&self) -> Vec<String> {
        let project_ids: Vec<String> = self.state().servers.keys().cloned().collect();
        let mut stopped = Vec::new();
        for project_id in project_ids {
            match self.stop_server(&project_id).await {
                Ok(()) => stopped.push(project_id),
                Err(e) => warn!("Failed to stop dev server for {}: {}", project_id, e),
            }
        }
        stopped
    }

    pub fn get_server_status(&self, project_id: &str) -> Option<DevServerInstance> {
        self.state()
            .servers
            .get(project_id)
            .map(|entry| entry.instance.clone())
    }

    pub fn list_servers(&self) -> Vec<DevServerInstance> {
        let mut servers: Vec<DevServerInstance> = self
            .state()
            .servers
            .values()
            .map(|entry| entry.instance.clone())
            .collect();
        servers.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        servers
    }

    /// Current port → project assignments
    pub fn port_assignments(&self) -> Vec<(u16, String)> {
        self.state()
            .ports
            .allocated()
            .iter()
            .map(|(port, owner)| (*port, owner.clone()))
            .collect()
    }

    /// Mark a running server as used, resetting its idle clock.
    pub fn record_activity(&self, project_id: &str) -> DevServerResult<()> {
        let mut state = self.state();
        match state.servers.get_mut(project_id) {
            Some(entry) if entry.instance.status == DevServerStatus::Running => {
                entry.last_used = Instant::now();
                entry.instance.last_used_at = Utc::now();
                Ok(())
            }
            _ => Err(DevServerError::NotRunning {
                project_id: project_id.to_string(),
            }),
        }
    }

    /// Reason a project is barred from starting, if it exhausted its restart budget
    pub fn fatal_status(&self, project_id: &str) -> Option<String> {
        self.state().fatal.get(project_id).cloned()
    }

    /// Clear a fatal status so the project may start again.
    pub fn reset_fatal(&self, project_id: &str) -> bool {
        let mut state = self.state();
        state.restarts.remove(project_id);
        state.fatal.remove(project_id).is_some()
    }

    pub async fn get_server_logs(
        &self,
        project_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Vec<DevServerLog> {
        self.inner.logs.get(project_id, since, limit).await
    }

    pub async fn clear_server_logs(&self, project_id: &str) {
        self.inner.logs.clear(project_id).await;
        info!("Cleared logs for project: {}", project_id);
    }

    pub(crate) fn running_servers(&self) -> Vec<RunningServer> {
        self.state()
            .servers
            .iter()
            .filter(|(_, entry)| entry.instance.status == DevServerStatus::Running)
            .map(|(id, entry)| RunningServer {
                project_id: id.clone(),
                instance_id: entry.instance.id,
                url: entry.instance.url.clone(),
                handle: entry.handle.clone(),
                last_used: entry.last_used,
            })
            .collect()
    }

    pub(crate) fn probe(&self) -> &Arc<dyn HealthProbe> {
        &self.inner.probe
    }

    pub(crate) fn mark_healthy(&self, project_id: &str, instance_id: Uuid) {
        let mut state = self.state();
        if let Some(entry) = state.servers.get_mut(project_id) {
            if entry.instance.id == instance_id {
                entry.instance.last_health_check_at = Some(Utc::now());
            }
        }
    }

    /// Clean up a crashed instance and restart it while the budget allows.
    ///
    /// Returns `Ok(true)` when a restart brought the server back.
    pub(crate) async fn recover_crashed(
        &self,
        project_id: &str,
        instance_id: Uuid,
    ) -> DevServerResult<bool> {
        let lock = self.project_lock(project_id);
        let _guard = lock.lock().await;

        let (handle, port, started_by) = {
            let mut state = self.state();
            match state.servers.get_mut(project_id) {
                Some(entry)
                    if entry.instance.id == instance_id
                        && entry.instance.status == DevServerStatus::Running =>
                {
                    entry.instance.status = DevServerStatus::Crashed;
                    (
                        entry.handle.clone(),
                        entry.instance.port,
                        entry.instance.started_by.clone(),
                    )
                }
                // Stopped or replaced since the probe
                _ => return Ok(false),
            }
        };

        warn!("Dev server for {} crashed", project_id);
        self.publish_status(project_id, DevServerStatus::Crashed, Some(port));
        self.inner
            .logs
            .add(project_id, LogType::System, "Dev server crashed")
            .await;

        if let Some(handle) = handle {
            if let Err(e) = handle.lock().await.terminate(self.inner.config.stop_grace).await {
                warn!("Failed to reap crashed dev server for {}: {}", project_id, e);
            }
        }
        self.discard(project_id);
        self.publish_status(project_id, DevServerStatus::Stopped, None);

        let budget = self.inner.config.restart_budget;
        let restarts = {
            let mut state = self.state();
            let count = state.restarts.entry(project_id.to_string()).or_insert(0);
            *count += 1;
            let restarts = *count;
            if restarts > budget {
                state.fatal.insert(
                    project_id.to_string(),
                    format!("crashed {} times, restart budget is {}", restarts, budget),
                );
            }
            restarts
        };

        if restarts > budget {
            error!(
                "Dev server for {} exceeded its restart budget ({}), giving up",
                project_id, budget
            );
            return Err(DevServerError::RestartBudgetExceeded {
                project_id: project_id.to_string(),
                restarts,
            });
        }

        info!(
            "Restarting dev server for {} (restart {}/{})",
            project_id, restarts, budget
        );
        self.start_locked(project_id, started_by.as_deref()).await?;
        Ok(true)
    }
}
