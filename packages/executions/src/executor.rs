// ABOUTME: ActionExecutor - runs validated plans against project sandboxes and dev servers
// ABOUTME: One batch per project at a time, bounded batches overall, retries, rollback and confirmation pauses

use crate::cancel::CancellationHandle;
use crate::error::{ExecutionError, ExecutorResult};
use crate::rollback;
use crate::runtime::RuntimeProvider;
use crate::types::*;
use conduit_actions::risk::is_destructive_command;
use conduit_actions::ExecutionPlan;
use conduit_config::constants::{DEV_SERVER_URL, PORT};
use conduit_config::ExecutorConfig;
use conduit_core::{ActionIntent, ActionStatus, ActionType, ExecutionResult};
use conduit_events::{EventBroadcaster, EventKind};
use conduit_sandbox::{
    CommandOptions, FileSnapshot, OutputStream, ProjectSandbox, SandboxError, SandboxRegistry,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A batch halted at an action awaiting confirmation
struct PausedBatch {
    run: BatchRun,
    paused_at: usize,
}

/// Mutable state of one batch while it is owned by the executor
struct BatchRun {
    batch_id: String,
    project_id: String,
    plan: Arc<ExecutionPlan>,
    states: Vec<ActionState>,
    options: ExecuteOptions,
    rollbacks: Vec<RollbackRecord>,
}

impl BatchRun {
    fn new(project_id: &str, plan: ExecutionPlan, options: ExecuteOptions) -> Self {
        let states = plan.iter().map(|a| ActionState::new(&a.id)).collect();
        Self {
            batch_id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            plan: Arc::new(plan),
            states,
            options,
            rollbacks: Vec::new(),
        }
    }

    /// Skip every still-pending action reachable from `action_id`.
    fn skip_dependents(&mut self, action_id: &str, reason: SkipReason) {
        let dependents: Vec<usize> = self
            .plan
            .transitive_dependents(action_id)
            .into_iter()
            .filter_map(|id| self.plan.position(id))
            .collect();
        for position in dependents {
            let state = &mut self.states[position];
            if state.status == ActionStatus::Pending {
                state.skip(reason, format!("Depends on action {}", action_id));
            }
        }
    }

    fn completed_count(&self) -> usize {
        self.states.iter().filter(|s| s.status.is_terminal()).count()
    }
}

struct Inner {
    config: ExecutorConfig,
    sandboxes: Arc<SandboxRegistry>,
    runtime: Option<Arc<dyn RuntimeProvider>>,
    events: Option<EventBroadcaster>,
    /// Per-project exclusive sections; tokio's mutex queues waiters FIFO
    lanes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    admission: Arc<Semaphore>,
    paused: Mutex<HashMap<String, PausedBatch>>,
}

/// Spawned batch, see [`ActionExecutor::submit`]
pub struct BatchHandle {
    cancel: CancellationHandle,
    join: JoinHandle<ExecutorResult<BatchOutcome>>,
}

impl BatchHandle {
    pub fn cancellation(&self) -> CancellationHandle {
        self.cancel.clone()
    }

    /// Stop before the next action starts
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> ExecutorResult<BatchOutcome> {
        self.join
            .await
            .map_err(|e| ExecutionError::Aborted(e.to_string()))?
    }
}

/// Executes plans. Cloning is cheap and clones share lanes and paused batches.
#[derive(Clone)]
pub struct ActionExecutor {
    inner: Arc<Inner>,
}

impl ActionExecutor {
    pub fn new(
        config: ExecutorConfig,
        sandboxes: Arc<SandboxRegistry>,
        runtime: Option<Arc<dyn RuntimeProvider>>,
        events: Option<EventBroadcaster>,
    ) -> Self {
        let admission = Arc::new(Semaphore::new(config.max_concurrent_batches.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                sandboxes,
                runtime,
                events,
                lanes: Mutex::new(HashMap::new()),
                admission,
                paused: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    fn lane(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut lanes = self
            .inner
            .lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // A lane only the map still references is neither held nor awaited
        lanes.retain(|_, lane| Arc::strong_count(lane) > 1);
        lanes
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn paused(&self) -> MutexGuard<'_, HashMap<String, PausedBatch>> {
        self.inner
            .paused
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, project_id: &str, kind: EventKind, payload: Value) {
        if let Some(events) = &self.inner.events {
            events.publish(project_id, kind, payload);
        }
    }

    /// Execute `plan` for a project and wait for the outcome.
    pub async fn execute(
        &self,
        project_id: &str,
        plan: ExecutionPlan,
        options: ExecuteOptions,
    ) -> ExecutorResult<BatchOutcome> {
        self.execute_with_cancel(project_id, plan, options, &CancellationHandle::new())
            .await
    }

    pub async fn execute_with_cancel(
        &self,
        project_id: &str,
        plan: ExecutionPlan,
        options: ExecuteOptions,
        cancel: &CancellationHandle,
    ) -> ExecutorResult<BatchOutcome> {
        let run = BatchRun::new(project_id, plan, options);
        self.drive(run, 0, cancel).await
    }

    /// Run `plan` in the background, returning a handle that can cancel it.
    pub fn submit(&self, project_id: &str, plan: ExecutionPlan, options: ExecuteOptions) -> BatchHandle {
        let cancel = CancellationHandle::new();
        let executor = self.clone();
        let project_id = project_id.to_string();
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            executor
                .execute_with_cancel(&project_id, plan, options, &task_cancel)
                .await
        });
        BatchHandle { cancel, join }
    }

    /// Continue a paused batch of `project_id` from the action it stopped at.
    ///
    /// If the paused action is not among `approved_action_ids` it is declined:
    /// it and its dependents are skipped and the rest of the batch continues.
    /// A token belonging to another project is rejected and the batch stays paused.
    pub async fn resume<I, S>(
        &self,
        project_id: &str,
        batch_token: &str,
        approved_action_ids: I,
    ) -> ExecutorResult<BatchOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resume_with_cancel(project_id, batch_token, approved_action_ids, &CancellationHandle::new())
            .await
    }

    pub async fn resume_with_cancel<I, S>(
        &self,
        project_id: &str,
        batch_token: &str,
        approved_action_ids: I,
        cancel: &CancellationHandle,
    ) -> ExecutorResult<BatchOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let PausedBatch { mut run, paused_at } = {
            let mut paused = self.paused();
            match paused.get(batch_token) {
                None => return Err(ExecutionError::UnknownBatch(batch_token.to_string())),
                Some(batch) if batch.run.project_id != project_id => {
                    warn!(
                        "Rejected resume of batch {} from project {}; it belongs to {}",
                        batch_token, project_id, batch.run.project_id
                    );
                    return Err(ExecutionError::ForeignBatch {
                        batch_token: batch_token.to_string(),
                        project_id: project_id.to_string(),
                    });
                }
                Some(_) => {}
            }
            paused
                .remove(batch_token)
                .ok_or_else(|| ExecutionError::UnknownBatch(batch_token.to_string()))?
        };

        run.options
            .approved
            .extend(approved_action_ids.into_iter().map(Into::into));

        for state in &mut run.states {
            if state.skip_reason == Some(SkipReason::AwaitingConfirmation) {
                state.transition(ActionStatus::Pending);
                state.skip_reason = None;
                state.result = None;
            }
        }

        let paused_id = run.states[paused_at].action_id.clone();
        if run.options.is_confirmed(&paused_id) {
            info!("Action {} confirmed, resuming batch {}", paused_id, run.batch_id);
            run.states[paused_at].transition(ActionStatus::Pending);
        } else {
            info!("Action {} declined, skipping it and its dependents", paused_id);
            run.states[paused_at].skip(
                SkipReason::ConfirmationDeclined,
                format!("Action {} was not confirmed", paused_id),
            );
            run.skip_dependents(&paused_id, SkipReason::ConfirmationDeclined);
        }

        self.drive(run, paused_at, cancel).await
    }

    /// Tokens of batches waiting for confirmation
    pub fn paused_batches(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.paused().keys().cloned().collect();
        tokens.sort();
        tokens
    }

    /// Drop a paused batch without running the rest of it
    pub fn discard(&self, batch_token: &str) -> bool {
        self.paused().remove(batch_token).is_some()
    }

    async fn drive(
        &self,
        mut run: BatchRun,
        start: usize,
        cancel: &CancellationHandle,
    ) -> ExecutorResult<BatchOutcome> {
        let lane = self.lane(&run.project_id);
        let _lane = lane.lock().await;
        let _permit = self
            .inner
            .admission
            .acquire()
            .await
            .map_err(|e| ExecutionError::Aborted(e.to_string()))?;

        let sandbox = self
            .inner
            .sandboxes
            .get(&run.project_id)
            .await
            .map_err(|source| ExecutionError::Project {
                project_id: run.project_id.clone(),
                source,
            })?;

        info!(
            "Executing batch {} for project {} ({} actions, starting at {})",
            run.batch_id,
            run.project_id,
            run.plan.len(),
            start
        );
        self.publish(
            &run.project_id,
            EventKind::Status,
            json!({ "batchId": &run.batch_id, "status": "running", "total": run.plan.len() }),
        );

        let plan = run.plan.clone();
        let mut paused_at = None;
        let mut cancelled = false;

        for (position, action) in plan.iter().enumerate().skip(start) {
            if run.states[position].status != ActionStatus::Pending {
                continue;
            }

            if cancel.is_cancelled() {
                info!("Batch {} cancelled before action {}", run.batch_id, action.id);
                cancelled = true;
                for state in run.states[position..].iter_mut() {
                    if state.status == ActionStatus::Pending {
                        state.skip(SkipReason::Cancelled, "Batch was cancelled".to_string());
                    }
                }
                break;
            }

            if action.requires_confirmation && !run.options.is_confirmed(&action.id) {
                info!(
                    "Batch {} paused: action {} ({} risk) needs confirmation",
                    run.batch_id, action.id, action.risk_level
                );
                run.states[position].transition(ActionStatus::AwaitingConfirmation);
                for state in run.states[position + 1..].iter_mut() {
                    if state.status == ActionStatus::Pending {
                        state.skip(
                            SkipReason::AwaitingConfirmation,
                            format!("Batch paused at action {}", action.id),
                        );
                    }
                }
                paused_at = Some(position);
                break;
            }

            self.run_action(&sandbox, &mut run, position, action, cancel).await;

            if run.states[position].status == ActionStatus::Failed {
                run.skip_dependents(&action.id, SkipReason::UpstreamFailed);
            }
            self.publish_progress(&run, action);
        }

        self.roll_back_failures(&sandbox, &mut run).await;
        Ok(self.finish(run, paused_at, cancelled))
    }

    async fn run_action(
        &self,
        sandbox: &ProjectSandbox,
        run: &mut BatchRun,
        position: usize,
        action: &ActionIntent,
        cancel: &CancellationHandle,
    ) {
        let config = &self.inner.config;
        let max_attempts = if is_retry_safe(action) {
            1 + config.command_retries
        } else {
            1
        };

        loop {
            let state = &mut run.states[position];
            state.attempts += 1;
            state.transition(ActionStatus::Executing);
            let attempt = state.attempts;

            debug!(
                "Running action {} ({}) attempt {}/{}",
                action.id, action.action_type, attempt, max_attempts
            );
            self.publish(
                &run.project_id,
                EventKind::ActionStarted,
                json!({
                    "batchId": &run.batch_id,
                    "actionId": &action.id,
                    "type": action.action_type.as_str(),
                    "description": &action.description,
                    "attempt": attempt,
                }),
            );

            let started = Instant::now();
            let mut snapshot = None;
            let outcome = match tokio::time::timeout(
                config.action_timeout,
                self.perform(sandbox, &run.batch_id, action, &mut snapshot),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ExecutionError::Timeout {
                    action_id: action.id.clone(),
                    seconds: config.action_timeout.as_secs(),
                }),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let state = &mut run.states[position];
            if snapshot.is_some() {
                state.snapshot = snapshot;
            }

            match outcome {
                Ok(output) => {
                    state.transition(ActionStatus::Completed);
                    self.publish(
                        &run.project_id,
                        EventKind::ActionCompleted,
                        json!({
                            "batchId": &run.batch_id,
                            "actionId": &action.id,
                            "output": &output,
                            "durationMs": duration_ms,
                        }),
                    );
                    state.result = Some(ExecutionResult::completed(&action.id, output, duration_ms, attempt));
                    return;
                }
                Err(e) => {
                    let will_retry = attempt < max_attempts && e.is_retryable() && !cancel.is_cancelled();
                    state.transition(ActionStatus::Failed);
                    let info = e.to_info();
                    self.publish(
                        &run.project_id,
                        EventKind::ActionFailed,
                        json!({
                            "batchId": &run.batch_id,
                            "actionId": &action.id,
                            "error": &info,
                            "willRetry": will_retry,
                        }),
                    );
                    state.result = Some(ExecutionResult::failed(&action.id, info, duration_ms, attempt));

                    if !will_retry {
                        warn!("Action {} failed after {} attempt(s): {}", action.id, attempt, e);
                        return;
                    }
                    warn!("Action {} failed, retrying: {}", action.id, e);
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(config.retry_delay) => {}
                    }
                }
            }
        }
    }

    async fn perform(
        &self,
        sandbox: &ProjectSandbox,
        batch_id: &str,
        action: &ActionIntent,
        snapshot: &mut Option<FileSnapshot>,
    ) -> ExecutorResult<String> {
        let id = action.id.as_str();
        let sandbox_err = |e: SandboxError| ExecutionError::from_sandbox(id, e);

        match action.action_type {
            ActionType::FileCreate | ActionType::TestCreate => {
                let path = require_path(action)?;
                let content = action.content().unwrap_or_default();
                let written = sandbox.write_file(path, content).await.map_err(sandbox_err)?;
                let change = if written.existed() { "updated" } else { "created" };
                *snapshot = Some(written);
                self.publish_file_change(sandbox, id, path, change);
                Ok(format!("Created {} ({} bytes)", path, content.len()))
            }
            ActionType::FileUpdate | ActionType::Refactor => {
                let path = require_path(action)?;
                let content = action.content().ok_or_else(|| ExecutionError::InvalidAction {
                    action_id: id.to_string(),
                    reason: format!("no new content for {}", path),
                })?;
                if !sandbox.file_exists(path).await.map_err(sandbox_err)? {
                    return Err(ExecutionError::from_sandbox(
                        id,
                        SandboxError::FileNotFound {
                            path: path.to_string(),
                        },
                    ));
                }
                let written = sandbox.write_file(path, content).await.map_err(sandbox_err)?;
                *snapshot = Some(written);
                self.publish_file_change(sandbox, id, path, "updated");
                Ok(format!("Updated {} ({} bytes)", path, content.len()))
            }
            ActionType::FileDelete => {
                let path = require_path(action)?;
                let removed = sandbox.delete_file(path).await.map_err(sandbox_err)?;
                *snapshot = Some(removed);
                self.publish_file_change(sandbox, id, path, "deleted");
                Ok(format!("Deleted {}", path))
            }
            ActionType::CommandExecute => {
                let command = action.command().ok_or_else(|| ExecutionError::InvalidAction {
                    action_id: id.to_string(),
                    reason: "no command".to_string(),
                })?;
                self.run_shell(sandbox, batch_id, action, command).await
            }
            ActionType::Debug => match action.command() {
                Some(command) => self.run_shell(sandbox, batch_id, action, command).await,
                None => {
                    let path = require_path(action)?;
                    sandbox.read_file(path).await.map_err(sandbox_err)
                }
            },
        }
    }

    /// Run a command in the project's runtime context, streaming its output.
    async fn run_shell(
        &self,
        sandbox: &ProjectSandbox,
        batch_id: &str,
        action: &ActionIntent,
        command: &str,
    ) -> ExecutorResult<String> {
        let project_id = sandbox.project_id();
        let mut options = CommandOptions::default().with_timeout(self.inner.config.action_timeout);

        if let Some(runtime) = &self.inner.runtime {
            match runtime.ensure_running(project_id).await {
                Ok(Some(endpoint)) => {
                    options = options
                        .with_env(PORT, endpoint.port.to_string())
                        .with_env(DEV_SERVER_URL, endpoint.url);
                }
                Ok(None) => debug!("Project {} has no dev server; running command directly", project_id),
                Err(e) => {
                    error!("Dev server unavailable for {}: {}", project_id, e);
                    return Err(ExecutionError::runtime_unavailable(&action.id, command, e));
                }
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        options = options.with_output(tx);

        let forwarder = {
            let executor = self.clone();
            let project_id = project_id.to_string();
            let batch_id = batch_id.to_string();
            let action_id = action.id.clone();
            tokio::spawn(async move {
                while let Some(line) = rx.recv().await {
                    let stream = match line.stream {
                        OutputStream::Stdout => "stdout",
                        OutputStream::Stderr => "stderr",
                    };
                    executor.publish(
                        &project_id,
                        EventKind::Output,
                        json!({
                            "batchId": &batch_id,
                            "actionId": &action_id,
                            "stream": stream,
                            "line": line.line,
                        }),
                    );
                }
            })
        };

        let result = sandbox.run_command(command, options).await;
        // Every output event goes out before the action's completion event
        let _ = forwarder.await;
        let output = result.map_err(|e| ExecutionError::from_sandbox(&action.id, e))?;

        if output.success() {
            Ok(output.combined())
        } else {
            Err(ExecutionError::CommandFailed {
                action_id: action.id.clone(),
                command: command.to_string(),
                exit_code: output.exit_code,
                reason: format!(
                    "exited with {}: {}",
                    output
                        .exit_code
                        .map_or("a signal".to_string(), |code| format!("code {}", code)),
                    output.combined().trim()
                ),
                source: None,
            })
        }
    }

    fn publish_file_change(&self, sandbox: &ProjectSandbox, action_id: &str, path: &str, change: &str) {
        self.publish(
            sandbox.project_id(),
            EventKind::FileChanged,
            json!({ "actionId": &action_id, "path": path, "change": change }),
        );
    }

    fn publish_progress(&self, run: &BatchRun, action: &ActionIntent) {
        let status = run
            .plan
            .position(&action.id)
            .map(|i| run.states[i].status)
            .unwrap_or(ActionStatus::Pending);
        self.publish(
            &run.project_id,
            EventKind::Progress,
            json!({
                "batchId": &run.batch_id,
                "actionId": &action.id,
                "status": status.as_str(),
                "completed": run.completed_count(),
                "total": run.plan.len(),
            }),
        );
    }

    /// One rollback invocation per failed action that declares a plan.
    async fn roll_back_failures(&self, sandbox: &ProjectSandbox, run: &mut BatchRun) {
        let plan = run.plan.clone();
        for (position, action) in plan.iter().enumerate() {
            let state = &mut run.states[position];
            if state.status != ActionStatus::Failed || state.rolled_back {
                continue;
            }
            let Some(recipe) = action.rollback_plan.as_deref() else {
                continue;
            };
            state.rolled_back = true;

            let applied = rollback::apply(
                sandbox,
                action,
                recipe,
                state.snapshot.as_ref(),
                self.inner.config.rollback_timeout,
            )
            .await;

            let record = match applied {
                Ok(summary) => {
                    debug!("Rolled back action {}: {}", action.id, summary);
                    state.transition(ActionStatus::RolledBack);
                    RollbackRecord {
                        action_id: action.id.clone(),
                        plan: recipe.to_string(),
                        success: true,
                        error: None,
                    }
                }
                Err(reason) => {
                    error!("Rollback of action {} failed: {}", action.id, reason);
                    RollbackRecord {
                        action_id: action.id.clone(),
                        plan: recipe.to_string(),
                        success: false,
                        error: Some(reason),
                    }
                }
            };
            self.publish(
                &run.project_id,
                EventKind::Progress,
                json!({
                    "batchId": &run.batch_id,
                    "actionId": &action.id,
                    "rollback": &record,
                }),
            );
            run.rollbacks.push(record);
        }
    }

    fn finish(&self, run: BatchRun, paused_at: Option<usize>, cancelled: bool) -> BatchOutcome {
        let results: Vec<ExecutionResult> = run.states.iter().map(ActionState::to_result).collect();
        let executed = run
            .states
            .iter()
            .filter(|s| s.attempts > 0)
            .map(|s| s.action_id.clone())
            .collect();
        let skipped = run
            .states
            .iter()
            .filter(|s| s.status == ActionStatus::Skipped)
            .map(|s| s.action_id.clone())
            .collect();

        let confirmation = paused_at.map(|position| {
            let action = &run.plan.actions()[position];
            ConfirmationRequest {
                batch_token: nanoid::nanoid!(),
                action_id: action.id.clone(),
                description: action.description.clone(),
                risk_level: action.risk_level,
            }
        });

        let status = if confirmation.is_some() {
            "awaitingConfirmation"
        } else if cancelled {
            "cancelled"
        } else {
            "completed"
        };
        self.publish(
            &run.project_id,
            EventKind::Status,
            json!({
                "batchId": &run.batch_id,
                "status": status,
                "confirmation": &confirmation,
            }),
        );

        let outcome = BatchOutcome {
            batch_id: run.batch_id.clone(),
            project_id: run.project_id.clone(),
            results,
            executed,
            skipped,
            rollbacks: run.rollbacks.clone(),
            confirmation: confirmation.clone(),
            cancelled,
        };
        info!(
            "Batch {} for project {} finished: {}",
            outcome.batch_id, outcome.project_id, status
        );

        if let (Some(request), Some(paused_at)) = (confirmation, paused_at) {
            self.paused()
                .insert(request.batch_token, PausedBatch { run, paused_at });
        }
        outcome
    }
}

fn require_path(action: &ActionIntent) -> ExecutorResult<&str> {
    action.path().ok_or_else(|| ExecutionError::InvalidAction {
        action_id: action.id.clone(),
        reason: format!("{} action has no path", action.action_type),
    })
}

/// Only commands that cannot destroy data are retried; file mutations never are.
fn is_retry_safe(action: &ActionIntent) -> bool {
    action.action_type == ActionType::CommandExecute
        && action.command().is_some_and(|c| !is_destructive_command(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_config::SandboxLimits;
    use tempfile::TempDir;

    fn executor(dir: &TempDir) -> ActionExecutor {
        let sandboxes = Arc::new(SandboxRegistry::new(dir.path(), SandboxLimits::default()));
        ActionExecutor::new(ExecutorConfig::default(), sandboxes, None, None)
    }

    fn lane_count(executor: &ActionExecutor) -> usize {
        executor
            .inner
            .lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    #[test]
    fn test_idle_lanes_are_pruned() {
        let dir = TempDir::new().unwrap();
        let executor = executor(&dir);

        for project in ["a", "b", "c"] {
            drop(executor.lane(project));
        }
        assert_eq!(lane_count(&executor), 1);

        let held = executor.lane("busy");
        drop(executor.lane("other"));
        assert_eq!(lane_count(&executor), 2);
        assert!(Arc::ptr_eq(&held, &executor.lane("busy")));
    }
}
