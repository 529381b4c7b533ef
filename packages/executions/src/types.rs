// ABOUTME: Execution batch types: options, per-action state and the aggregated outcome
// ABOUTME: ActionState is owned by the executor for one batch; BatchOutcome is what callers receive

use conduit_core::{ActionStatus, ErrorInfo, ExecutionResult, RiskLevel};
use conduit_sandbox::FileSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Caller options for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOptions {
    /// Run actions that require confirmation without pausing
    pub auto_execute: bool,
    /// Actions already confirmed by the user
    #[serde(default)]
    pub approved: BTreeSet<String>,
}

impl ExecuteOptions {
    pub fn auto() -> Self {
        Self {
            auto_execute: true,
            approved: BTreeSet::new(),
        }
    }

    pub fn confirm_each() -> Self {
        Self::default()
    }

    pub fn approve(mut self, action_id: impl Into<String>) -> Self {
        self.approved.insert(action_id.into());
        self
    }

    pub(crate) fn is_confirmed(&self, action_id: &str) -> bool {
        self.auto_execute || self.approved.contains(action_id)
    }
}

/// Why an action did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UpstreamFailed,
    AwaitingConfirmation,
    ConfirmationDeclined,
    Cancelled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::UpstreamFailed => "upstream_failed",
            SkipReason::AwaitingConfirmation => "awaiting_confirmation",
            SkipReason::ConfirmationDeclined => "confirmation_declined",
            SkipReason::Cancelled => "cancelled",
        }
    }
}

/// Lifecycle of one action within a batch
#[derive(Debug, Clone)]
pub struct ActionState {
    pub action_id: String,
    pub status: ActionStatus,
    pub attempts: u32,
    pub result: Option<ExecutionResult>,
    pub skip_reason: Option<SkipReason>,
    /// What the file looked like before this action touched it
    pub snapshot: Option<FileSnapshot>,
    /// Set once the single rollback invocation has happened
    pub rolled_back: bool,
}

impl ActionState {
    pub fn new(action_id: &str) -> Self {
        Self {
            action_id: action_id.to_string(),
            status: ActionStatus::Pending,
            attempts: 0,
            result: None,
            skip_reason: None,
            snapshot: None,
            rolled_back: false,
        }
    }

    /// Move to `next`; illegal transitions are ignored and reported.
    pub fn transition(&mut self, next: ActionStatus) -> bool {
        if self.status == next {
            return true;
        }
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                "Ignoring illegal transition {} -> {} for action {}",
                self.status,
                next,
                self.action_id
            );
            return false;
        }
        self.status = next;
        true
    }

    pub(crate) fn skip(&mut self, reason: SkipReason, message: String) {
        if self.transition(ActionStatus::Skipped) {
            self.skip_reason = Some(reason);
            self.result = Some(ExecutionResult::not_run(
                &self.action_id,
                ActionStatus::Skipped,
                ErrorInfo::new(reason.as_str(), message).for_action(&self.action_id),
            ));
        }
    }

    /// Final record for the outcome
    pub fn to_result(&self) -> ExecutionResult {
        let mut result = self.result.clone().unwrap_or_else(|| {
            ExecutionResult::not_run(
                &self.action_id,
                self.status,
                ErrorInfo::new("not_run", "Action has not run").for_action(&self.action_id),
            )
        });
        result.status = self.status;
        result.attempts = self.attempts;
        result
    }
}

/// Pending user decision that halted a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    /// Pass back to `ActionExecutor::resume`
    pub batch_token: String,
    pub action_id: String,
    pub description: String,
    pub risk_level: RiskLevel,
}

/// The single rollback invocation made for a failed action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRecord {
    pub action_id: String,
    pub plan: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything a caller needs to render a batch, in plan order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub batch_id: String,
    pub project_id: String,
    pub results: Vec<ExecutionResult>,
    /// Actions that ran, whatever their result
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    pub rollbacks: Vec<RollbackRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ConfirmationRequest>,
    pub cancelled: bool,
}

impl BatchOutcome {
    /// Every action completed
    pub fn success(&self) -> bool {
        self.confirmation.is_none()
            && !self.cancelled
            && self.results.iter().all(|r| r.status == ActionStatus::Completed)
    }

    pub fn requires_confirmation(&self) -> bool {
        self.confirmation.is_some()
    }

    pub fn result(&self, action_id: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.action_id == action_id)
    }

    pub fn status_of(&self, action_id: &str) -> Option<ActionStatus> {
        self.result(action_id).map(|r| r.status)
    }

    pub fn statuses(&self) -> Vec<(String, ActionStatus)> {
        self.results
            .iter()
            .map(|r| (r.action_id.clone(), r.status))
            .collect()
    }

    pub fn failed(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, ActionStatus::Failed | ActionStatus::RolledBack))
    }
}
