// ABOUTME: Action data model shared by extraction, validation and execution
// ABOUTME: ActionIntent is immutable once built; lifecycle is tracked by ActionStatus elsewhere

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Kind of operation an action performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    FileCreate,
    FileUpdate,
    FileDelete,
    CommandExecute,
    Refactor,
    TestCreate,
    Debug,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::FileCreate => "file_create",
            ActionType::FileUpdate => "file_update",
            ActionType::FileDelete => "file_delete",
            ActionType::CommandExecute => "command_execute",
            ActionType::Refactor => "refactor",
            ActionType::TestCreate => "test_create",
            ActionType::Debug => "debug",
        }
    }

    /// Actions that write to or remove from the project filesystem.
    pub fn mutates_files(&self) -> bool {
        matches!(
            self,
            ActionType::FileCreate
                | ActionType::FileUpdate
                | ActionType::FileDelete
                | ActionType::Refactor
                | ActionType::TestCreate
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "file_create" | "create_file" | "create" => Ok(ActionType::FileCreate),
            "file_update" | "update_file" | "update" | "edit" => Ok(ActionType::FileUpdate),
            "file_delete" | "delete_file" | "delete" => Ok(ActionType::FileDelete),
            "command_execute" | "command" | "run" | "shell" => Ok(ActionType::CommandExecute),
            "refactor" => Ok(ActionType::Refactor),
            "test_create" | "create_test" | "test" => Ok(ActionType::TestCreate),
            "debug" => Ok(ActionType::Debug),
            other => Err(format!("unknown action type: {}", other)),
        }
    }
}

/// Coarse risk classification. Ordered so that `Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed description of one requested operation derived from model output.
///
/// Parameters use a `BTreeMap` so two extractions of the same text compare and
/// serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionIntent {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub description: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub requires_confirmation: bool,
    pub risk_level: RiskLevel,
    pub dependencies: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_plan: Option<String>,
    /// Extraction confidence in `0.0..=1.0`
    pub confidence: f32,
}

impl ActionIntent {
    pub fn new(id: impl Into<String>, action_type: ActionType, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action_type,
            description: description.into(),
            parameters: BTreeMap::new(),
            requires_confirmation: false,
            risk_level: RiskLevel::Low,
            dependencies: BTreeSet::new(),
            rollback_plan: None,
            confidence: 1.0,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = risk;
        self
    }

    pub fn with_confirmation(mut self, required: bool) -> Self {
        self.requires_confirmation = required;
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    pub fn with_rollback(mut self, plan: impl Into<String>) -> Self {
        self.rollback_plan = Some(plan.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// String-valued parameter lookup.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    /// Target file path, if the action has one.
    pub fn path(&self) -> Option<&str> {
        self.param_str("path").filter(|p| !p.trim().is_empty())
    }

    /// Shell command, if the action has one.
    pub fn command(&self) -> Option<&str> {
        self.param_str("command").filter(|c| !c.trim().is_empty())
    }

    /// File content, if the action carries one.
    pub fn content(&self) -> Option<&str> {
        self.param_str("content")
    }
}

/// Lifecycle of one action inside an execution batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionStatus {
    Pending,
    AwaitingConfirmation,
    Executing,
    Completed,
    Failed,
    RolledBack,
    Skipped,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::AwaitingConfirmation => "awaitingConfirmation",
            ActionStatus::Executing => "executing",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::RolledBack => "rolledBack",
            ActionStatus::Skipped => "skipped",
        }
    }

    /// Whether a transition from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        use ActionStatus::*;
        matches!(
            (self, next),
            (Pending, AwaitingConfirmation)
                | (Pending, Executing)
                | (Pending, Skipped)
                | (AwaitingConfirmation, Executing)
                | (AwaitingConfirmation, Skipped)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Failed, Executing)
                | (Failed, RolledBack)
                // A paused or cancelled action becomes runnable again on resume
                | (Skipped, Pending)
                | (AwaitingConfirmation, Pending)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Completed
                | ActionStatus::Failed
                | ActionStatus::RolledBack
                | ActionStatus::Skipped
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert_eq!(RiskLevel::Low.max(RiskLevel::Medium), RiskLevel::Medium);
    }

    #[test]
    fn test_action_type_parsing_accepts_aliases() {
        assert_eq!("file-create".parse::<ActionType>(), Ok(ActionType::FileCreate));
        assert_eq!("RUN".parse::<ActionType>(), Ok(ActionType::CommandExecute));
        assert!("teleport".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_intent_serializes_with_wire_names() {
        let intent = ActionIntent::new("a1", ActionType::FileCreate, "Create index")
            .with_param("path", "index.js")
            .with_risk(RiskLevel::High);
        let json = serde_json::to_value(&intent).unwrap();

        assert_eq!(json["type"], "file_create");
        assert_eq!(json["riskLevel"], "high");
        assert_eq!(json["requiresConfirmation"], false);
        assert!(json.get("rollbackPlan").is_none());
    }

    #[test]
    fn test_blank_path_is_treated_as_missing() {
        let intent = ActionIntent::new("a1", ActionType::FileDelete, "Delete").with_param("path", "  ");
        assert_eq!(intent.path(), None);
    }

    #[test]
    fn test_status_transitions() {
        assert!(ActionStatus::Pending.can_transition_to(ActionStatus::Executing));
        assert!(ActionStatus::Failed.can_transition_to(ActionStatus::RolledBack));
        assert!(!ActionStatus::Completed.can_transition_to(ActionStatus::Executing));
        assert!(!ActionStatus::Skipped.can_transition_to(ActionStatus::Completed));
    }
}
