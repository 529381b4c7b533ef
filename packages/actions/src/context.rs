// ABOUTME: ConversationContext - explicit per-request state threaded through extraction and validation

use conduit_core::RiskLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    pub project_id: String,
    /// Sandbox-relative paths known to exist in the project
    pub known_files: BTreeSet<String>,
    /// Actions at or above this risk wait for confirmation
    pub confirm_threshold: RiskLevel,
}

impl ConversationContext {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            known_files: BTreeSet::new(),
            confirm_threshold: RiskLevel::Medium,
        }
    }

    pub fn with_known_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn with_confirm_threshold(mut self, threshold: RiskLevel) -> Self {
        self.confirm_threshold = threshold;
        self
    }

    pub fn knows_file(&self, path: &str) -> bool {
        self.known_files
            .contains(path.trim_start_matches("./"))
    }
}
