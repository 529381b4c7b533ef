// ABOUTME: Bounded per-project log capture for dev servers

use crate::types::{DevServerLog, LogType};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Entries kept per project before the oldest are discarded
pub const MAX_LOG_ENTRIES: usize = 1000;

#[derive(Default)]
pub struct LogStore {
    logs: RwLock<HashMap<String, VecDeque<DevServerLog>>>,
}

impl LogStore {
    pub async fn add(&self, project_id: &str, log_type: LogType, message: impl Into<String>) {
        let entry = DevServerLog {
            timestamp: Utc::now(),
            log_type,
            message: message.into(),
        };

        let mut logs = self.logs.write().await;
        let project_logs = logs.entry(project_id.to_string()).or_default();
        project_logs.push_back(entry);
        if project_logs.len() > MAX_LOG_ENTRIES {
            project_logs.pop_front();
        }
    }

    /// Entries newer than `since`, keeping the most recent `limit`.
    pub async fn get(
        &self,
        project_id: &str,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Vec<DevServerLog> {
        let logs = self.logs.read().await;
        let Some(project_logs) = logs.get(project_id) else {
            return Vec::new();
        };

        let filtered: Vec<DevServerLog> = project_logs
            .iter()
            .filter(|log| since.map_or(true, |since| log.timestamp > since))
            .cloned()
            .collect();

        match limit {
            Some(max) if filtered.len() > max => filtered[filtered.len() - max..].to_vec(),
            _ => filtered,
        }
    }

    pub async fn clear(&self, project_id: &str) {
        self.logs.write().await.remove(project_id);
    }
}
