use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a development server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevServerStatus {
    Stopped,
    Starting,
    Running,
    Crashed,
    Stopping,
}

impl DevServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DevServerStatus::Stopped => "stopped",
            DevServerStatus::Starting => "starting",
            DevServerStatus::Running => "running",
            DevServerStatus::Crashed => "crashed",
            DevServerStatus::Stopping => "stopping",
        }
    }

    /// Whether a move from `self` to `next` follows the server lifecycle.
    pub fn can_transition_to(&self, next: DevServerStatus) -> bool {
        use DevServerStatus::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Crashed)
                | (Running, Stopping)
                | (Running, Crashed)
                | (Stopping, Stopped)
                | (Crashed, Stopped)
        )
    }
}

/// Snapshot of a live development server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevServerInstance {
    pub id: Uuid,
    pub project_id: String,
    pub port: u16,
    pub url: String,
    pub pid: Option<u32>,
    pub status: DevServerStatus,
    /// Command the runtime was launched with
    pub command: Option<String>,
    /// User who first requested the server
    pub started_by: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    /// Last command execution or explicit activity against this server
    pub last_used_at: DateTime<Utc>,
}

/// Log entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Stdout,
    Stderr,
    System,
}

/// Development server log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevServerLog {
    pub timestamp: DateTime<Utc>,
    pub log_type: LogType,
    pub message: String,
}

/// Outcome of `start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StartResponse {
    pub fn started(instance: &DevServerInstance) -> Self {
        Self {
            success: true,
            url: Some(instance.url.clone()),
            port: Some(instance.port),
            error: None,
        }
    }

    pub fn failed<E: ToString>(error: E) -> Self {
        Self {
            success: false,
            url: None,
            port: None,
            error: Some(error.to_string()),
        }
    }
}

/// Outcome of `stop`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StopResponse {
    pub fn stopped() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed<E: ToString>(error: E) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Counters from one pass of the health monitor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub healthy: usize,
    pub crashed: Vec<String>,
    pub restarted: Vec<String>,
    pub idle_stopped: Vec<String>,
}
