// ABOUTME: Event names and the envelope delivered to subscribers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Named events a project stream can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AiThinking,
    AiResponse,
    ActionStarted,
    ActionCompleted,
    ActionFailed,
    Progress,
    Output,
    Status,
    FileChanged,
    TerminalOutput,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::AiThinking,
        EventKind::AiResponse,
        EventKind::ActionStarted,
        EventKind::ActionCompleted,
        EventKind::ActionFailed,
        EventKind::Progress,
        EventKind::Output,
        EventKind::Status,
        EventKind::FileChanged,
        EventKind::TerminalOutput,
    ];

    /// Wire name as seen by clients
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AiThinking => "ai:thinking",
            EventKind::AiResponse => "ai:response",
            EventKind::ActionStarted => "ai:actionStarted",
            EventKind::ActionCompleted => "ai:actionCompleted",
            EventKind::ActionFailed => "ai:actionFailed",
            EventKind::Progress => "ai:progress",
            EventKind::Output => "ai:output",
            EventKind::Status => "ai:status",
            EventKind::FileChanged => "file:changed",
            EventKind::TerminalOutput => "terminal:output",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        EventKind::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown event name: {}", name)))
    }
}

/// One event on a project stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEvent {
    pub project_id: String,
    /// Monotonic per project, starting at 1
    pub sequence: u64,
    #[serde(rename = "event")]
    pub kind: EventKind,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_name("ai:unknown"), None);
    }

    #[test]
    fn test_event_serializes_wire_name() {
        let event = ProjectEvent {
            project_id: "p1".to_string(),
            sequence: 7,
            kind: EventKind::FileChanged,
            payload: serde_json::json!({ "path": "index.js" }),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "file:changed");
        assert_eq!(json["projectId"], "p1");
        assert_eq!(json["sequence"], 7);
    }
}
