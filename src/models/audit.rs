use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    StatusChange,
    NoteAppend,
    Search,
    Summary,
    Export,
    Filter,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::StatusChange => "status_change",
            ActionType::NoteAppend => "note_append",
            ActionType::Search => "search",
            ActionType::Summary => "summary",
            ActionType::Export => "export",
            ActionType::Filter => "filter",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "status_change" => Some(ActionType::StatusChange),
            "note_append" => Some(ActionType::NoteAppend),
            "search" => Some(ActionType::Search),
            "summary" => Some(ActionType::Summary),
            "export" => Some(ActionType::Export),
            "filter" => Some(ActionType::Filter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Outcome::Success),
            "failure" => Some(Outcome::Failure),
            _ => None,
        }
    }
}

/// Append-only record of a confirmed mutation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionAuditEntry {
    pub id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub action_type: ActionType,
    pub record_ids: Vec<String>,
    pub before_value: Option<String>,
    pub after_value: Option<String>,
    pub outcome: Outcome,
    pub failure_reason: Option<String>,
    pub confirmed_by_user: bool,
    /// Set when the confirmed change was a no-op (`from == to`).
    pub unchanged: bool,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}
