use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::audit::ActionType;
use super::invoice::InvoiceStatus;

/// A write requested by an intent, before the record has been looked at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub record_id: String,
    pub change: RequestedChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestedChange {
    StatusChange { to: InvoiceStatus },
    NoteAppend { note: String },
}

/// The change as the user saw it, with the baseline it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProposalChange {
    StatusChange {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },
    NoteAppend {
        /// Number of notes on the record when the proposal was made.
        from_count: usize,
        note: String,
    },
}

/// The single unconfirmed mutation a conversation may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingProposal {
    pub id: String,
    pub conversation_id: String,
    /// Assistant message that showed the confirmation prompt.
    pub message_id: String,
    pub record_id: String,
    pub change: ProposalChange,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingProposal {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn action_type(&self) -> ActionType {
        match self.change {
            ProposalChange::StatusChange { .. } => ActionType::StatusChange,
            ProposalChange::NoteAppend { .. } => ActionType::NoteAppend,
        }
    }

    pub fn from_value(&self) -> String {
        match &self.change {
            ProposalChange::StatusChange { from, .. } => from.to_string(),
            ProposalChange::NoteAppend { from_count, .. } => format!("{} note(s)", from_count),
        }
    }

    pub fn to_value(&self) -> String {
        match &self.change {
            ProposalChange::StatusChange { to, .. } => to.to_string(),
            ProposalChange::NoteAppend { note, .. } => note.clone(),
        }
    }
}
