use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::proposal::PendingProposal;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub owner_id: String,
    /// Derived once from the first user message.
    pub title: Option<String>,
    pub archived: bool,
    pub context: serde_json::Value,
    pub pending_proposal: Option<PendingProposal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read-side view used by conversation lists. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub message_count: i64,
    pub last_message_preview: Option<String>,
}
