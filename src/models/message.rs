use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::proposal::PendingProposal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_out: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub record_ids: Vec<String>,
    pub proposed_action: Option<PendingProposal>,
    /// Per-conversation position, strictly increasing from 1.
    pub seq: i64,
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

/// What a caller hands the store; seq and timestamp are assigned on append.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub record_ids: Vec<String>,
    pub proposed_action: Option<PendingProposal>,
    pub metadata: MessageMetadata,
}

impl NewMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            record_ids: Vec::new(),
            proposed_action: None,
            metadata: MessageMetadata::default(),
        }
    }

    pub fn with_records(mut self, record_ids: Vec<String>) -> Self {
        self.record_ids = record_ids;
        self
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}
