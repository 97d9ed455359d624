use chrono::Utc;

use crate::error::ActionError;
use crate::models::{Conversation, ConversationSummary, Message, NewMessage, Role};
use crate::services::database::Database;

const MAX_CONTENT_CHARS: usize = 4000;
const TITLE_CHARS: usize = 60;

/// Append-only message log per conversation, scoped by owner.
#[derive(Clone)]
pub struct ConversationStore {
    db: Database,
    history_window: u32,
}

impl ConversationStore {
    pub fn new(db: Database, history_window: u32) -> Self {
        Self { db, history_window }
    }

    pub async fn create(
        &self,
        owner_id: &str,
        context: Option<serde_json::Value>,
    ) -> Result<Conversation, ActionError> {
        let now = Utc::now();
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            title: None,
            archived: false,
            context: context.unwrap_or_else(|| serde_json::json!({})),
            pending_proposal: None,
            created_at: now,
            updated_at: now,
        };
        self.db
            .insert_conversation(&conversation)
            .await
            .map_err(ActionError::persistence)?;
        tracing::info!(conversation_id = %conversation.id, "Started conversation");
        Ok(conversation)
    }

    pub async fn get(&self, owner_id: &str, id: &str) -> Result<Conversation, ActionError> {
        self.db
            .get_conversation(owner_id, id)
            .await
            .map_err(ActionError::persistence)?
            .ok_or_else(|| not_found(id))
    }

    /// Sanitizes and appends.
    pub async fn append(
        &self,
        conversation: &Conversation,
        mut message: NewMessage,
    ) -> Result<Message, ActionError> {
        if conversation.archived {
            return Err(ActionError::validation(
                "conversation_id",
                "this conversation is archived and read-only",
            ));
        }
        message.content = sanitize(&message.content);
        self.db
            .append_message(&conversation.id, message)
            .await
            .map_err(ActionError::persistence)
    }

    /// Appends something the user typed. The first one names the conversation;
    /// commands such as confirm or cancel go through `append` and never do.
    pub async fn append_utterance(
        &self,
        conversation: &Conversation,
        content: &str,
    ) -> Result<Message, ActionError> {
        let stored = self
            .append(conversation, NewMessage::new(Role::User, content))
            .await?;
        let title = conversation
            .title
            .is_none()
            .then(|| derive_title(&stored.content))
            .flatten();

        if let Some(title) = title {
            let written = self
                .db
                .set_title_if_unset(&conversation.id, &title)
                .await
                .map_err(ActionError::persistence)?;
            if written {
                tracing::debug!(conversation_id = %conversation.id, %title, "Titled conversation");
            }
        }
        Ok(stored)
    }

    /// The most recent messages, oldest first, for interpreter context.
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<Message>, ActionError> {
        self.db
            .recent_messages(conversation_id, self.history_window)
            .await
            .map_err(ActionError::persistence)
    }

    pub async fn messages(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<(Conversation, Vec<Message>), ActionError> {
        let conversation = self.get(owner_id, id).await?;
        let messages = self
            .db
            .list_messages(&conversation.id)
            .await
            .map_err(ActionError::persistence)?;
        Ok((conversation, messages))
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<ConversationSummary>, ActionError> {
        self.db
            .list_conversations(owner_id)
            .await
            .map_err(ActionError::persistence)
    }

    pub async fn archive(&self, owner_id: &str, id: &str) -> Result<(), ActionError> {
        let archived = self
            .db
            .archive_conversation(owner_id, id)
            .await
            .map_err(ActionError::persistence)?;
        if !archived {
            return Err(not_found(id));
        }
        tracing::info!(conversation_id = %id, "Archived conversation");
        Ok(())
    }
}

fn not_found(id: &str) -> ActionError {
    ActionError::validation("conversation_id", format!("no conversation {}", id))
}

/// Strips control characters (newlines and tabs survive), trims, and caps length.
pub fn sanitize(content: &str) -> String {
    let cleaned: String = content
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    cleaned.trim().chars().take(MAX_CONTENT_CHARS).collect()
}

/// Title from the first line: up to 60 characters, otherwise 57 plus "...".
pub fn derive_title(content: &str) -> Option<String> {
    let first_line = content.lines().map(str::trim).find(|l| !l.is_empty())?;
    if first_line.chars().count() > TITLE_CHARS {
        let head: String = first_line.chars().take(TITLE_CHARS - 3).collect();
        Some(format!("{}...", head.trim_end()))
    } else {
        Some(first_line.to_string())
    }
}
