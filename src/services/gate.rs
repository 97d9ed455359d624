//! Holds at most one unconfirmed change per conversation.
//!
//! The slot lives on the conversation row and only this module writes it.
//! Expiry is lazy: a stale proposal is cleared the next time the slot is
//! looked at.

use chrono::{Duration, Utc};

use crate::error::ActionError;
use crate::functions::render::render_proposal;
use crate::models::{Conversation, PendingProposal, ProposalChange, ProposedAction, RequestedChange};
use crate::records::GuardedStore;
use crate::services::database::Database;
use crate::services::executor::{ExecutionReport, MutationExecutor};
use crate::transitions::check_transition;

#[derive(Debug, Clone)]
pub struct Proposed {
    pub proposal: PendingProposal,
    /// Confirmation prompt naming the record and the before → after change.
    pub prompt: String,
    /// The proposal this one displaced, if any.
    pub replaced: Option<PendingProposal>,
}

#[derive(Clone)]
pub struct ConfirmationGate {
    db: Database,
    records: GuardedStore,
    executor: MutationExecutor,
    ttl: Duration,
}

impl ConfirmationGate {
    pub fn new(db: Database, records: GuardedStore, executor: MutationExecutor, ttl: Duration) -> Self {
        Self {
            db,
            records,
            executor,
            ttl,
        }
    }

    /// Validates `action` against the current record and stores it as the
    /// conversation's proposal, replacing any earlier one. Nothing is stored
    /// when validation fails.
    pub async fn propose(
        &self,
        owner_id: &str,
        conversation_id: &str,
        action: &ProposedAction,
        message_id: &str,
    ) -> Result<Proposed, ActionError> {
        let proposed = self.prepare(owner_id, conversation_id, action, message_id).await?;
        self.hold(&proposed).await?;
        Ok(proposed)
    }

    /// Validates `action` and builds the proposal and its prompt without
    /// storing anything. `hold` makes it confirmable.
    pub async fn prepare(
        &self,
        owner_id: &str,
        conversation_id: &str,
        action: &ProposedAction,
        message_id: &str,
    ) -> Result<Proposed, ActionError> {
        let conversation = self.writable_conversation(owner_id, conversation_id).await?;
        let previous = self.live_slot(&conversation).await?;

        let record = self
            .records
            .read(owner_id, &action.record_id)
            .await?
            .ok_or_else(|| {
                ActionError::validation("record_id", format!("{} was not found", action.record_id))
            })?;

        let change = match &action.change {
            RequestedChange::StatusChange { to } => {
                check_transition(record.status, *to).map_err(|rejected| {
                    ActionError::InvalidTransition {
                        record_id: record.id.clone(),
                        from: rejected.from,
                        to: rejected.to,
                        allowed: rejected.allowed,
                    }
                })?;
                ProposalChange::StatusChange {
                    from: record.status,
                    to: *to,
                }
            }
            RequestedChange::NoteAppend { note } => ProposalChange::NoteAppend {
                from_count: record.notes.len(),
                note: note.clone(),
            },
        };

        let now = Utc::now();
        let proposal = PendingProposal {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation.id.clone(),
            message_id: message_id.to_string(),
            record_id: record.id.clone(),
            change,
            created_at: now,
            expires_at: now + self.ttl,
        };

        Ok(Proposed {
            prompt: render_proposal(&proposal),
            proposal,
            replaced: previous,
        })
    }

    /// Stores a prepared proposal in the conversation's slot.
    pub async fn hold(&self, proposed: &Proposed) -> Result<(), ActionError> {
        let proposal = &proposed.proposal;
        self.db
            .set_pending_proposal(&proposal.conversation_id, Some(proposal))
            .await
            .map_err(ActionError::persistence)?;

        if let Some(old) = &proposed.replaced {
            tracing::info!(conversation_id = %proposal.conversation_id, replaced = %old.id, "Replaced pending proposal");
        }
        tracing::info!(
            conversation_id = %proposal.conversation_id,
            record_id = %proposal.record_id,
            action = proposal.action_type().as_str(),
            "Proposed change"
        );
        Ok(())
    }

    /// Executes the outstanding proposal if `message_id` refers to it. The slot
    /// is cleared before execution, so a proposal runs at most once whatever
    /// the outcome. If it cannot be cleared nothing is executed.
    pub async fn confirm(
        &self,
        owner_id: &str,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<ExecutionReport, ActionError> {
        let conversation = self.writable_conversation(owner_id, conversation_id).await?;
        let Some(proposal) = self.live_slot(&conversation).await? else {
            tracing::info!(conversation_id, "Confirmation with no pending proposal");
            return Err(ActionError::StaleProposal);
        };
        if proposal.message_id != message_id {
            tracing::info!(conversation_id, expected = %proposal.message_id, got = message_id, "Confirmation does not match pending proposal");
            return Err(ActionError::StaleProposal);
        }

        if let Err(e) = self.db.set_pending_proposal(&conversation.id, None).await {
            tracing::error!(conversation_id, proposal_id = %proposal.id, "Failed to clear proposal: {:#}", e);
            return Err(ActionError::persistence(e));
        }
        self.executor.execute(owner_id, &proposal).await
    }

    /// Discards the outstanding proposal. Returns it, or `None` if there was none.
    pub async fn cancel(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Option<PendingProposal>, ActionError> {
        let conversation = self.conversation(owner_id, conversation_id).await?;
        let Some(proposal) = conversation.pending_proposal else {
            return Ok(None);
        };
        self.db
            .set_pending_proposal(&conversation.id, None)
            .await
            .map_err(ActionError::persistence)?;
        tracing::info!(conversation_id, proposal_id = %proposal.id, "Cancelled pending proposal");
        Ok(Some(proposal).filter(|p| !p.is_expired(Utc::now())))
    }

    /// The outstanding, unexpired proposal, if any.
    pub async fn pending(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Option<PendingProposal>, ActionError> {
        let conversation = self.conversation(owner_id, conversation_id).await?;
        self.live_slot(&conversation).await
    }

    async fn conversation(&self, owner_id: &str, id: &str) -> Result<Conversation, ActionError> {
        self.db
            .get_conversation(owner_id, id)
            .await
            .map_err(ActionError::persistence)?
            .ok_or_else(|| ActionError::validation("conversation_id", format!("no conversation {}", id)))
    }

    async fn writable_conversation(&self, owner_id: &str, id: &str) -> Result<Conversation, ActionError> {
        let conversation = self.conversation(owner_id, id).await?;
        if conversation.archived {
            return Err(ActionError::validation(
                "conversation_id",
                "this conversation is archived and read-only",
            ));
        }
        Ok(conversation)
    }

    /// Reads the slot, clearing it first if it has expired.
    async fn live_slot(&self, conversation: &Conversation) -> Result<Option<PendingProposal>, ActionError> {
        match &conversation.pending_proposal {
            Some(p) if p.is_expired(Utc::now()) => {
                self.db
                    .set_pending_proposal(&conversation.id, None)
                    .await
                    .map_err(ActionError::persistence)?;
                tracing::info!(conversation_id = %conversation.id, proposal_id = %p.id, "Pending proposal expired");
                Ok(None)
            }
            other => Ok(other.clone()),
        }
    }
}
