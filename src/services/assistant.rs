//! Turn orchestration: the surface a UI or CLI talks to.
//!
//! Every operation on a conversation runs under that conversation's lock, so
//! message appends and proposal changes for one conversation never interleave.
//! Distinct conversations proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::ActionError;
use crate::functions::params::normalize_record_id;
use crate::functions::render::{render_execution, render_read};
use crate::functions::{Dispatched, Dispatcher};
use crate::interpreter::{DashboardContext, Intent, Interpretation, Interpreter, InterpreterSource};
use crate::models::{
    ActionAuditEntry, Conversation, ConversationSummary, Message, MessageMetadata, NewMessage,
    PendingProposal, Role,
};
use crate::records::{GuardedStore, RecordStore};
use crate::services::conversation::{sanitize, ConversationStore};
use crate::services::database::Database;
use crate::services::executor::{AuditSink, ExecutionReport, MutationExecutor};
use crate::services::gate::ConfirmationGate;
use crate::services::settings::AppSettings;

/// Result of one user turn. Expected failures (validation, invalid
/// transition, stale proposal and so on) are explained in `reply` and carried
/// in `error`; only failures to record the turn at all are returned as `Err`.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub user_message: Message,
    pub reply: Message,
    pub intent: Option<&'static str>,
    /// Set when this turn left a proposal awaiting confirmation.
    pub proposal: Option<PendingProposal>,
    pub execution: Option<ExecutionReport>,
    pub error: Option<ActionError>,
}

pub struct Assistant {
    db: Database,
    conversations: ConversationStore,
    interpreter: Arc<dyn Interpreter>,
    dispatcher: Dispatcher,
    gate: ConfirmationGate,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Assistant {
    pub fn new(
        db: Database,
        records: Arc<dyn RecordStore>,
        interpreter: Arc<dyn Interpreter>,
        settings: &AppSettings,
    ) -> Self {
        let audit: Arc<dyn AuditSink> = Arc::new(db.clone());
        Self::with_audit_sink(db, records, interpreter, audit, settings)
    }

    pub fn with_audit_sink(
        db: Database,
        records: Arc<dyn RecordStore>,
        interpreter: Arc<dyn Interpreter>,
        audit: Arc<dyn AuditSink>,
        settings: &AppSettings,
    ) -> Self {
        let records = GuardedStore::new(records, settings.storage_timeout());
        let executor = MutationExecutor::new(records.clone(), audit);
        let gate = ConfirmationGate::new(db.clone(), records.clone(), executor, settings.proposal_ttl());
        Self {
            conversations: ConversationStore::new(db.clone(), settings.history_window),
            dispatcher: Dispatcher::new(records),
            interpreter,
            gate,
            db,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start_conversation(
        &self,
        owner_id: &str,
        context: Option<serde_json::Value>,
    ) -> Result<Conversation, ActionError> {
        self.conversations.create(owner_id, context).await
    }

    /// Handles one utterance. Any proposal left from an earlier turn is
    /// abandoned first.
    pub async fn send(
        &self,
        owner_id: &str,
        conversation_id: &str,
        utterance: &str,
        dashboard: Option<&DashboardContext>,
    ) -> Result<TurnOutcome, ActionError> {
        let lock = self.lock_for(conversation_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.send_locked(owner_id, conversation_id, utterance, dashboard).await
        };
        self.release(conversation_id, lock).await;
        result
    }

    async fn send_locked(
        &self,
        owner_id: &str,
        conversation_id: &str,
        utterance: &str,
        dashboard: Option<&DashboardContext>,
    ) -> Result<TurnOutcome, ActionError> {
        if sanitize(utterance).is_empty() {
            return Err(ActionError::validation("utterance", "message is empty"));
        }
        let conversation = self.conversations.get(owner_id, conversation_id).await?;
        if conversation.archived {
            return Err(ActionError::validation(
                "conversation_id",
                "this conversation is archived and read-only",
            ));
        }
        if let Some(abandoned) = self.gate.cancel(owner_id, conversation_id).await? {
            tracing::info!(conversation_id, proposal_id = %abandoned.id, "Abandoned pending proposal for new utterance");
        }

        let history = self.conversations.history(conversation_id).await?;
        let user_message = self
            .conversations
            .append_utterance(&conversation, utterance)
            .await?;

        let interpretation = match self
            .interpreter
            .interpret(&user_message.content, &history, dashboard)
            .await
        {
            Ok(result) => result,
            Err(e) => Interpretation::new(
                Intent::unrecognized(e.user_message()),
                0.0,
                InterpreterSource::Deterministic,
            ),
        };
        let intent_name = interpretation.intent.name();
        let metadata = metadata_for(&interpretation);

        let mut reply = NewMessage::new(Role::Assistant, "").with_metadata(metadata);
        let mut proposal = None;
        let mut error = None;

        match interpretation.intent {
            Intent::Unrecognized { reason } => {
                reply.content = reason.clone();
                error = Some(ActionError::Unrecognized(reason));
            }
            intent => {
                // Every recognized intent maps onto a catalog call.
                let Some(call) = intent.into_call() else {
                    return Err(ActionError::Unrecognized(intent_name.to_string()));
                };
                match self.dispatcher.dispatch(owner_id, call).await {
                    Ok(Dispatched::Read(output)) => {
                        reply.content = render_read(&output);
                        reply.record_ids = output.record_ids();
                    }
                    Ok(Dispatched::Proposal(action)) => {
                        match self.gate.prepare(owner_id, conversation_id, &action, &reply.id).await {
                            Ok(proposed) => {
                                reply.content = proposed.prompt.clone();
                                reply.record_ids = vec![proposed.proposal.record_id.clone()];
                                reply.proposed_action = Some(proposed.proposal.clone());
                                proposal = Some(proposed);
                            }
                            Err(e) => {
                                reply.record_ids = vec![action.record_id.clone()];
                                reply.content = e.user_message();
                                error = Some(e);
                            }
                        }
                    }
                    Err(e) => {
                        reply.content = e.user_message();
                        error = Some(e);
                    }
                }
            }
        }

        // The prompt is saved before the proposal becomes confirmable, so a
        // live proposal always points at a stored message.
        let reply = self.conversations.append(&conversation, reply).await?;
        if let Some(proposed) = &proposal {
            self.gate.hold(proposed).await?;
        }
        tracing::info!(
            conversation_id,
            intent = intent_name,
            source = interpretation.source.as_str(),
            outcome = error.as_ref().map(|e| e.kind()).unwrap_or("ok"),
            "Turn complete"
        );

        Ok(TurnOutcome {
            conversation_id: conversation_id.to_string(),
            user_message,
            reply,
            intent: Some(intent_name),
            proposal: proposal.map(|p| p.proposal),
            execution: None,
            error,
        })
    }

    /// Confirms the proposal shown by message `message_id`.
    pub async fn confirm(
        &self,
        owner_id: &str,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<TurnOutcome, ActionError> {
        let lock = self.lock_for(conversation_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.confirm_locked(owner_id, conversation_id, message_id).await
        };
        self.release(conversation_id, lock).await;
        result
    }

    async fn confirm_locked(
        &self,
        owner_id: &str,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<TurnOutcome, ActionError> {
        let conversation = self.conversations.get(owner_id, conversation_id).await?;
        let user_message = self
            .conversations
            .append(&conversation, NewMessage::new(Role::User, "Confirm"))
            .await?;

        let (reply, execution, error) = match self.gate.confirm(owner_id, conversation_id, message_id).await {
            Ok(report) => {
                let reply = NewMessage::new(
                    Role::Assistant,
                    render_execution(&report.proposal, &report.record, report.unchanged),
                )
                .with_records(vec![report.record.id.clone()]);
                (reply, Some(report), None)
            }
            Err(e) => (NewMessage::new(Role::Assistant, e.user_message()), None, Some(e)),
        };

        let reply = self.conversations.append(&conversation, reply).await?;
        tracing::info!(
            conversation_id,
            outcome = error.as_ref().map(|e| e.kind()).unwrap_or("applied"),
            "Confirmation handled"
        );

        Ok(TurnOutcome {
            conversation_id: conversation_id.to_string(),
            user_message,
            reply,
            intent: None,
            proposal: None,
            execution,
            error,
        })
    }

    pub async fn cancel(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<TurnOutcome, ActionError> {
        let lock = self.lock_for(conversation_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.cancel_locked(owner_id, conversation_id).await
        };
        self.release(conversation_id, lock).await;
        result
    }

    async fn cancel_locked(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<TurnOutcome, ActionError> {
        let conversation = self.conversations.get(owner_id, conversation_id).await?;
        let user_message = self
            .conversations
            .append(&conversation, NewMessage::new(Role::User, "Cancel"))
            .await?;

        let reply = match self.gate.cancel(owner_id, conversation_id).await? {
            Some(p) => NewMessage::new(
                Role::Assistant,
                format!("Cancelled. Nothing was changed on {}.", p.record_id),
            )
            .with_records(vec![p.record_id]),
            None => NewMessage::new(Role::Assistant, "There was no pending change to cancel."),
        };
        let reply = self.conversations.append(&conversation, reply).await?;

        Ok(TurnOutcome {
            conversation_id: conversation_id.to_string(),
            user_message,
            reply,
            intent: None,
            proposal: None,
            execution: None,
            error: None,
        })
    }

    pub async fn pending_proposal(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Option<PendingProposal>, ActionError> {
        self.gate.pending(owner_id, conversation_id).await
    }

    pub async fn fetch_conversation(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<(Conversation, Vec<Message>), ActionError> {
        self.conversations.messages(owner_id, conversation_id).await
    }

    pub async fn list_conversations(
        &self,
        owner_id: &str,
    ) -> Result<Vec<ConversationSummary>, ActionError> {
        self.conversations.list(owner_id).await
    }

    pub async fn archive_conversation(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<(), ActionError> {
        let lock = self.lock_for(conversation_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.conversations.archive(owner_id, conversation_id).await
        };
        self.release(conversation_id, lock).await;
        result
    }

    /// Audit trail for one of the caller's records, oldest first.
    pub async fn audit_history(
        &self,
        owner_id: &str,
        record_id: &str,
    ) -> Result<Vec<ActionAuditEntry>, ActionError> {
        let record_id = normalize_record_id(record_id)?;
        self.db
            .list_audit_for_record(owner_id, &record_id)
            .await
            .map_err(ActionError::persistence)
    }

    /// Audit entries written from one conversation, oldest first.
    pub async fn conversation_audit(
        &self,
        owner_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<ActionAuditEntry>, ActionError> {
        let conversation = self.conversations.get(owner_id, conversation_id).await?;
        self.db
            .list_audit_for_conversation(&conversation.id)
            .await
            .map_err(ActionError::persistence)
    }

    async fn lock_for(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    /// Drops the map entry once no other turn holds or waits on it.
    async fn release(&self, conversation_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut locks = self.locks.lock().await;
        if locks
            .get(conversation_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(conversation_id);
        }
    }
}

fn metadata_for(interpretation: &Interpretation) -> MessageMetadata {
    let usage = interpretation.usage.as_ref();
    MessageMetadata {
        model: usage.map(|u| u.model.clone()),
        tokens_in: usage.and_then(|u| u.tokens_in),
        tokens_out: usage.and_then(|u| u.tokens_out),
        interpreter: Some(interpretation.source.as_str().to_string()),
        confidence: Some(interpretation.confidence),
    }
}
