use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::error::ActionError;
use crate::models::{ActionAuditEntry, Invoice, Outcome, PendingProposal, ProposalChange};
use crate::records::{GuardedStore, RecordPatch};
use crate::services::database::Database;
use crate::transitions::{check_transition, Transition};

/// Where audit entries go. Append-only.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &ActionAuditEntry) -> Result<()>;
}

#[async_trait]
impl AuditSink for Database {
    async fn record(&self, entry: &ActionAuditEntry) -> Result<()> {
        self.insert_audit_entry(entry).await
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub proposal: PendingProposal,
    /// The record after the change (or as found, for a no-op).
    pub record: Invoice,
    pub unchanged: bool,
    pub audit_id: String,
}

/// Applies confirmed proposals and audits every attempt.
#[derive(Clone)]
pub struct MutationExecutor {
    records: GuardedStore,
    audit: Arc<dyn AuditSink>,
}

impl MutationExecutor {
    pub fn new(records: GuardedStore, audit: Arc<dyn AuditSink>) -> Self {
        Self { records, audit }
    }

    pub async fn execute(
        &self,
        owner_id: &str,
        proposal: &PendingProposal,
    ) -> Result<ExecutionReport, ActionError> {
        let applied = self.apply(owner_id, proposal).await;
        let entry = audit_entry(owner_id, proposal, &applied);

        match (self.audit.record(&entry).await, applied) {
            (Ok(()), Ok((record, unchanged))) => {
                tracing::info!(
                    conversation_id = %proposal.conversation_id,
                    record_id = %proposal.record_id,
                    action = proposal.action_type().as_str(),
                    unchanged,
                    outcome = "success",
                    "Applied confirmed change"
                );
                Ok(ExecutionReport {
                    proposal: proposal.clone(),
                    record,
                    unchanged,
                    audit_id: entry.id,
                })
            }
            (Ok(()), Err(e)) => {
                tracing::warn!(
                    conversation_id = %proposal.conversation_id,
                    record_id = %proposal.record_id,
                    outcome = "failure",
                    error = %e,
                    "Confirmed change was not applied"
                );
                Err(e)
            }
            (Err(audit_error), Ok(_)) => {
                tracing::error!(
                    reconcile = true,
                    conversation_id = %proposal.conversation_id,
                    record_id = %proposal.record_id,
                    proposal_id = %proposal.id,
                    before = %entry.before_value.as_deref().unwrap_or(""),
                    after = %entry.after_value.as_deref().unwrap_or(""),
                    error = %format!("{:#}", audit_error),
                    "Change applied but audit entry could not be written"
                );
                Err(ActionError::AuditWriteFailure {
                    record_id: proposal.record_id.clone(),
                    message: audit_error.to_string(),
                })
            }
            (Err(audit_error), Err(e)) => {
                tracing::error!(
                    conversation_id = %proposal.conversation_id,
                    record_id = %proposal.record_id,
                    error = %format!("{:#}", audit_error),
                    "Failed to audit a rejected change"
                );
                Err(e)
            }
        }
    }

    /// Re-validates against the current record and writes. Returns the
    /// resulting record and whether it was a no-op.
    async fn apply(
        &self,
        owner_id: &str,
        proposal: &PendingProposal,
    ) -> Result<(Invoice, bool), ActionError> {
        let record_id = &proposal.record_id;
        let current = self
            .records
            .read(owner_id, record_id)
            .await?
            .ok_or_else(|| ActionError::validation("record_id", format!("{} was not found", record_id)))?;

        let patch = match &proposal.change {
            ProposalChange::StatusChange { from, to } => {
                if current.status != *from {
                    return Err(ActionError::Conflict {
                        record_id: record_id.clone(),
                        expected: from.to_string(),
                        actual: current.status.to_string(),
                    });
                }
                match check_transition(*from, *to) {
                    Ok(Transition::Unchanged) => return Ok((current, true)),
                    Ok(Transition::Change) => RecordPatch::SetStatus { status: *to },
                    Err(rejected) => {
                        return Err(ActionError::InvalidTransition {
                            record_id: record_id.clone(),
                            from: rejected.from,
                            to: rejected.to,
                            allowed: rejected.allowed,
                        })
                    }
                }
            }
            ProposalChange::NoteAppend { from_count, note } => {
                if current.notes.len() != *from_count {
                    return Err(ActionError::Conflict {
                        record_id: record_id.clone(),
                        expected: format!("{} note(s)", from_count),
                        actual: format!("{} note(s)", current.notes.len()),
                    });
                }
                RecordPatch::AppendNote { note: note.clone() }
            }
        };

        let updated = self.records.write(owner_id, record_id, &patch).await?;
        Ok((updated, false))
    }
}

fn audit_entry(
    owner_id: &str,
    proposal: &PendingProposal,
    applied: &Result<(Invoice, bool), ActionError>,
) -> ActionAuditEntry {
    let (outcome, failure_reason, unchanged) = match applied {
        Ok((_, unchanged)) => (Outcome::Success, None, *unchanged),
        Err(e) => (Outcome::Failure, Some(e.to_string()), false),
    };
    ActionAuditEntry {
        id: uuid::Uuid::new_v4().to_string(),
        conversation_id: proposal.conversation_id.clone(),
        message_id: proposal.message_id.clone(),
        action_type: proposal.action_type(),
        record_ids: vec![proposal.record_id.clone()],
        before_value: Some(proposal.from_value()),
        after_value: Some(proposal.to_value()),
        outcome,
        failure_reason,
        confirmed_by_user: true,
        unchanged,
        actor_id: owner_id.to_string(),
        created_at: Utc::now(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    use crate::models::{ActionType, Conversation, InvoiceStatus};
    use crate::services::database::tests::invoice;

    pub(crate) struct BrokenAudit;

    #[async_trait]
    impl AuditSink for BrokenAudit {
        async fn record(&self, _entry: &ActionAuditEntry) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    fn proposal(record_id: &str, change: ProposalChange) -> PendingProposal {
        let now = Utc::now();
        PendingProposal {
            id: "p1".to_string(),
            conversation_id: "c1".to_string(),
            message_id: "m1".to_string(),
            record_id: record_id.to_string(),
            change,
            created_at: now,
            expires_at: now + chrono::Duration::minutes(10),
        }
    }

    async fn setup(status: InvoiceStatus) -> (Database, GuardedStore) {
        let db = Database::new_in_memory().unwrap();
        let now = Utc::now();
        db.insert_conversation(&Conversation {
            id: "c1".to_string(),
            owner_id: "alice".to_string(),
            title: None,
            archived: false,
            context: serde_json::json!({}),
            pending_proposal: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
        db.upsert_invoice(&invoice("alice", "INV-100", "Acme", 50_000, status, "2026-09-01"))
            .await
            .unwrap();
        let store = GuardedStore::new(Arc::new(db.clone()), Duration::from_secs(3));
        (db, store)
    }

    #[tokio::test]
    async fn test_applies_and_audits_success() {
        let (db, store) = setup(InvoiceStatus::Approved).await;
        let executor = MutationExecutor::new(store, Arc::new(db.clone()));
        let report = executor
            .execute(
                "alice",
                &proposal(
                    "INV-100",
                    ProposalChange::StatusChange {
                        from: InvoiceStatus::Approved,
                        to: InvoiceStatus::Paid,
                    },
                ),
            )
            .await
            .unwrap();
        assert_eq!(report.record.status, InvoiceStatus::Paid);
        assert!(!report.unchanged);

        let audit = db.list_audit_for_record("alice", "INV-100").await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].id, report.audit_id);
        assert_eq!(audit[0].action_type, ActionType::StatusChange);
        assert_eq!(audit[0].before_value.as_deref(), Some("approved"));
        assert_eq!(audit[0].after_value.as_deref(), Some("paid"));
        assert_eq!(audit[0].outcome, Outcome::Success);
        assert!(audit[0].confirmed_by_user);
    }

    #[tokio::test]
    async fn test_same_status_is_audited_noop() {
        let (db, store) = setup(InvoiceStatus::Paid).await;
        let executor = MutationExecutor::new(store, Arc::new(db.clone()));
        let report = executor
            .execute(
                "alice",
                &proposal(
                    "INV-100",
                    ProposalChange::StatusChange {
                        from: InvoiceStatus::Paid,
                        to: InvoiceStatus::Paid,
                    },
                ),
            )
            .await
            .unwrap();
        assert!(report.unchanged);
        let audit = db.list_audit_for_record("alice", "INV-100").await.unwrap();
        assert_eq!(audit.len(), 1);
        assert!(audit[0].unchanged);
        assert_eq!(audit[0].outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn test_conflict_is_audited_as_failure() {
        let (db, store) = setup(InvoiceStatus::InReview).await;
        let executor = MutationExecutor::new(store, Arc::new(db.clone()));
        let err = executor
            .execute(
                "alice",
                &proposal(
                    "INV-100",
                    ProposalChange::StatusChange {
                        from: InvoiceStatus::Approved,
                        to: InvoiceStatus::Paid,
                    },
                ),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ActionError::Conflict {
                record_id: "INV-100".to_string(),
                expected: "approved".to_string(),
                actual: "in_review".to_string(),
            }
        );
        let record = db.get_invoice("alice", "INV-100").await.unwrap().unwrap();
        assert_eq!(record.status, InvoiceStatus::InReview);
        let audit = db.list_audit_for_record("alice", "INV-100").await.unwrap();
        assert_eq!(audit[0].outcome, Outcome::Failure);
        assert!(audit[0].failure_reason.as_deref().unwrap().contains("expected approved"));
    }

    #[tokio::test]
    async fn test_note_append_detects_concurrent_note() {
        let (db, store) = setup(InvoiceStatus::Pending).await;
        let executor = MutationExecutor::new(store, Arc::new(db.clone()));
        let note = |n: &str| ProposalChange::NoteAppend {
            from_count: 0,
            note: n.to_string(),
        };
        executor.execute("alice", &proposal("INV-100", note("first"))).await.unwrap();
        let err = executor
            .execute("alice", &proposal("INV-100", note("second")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
        let record = db.get_invoice("alice", "INV-100").await.unwrap().unwrap();
        assert_eq!(record.notes, vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn test_audit_failure_after_write_is_inconclusive() {
        let (db, store) = setup(InvoiceStatus::Approved).await;
        let executor = MutationExecutor::new(store, Arc::new(BrokenAudit));
        let err = executor
            .execute(
                "alice",
                &proposal(
                    "INV-100",
                    ProposalChange::StatusChange {
                        from: InvoiceStatus::Approved,
                        to: InvoiceStatus::Paid,
                    },
                ),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::AuditWriteFailure { ref record_id, .. } if record_id == "INV-100"));
        assert!(err.user_message().contains("inconclusive"));
        // The write itself went through.
        let record = db.get_invoice("alice", "INV-100").await.unwrap().unwrap();
        assert_eq!(record.status, InvoiceStatus::Paid);
    }
}
