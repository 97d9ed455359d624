use thiserror::Error;

use crate::models::InvoiceStatus;

/// Outcomes of a turn that the caller must handle. Everything except
/// `ExternalService` and `AuditWriteFailure` is an expected, user-recoverable
/// result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("invalid `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("could not interpret request: {0}")]
    Unrecognized(String),

    #[error("{record_id} cannot move from {from} to {to}")]
    InvalidTransition {
        record_id: String,
        from: InvoiceStatus,
        to: InvoiceStatus,
        allowed: Vec<InvoiceStatus>,
    },

    #[error("no matching pending proposal")]
    StaleProposal,

    #[error("{record_id} changed since the proposal: expected {expected}, found {actual}")]
    Conflict {
        record_id: String,
        expected: String,
        actual: String,
    },

    #[error("{service} unavailable: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    #[error("change to {record_id} applied but audit write failed: {message}")]
    AuditWriteFailure { record_id: String, message: String },
}

impl ActionError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ActionError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn storage(message: impl std::fmt::Display) -> Self {
        ActionError::ExternalService {
            service: "record storage",
            message: message.to_string(),
        }
    }

    pub fn persistence(error: impl std::fmt::Display) -> Self {
        ActionError::ExternalService {
            service: "conversation store",
            message: error.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::Validation { .. } => "validation",
            ActionError::Unrecognized(_) => "unrecognized",
            ActionError::InvalidTransition { .. } => "invalid_transition",
            ActionError::StaleProposal => "stale_proposal",
            ActionError::Conflict { .. } => "conflict",
            ActionError::ExternalService { .. } => "external_service",
            ActionError::AuditWriteFailure { .. } => "audit_write_failure",
        }
    }

    /// Text shown to the user. Includes the next legal step when there is one.
    pub fn user_message(&self) -> String {
        match self {
            ActionError::Validation { field, message } => {
                format!("I can't use that value for {}: {}.", field, message)
            }
            ActionError::Unrecognized(message) => message.clone(),
            ActionError::InvalidTransition {
                record_id,
                from,
                to,
                allowed,
            } => {
                if allowed.is_empty() {
                    format!(
                        "{} is {} and can't be changed to {}. {} is a final status.",
                        record_id, from, to, from
                    )
                } else {
                    format!(
                        "{} is {} and can't be changed to {}. Allowed next statuses: {}.",
                        record_id,
                        from,
                        to,
                        join_statuses(allowed)
                    )
                }
            }
            ActionError::StaleProposal => {
                "There is no pending change matching that confirmation. \
                 It may have expired or been replaced; ask again to get a fresh proposal."
                    .to_string()
            }
            ActionError::Conflict {
                record_id,
                expected,
                actual,
            } => format!(
                "{} changed after I proposed this (expected {}, now {}). Nothing was applied; \
                 ask again to get a proposal against the current value.",
                record_id, expected, actual
            ),
            ActionError::ExternalService { service, .. } => format!(
                "The {} is not responding right now. Nothing was changed; please try again.",
                service
            ),
            ActionError::AuditWriteFailure { record_id, .. } => format!(
                "The change to {} may have been applied, but it could not be recorded in the \
                 audit log. The outcome is inconclusive and has been flagged for review.",
                record_id
            ),
        }
    }
}

fn join_statuses(statuses: &[InvoiceStatus]) -> String {
    statuses
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message_lists_alternatives() {
        let err = ActionError::InvalidTransition {
            record_id: "INV-100".to_string(),
            from: InvoiceStatus::Pending,
            to: InvoiceStatus::Paid,
            allowed: vec![InvoiceStatus::InReview, InvoiceStatus::Overdue],
        };
        let msg = err.user_message();
        assert!(msg.contains("in_review, overdue"));
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[test]
    fn test_terminal_status_message() {
        let err = ActionError::InvalidTransition {
            record_id: "INV-7".to_string(),
            from: InvoiceStatus::Paid,
            to: InvoiceStatus::Pending,
            allowed: Vec::new(),
        };
        assert!(err.user_message().contains("final status"));
    }
}
