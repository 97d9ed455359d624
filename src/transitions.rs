//! Invoice status state machine.
//!
//! The table below is the only place legal status changes are defined. The
//! confirmation gate checks it when a change is proposed and the executor
//! checks it again right before applying.

use crate::models::InvoiceStatus;

/// Legal next states for `from`, excluding `from` itself.
pub fn allowed_transitions(from: InvoiceStatus) -> &'static [InvoiceStatus] {
    use InvoiceStatus::*;
    match from {
        Pending => &[InReview, Overdue],
        InReview => &[Pending, Approved, Overdue],
        Approved => &[InReview, Paid],
        // Reopening a paid invoice is an admin action outside this pipeline.
        Paid => &[],
        Overdue => &[InReview, Approved, Paid],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `from == to`; succeeds without touching the record.
    Unchanged,
    Change,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRejected {
    pub from: InvoiceStatus,
    pub to: InvoiceStatus,
    pub allowed: Vec<InvoiceStatus>,
}

pub fn check_transition(
    from: InvoiceStatus,
    to: InvoiceStatus,
) -> Result<Transition, TransitionRejected> {
    if from == to {
        return Ok(Transition::Unchanged);
    }
    let allowed = allowed_transitions(from);
    if allowed.contains(&to) {
        Ok(Transition::Change)
    } else {
        Err(TransitionRejected {
            from,
            to,
            allowed: allowed.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InvoiceStatus::*;

    #[test]
    fn test_table_matches_documented_transitions() {
        assert_eq!(allowed_transitions(Pending), &[InReview, Overdue]);
        assert_eq!(allowed_transitions(InReview), &[Pending, Approved, Overdue]);
        assert_eq!(allowed_transitions(Approved), &[InReview, Paid]);
        assert!(allowed_transitions(Paid).is_empty());
        assert_eq!(allowed_transitions(Overdue), &[InReview, Approved, Paid]);
    }

    #[test]
    fn test_same_state_is_unchanged_for_every_status() {
        for status in InvoiceStatus::ALL {
            assert_eq!(check_transition(status, status), Ok(Transition::Unchanged));
        }
    }

    #[test]
    fn test_every_pair_is_either_allowed_or_rejected_with_alternatives() {
        for from in InvoiceStatus::ALL {
            for to in InvoiceStatus::ALL {
                if from == to {
                    continue;
                }
                match check_transition(from, to) {
                    Ok(t) => {
                        assert_eq!(t, Transition::Change);
                        assert!(allowed_transitions(from).contains(&to));
                    }
                    Err(rejected) => {
                        assert!(!allowed_transitions(from).contains(&to));
                        assert_eq!(rejected.allowed, allowed_transitions(from).to_vec());
                    }
                }
            }
        }
    }

    #[test]
    fn test_paid_is_terminal() {
        let err = check_transition(Paid, Approved).unwrap_err();
        assert!(err.allowed.is_empty());
    }
}
