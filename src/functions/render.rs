use std::fmt::Write;

use crate::models::{format_cents, Invoice, PendingProposal, ProposalChange};
use crate::records::RecordFilter;

use super::dispatcher::{ReadOutput, SummaryStats, VendorStanding};
use super::params::RankBy;

pub fn render_read(output: &ReadOutput) -> String {
    match output {
        ReadOutput::Records { filter, page } => render_page(filter, &page.records, page.total),
        ReadOutput::Detail(invoice) => render_detail(invoice),
        ReadOutput::Summary(stats) => render_summary(stats),
        ReadOutput::VendorRanking { by, standings } => render_ranking(*by, standings),
    }
}

/// The confirmation prompt shown for a pending proposal.
pub fn render_proposal(proposal: &PendingProposal) -> String {
    let minutes = (proposal.expires_at - proposal.created_at).num_minutes();
    let change = match &proposal.change {
        ProposalChange::StatusChange { from, to } if from == to => format!(
            "{} is already {}. Confirm to record it as unchanged ({} → {}).",
            proposal.record_id, from, from, to
        ),
        ProposalChange::StatusChange { from, to } => format!(
            "Change the status of {}: {} → {}.",
            proposal.record_id, from, to
        ),
        ProposalChange::NoteAppend { from_count, note } => format!(
            "Add a note to {} ({} → {} notes): \"{}\"",
            proposal.record_id,
            from_count,
            from_count + 1,
            note
        ),
    };
    format!(
        "{}\nConfirm to apply or cancel to discard. This proposal expires in {} minutes.",
        change, minutes
    )
}

/// Reply after a confirmed change went through.
pub fn render_execution(proposal: &PendingProposal, record: &Invoice, unchanged: bool) -> String {
    match &proposal.change {
        ProposalChange::StatusChange { to, .. } if unchanged => format!(
            "{} was already {}; nothing needed to change. I've recorded the confirmation.",
            record.id, to
        ),
        ProposalChange::StatusChange { from, to } => {
            format!("Done. {} moved {} → {}.", record.id, from, to)
        }
        ProposalChange::NoteAppend { note, .. } => format!(
            "Done. Added the note to {} (now {} notes): \"{}\"",
            record.id,
            record.notes.len(),
            note
        ),
    }
}

pub fn describe_filter(filter: &RecordFilter) -> String {
    let mut parts = Vec::new();
    if !filter.statuses.is_empty() {
        let statuses: Vec<&str> = filter.statuses.iter().map(|s| s.as_str()).collect();
        parts.push(statuses.join("/"));
    }
    if !filter.vendors.is_empty() {
        parts.push(format!("from {}", filter.vendors.join(" or ")));
    }
    match (filter.amount_min, filter.amount_max) {
        (Some(min), Some(max)) => parts.push(format!("between ${:.2} and ${:.2}", min, max)),
        (Some(min), None) => parts.push(format!("at least ${:.2}", min)),
        (None, Some(max)) => parts.push(format!("at most ${:.2}", max)),
        (None, None) => {}
    }
    match (filter.date_from, filter.date_to) {
        (Some(from), Some(to)) => parts.push(format!("issued {} to {}", from, to)),
        (Some(from), None) => parts.push(format!("issued since {}", from)),
        (None, Some(to)) => parts.push(format!("issued until {}", to)),
        (None, None) => {}
    }
    if parts.is_empty() {
        "all invoices".to_string()
    } else {
        format!("invoices {}", parts.join(", "))
    }
}

fn render_page(filter: &RecordFilter, records: &[Invoice], total: u64) -> String {
    let scope = describe_filter(filter);
    if records.is_empty() {
        return format!("No {} found.", scope);
    }
    let mut out = if total as usize > records.len() {
        format!("Showing {} of {} {}:\n", records.len(), total, scope)
    } else {
        format!("Found {} {}:\n", total, scope)
    };
    for invoice in records {
        let _ = writeln!(
            out,
            "- {}  {}  {}  {}  issued {}  due {}",
            invoice.id,
            invoice.vendor,
            invoice.amount_display(),
            invoice.status,
            invoice.issue_date,
            invoice.due_date
        );
    }
    out.trim_end().to_string()
}

fn render_detail(invoice: &Invoice) -> String {
    let mut out = format!(
        "{} from {}\nAmount: {}\nStatus: {}\nIssued: {}\nDue: {}",
        invoice.id,
        invoice.vendor,
        invoice.amount_display(),
        invoice.status,
        invoice.issue_date,
        invoice.due_date
    );
    if invoice.notes.is_empty() {
        out.push_str("\nNo notes.");
    } else {
        out.push_str("\nNotes:");
        for note in &invoice.notes {
            let _ = write!(out, "\n- {}", note);
        }
    }
    out
}

fn render_summary(stats: &SummaryStats) -> String {
    let scope = describe_filter(&stats.filter);
    if stats.count == 0 {
        return format!("No {} to summarize.", scope);
    }
    let mut out = format!(
        "{} {} totalling {}",
        stats.count,
        scope,
        format_cents(stats.total_cents)
    );
    if stats.truncated {
        out.push_str(" (first records only; narrow the filter for exact totals)");
    }
    out.push(':');
    for row in &stats.by_status {
        let _ = write!(
            out,
            "\n- {}: {} ({})",
            row.status,
            row.count,
            format_cents(row.total_cents)
        );
    }
    out
}

fn render_ranking(by: RankBy, standings: &[VendorStanding]) -> String {
    if standings.is_empty() {
        return "No vendors match.".to_string();
    }
    let key = match by {
        RankBy::Total => "total invoiced",
        RankBy::Count => "number of invoices",
    };
    let mut out = format!("Top {} vendors by {}:", standings.len(), key);
    for (rank, s) in standings.iter().enumerate() {
        let _ = write!(
            out,
            "\n{}. {}  {}  ({} invoices)",
            rank + 1,
            s.vendor,
            format_cents(s.total_cents),
            s.invoice_count
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use crate::models::InvoiceStatus;

    fn proposal(change: ProposalChange) -> PendingProposal {
        let now = Utc::now();
        PendingProposal {
            id: "p1".to_string(),
            conversation_id: "c1".to_string(),
            message_id: "m1".to_string(),
            record_id: "INV-100".to_string(),
            change,
            created_at: now,
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn test_status_prompt_names_record_and_arrow() {
        let text = render_proposal(&proposal(ProposalChange::StatusChange {
            from: InvoiceStatus::Approved,
            to: InvoiceStatus::Paid,
        }));
        assert!(text.contains("INV-100"));
        assert!(text.contains("approved → paid"));
        assert!(text.contains("10 minutes"));
    }

    #[test]
    fn test_note_prompt_quotes_note() {
        let text = render_proposal(&proposal(ProposalChange::NoteAppend {
            from_count: 2,
            note: "wired on Friday".to_string(),
        }));
        assert!(text.contains("2 → 3 notes"));
        assert!(text.contains("\"wired on Friday\""));
    }

    #[test]
    fn test_describe_filter() {
        assert_eq!(describe_filter(&RecordFilter::default()), "all invoices");
        let filter = RecordFilter {
            statuses: vec![InvoiceStatus::Overdue],
            vendors: vec!["Acme".to_string()],
            amount_min: Some(500.0),
            ..Default::default()
        };
        assert_eq!(
            describe_filter(&filter),
            "invoices overdue, from Acme, at least $500.00"
        );
    }
}
