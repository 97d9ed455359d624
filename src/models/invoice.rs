use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    InReview,
    Approved,
    Paid,
    Overdue,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 5] = [
        InvoiceStatus::Pending,
        InvoiceStatus::InReview,
        InvoiceStatus::Approved,
        InvoiceStatus::Paid,
        InvoiceStatus::Overdue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::InReview => "in_review",
            InvoiceStatus::Approved => "approved",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InvoiceStatus::Pending),
            "in_review" => Some(InvoiceStatus::InReview),
            "approved" => Some(InvoiceStatus::Approved),
            "paid" => Some(InvoiceStatus::Paid),
            "overdue" => Some(InvoiceStatus::Overdue),
            _ => None,
        }
    }

    /// Accepts the spellings people type: "in review", "in-review", "In_Review".
    pub fn parse_loose(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "review" | "reviewing" => Some(InvoiceStatus::InReview),
            "unpaid_overdue" | "late" | "past_due" => Some(InvoiceStatus::Overdue),
            other => Self::from_str(other),
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A business record owned by the external record layer. The assistant reads
/// it and requests patches; it never persists it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub owner_id: String,
    pub vendor: String,
    pub amount_cents: i64,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub notes: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn amount_display(&self) -> String {
        format_cents(self.amount_cents)
    }
}

/// Format integer cents as a dollar amount with thousands separators.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    let dollars = (cents / 100).to_string();
    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (i, ch) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_and_loose_parsing() {
        for status in InvoiceStatus::ALL {
            assert_eq!(InvoiceStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(InvoiceStatus::parse_loose("In Review"), Some(InvoiceStatus::InReview));
        assert_eq!(InvoiceStatus::parse_loose("in-review"), Some(InvoiceStatus::InReview));
        assert_eq!(InvoiceStatus::parse_loose("PAID"), Some(InvoiceStatus::Paid));
        assert_eq!(InvoiceStatus::parse_loose("shipped"), None);
    }

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(0), "$0.00");
        assert_eq!(format_cents(50_000), "$500.00");
        assert_eq!(format_cents(123_456_789), "$1,234,567.89");
        assert_eq!(format_cents(-1_050), "-$10.50");
    }
}
