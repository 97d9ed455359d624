use serde::{Deserialize, Serialize};

use crate::error::ActionError;
use crate::models::InvoiceStatus;
use crate::records::RecordFilter;

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;
pub const MAX_NOTE_CHARS: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchParams {
    #[serde(default)]
    pub filter: RecordFilter,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SummaryParams {
    #[serde(default)]
    pub filter: RecordFilter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    #[default]
    Total,
    Count,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RankVendorsParams {
    #[serde(default)]
    pub filter: RecordFilter,
    #[serde(default)]
    pub by: RankBy,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordDetailParams {
    pub record_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusChangeParams {
    pub record_id: String,
    pub to: InvoiceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoteAppendParams {
    pub record_id: String,
    pub note: String,
}

/// Trim, uppercase, and check the `ABC-123` shape.
pub fn normalize_record_id(raw: &str) -> Result<String, ActionError> {
    let id = raw.trim().to_uppercase();
    let valid = match id.split_once('-') {
        Some((prefix, number)) => {
            (2..=6).contains(&prefix.len())
                && prefix.chars().all(|c| c.is_ascii_uppercase())
                && !number.is_empty()
                && number.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    };
    if valid {
        Ok(id)
    } else {
        Err(ActionError::validation(
            "record_id",
            format!("'{}' is not an invoice id like INV-100", raw.trim()),
        ))
    }
}

pub fn normalize_limit(limit: Option<u32>) -> Result<u32, ActionError> {
    match limit {
        None => Ok(DEFAULT_LIMIT),
        Some(n) if (1..=MAX_LIMIT).contains(&n) => Ok(n),
        Some(n) => Err(ActionError::validation(
            "limit",
            format!("{} is outside 1..={}", n, MAX_LIMIT),
        )),
    }
}

pub fn normalize_filter(mut filter: RecordFilter) -> Result<RecordFilter, ActionError> {
    for (field, value) in [("amount_min", filter.amount_min), ("amount_max", filter.amount_max)] {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(ActionError::validation(field, "must be a non-negative amount"));
            }
        }
    }
    if let (Some(min), Some(max)) = (filter.amount_min, filter.amount_max) {
        if min > max {
            return Err(ActionError::validation(
                "amount_min",
                format!("{} is greater than amount_max {}", min, max),
            ));
        }
    }
    if let (Some(from), Some(to)) = (filter.date_from, filter.date_to) {
        if from > to {
            return Err(ActionError::validation(
                "date_from",
                format!("{} is after date_to {}", from, to),
            ));
        }
    }

    let mut vendors = Vec::with_capacity(filter.vendors.len());
    for vendor in filter.vendors.drain(..) {
        let vendor = vendor.trim().to_string();
        if vendor.is_empty() {
            return Err(ActionError::validation("vendors", "vendor names cannot be empty"));
        }
        if !vendors.contains(&vendor) {
            vendors.push(vendor);
        }
    }
    filter.vendors = vendors;
    filter.statuses.sort();
    filter.statuses.dedup();
    Ok(filter)
}

pub fn normalize_note(note: &str) -> Result<String, ActionError> {
    let note = note.trim();
    if note.is_empty() {
        return Err(ActionError::validation("note", "cannot be empty"));
    }
    if note.chars().count() > MAX_NOTE_CHARS {
        return Err(ActionError::validation(
            "note",
            format!("longer than {} characters", MAX_NOTE_CHARS),
        ));
    }
    Ok(note.to_string())
}
