use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use super::params::{
    NoteAppendParams, RankVendorsParams, RecordDetailParams, SearchParams, StatusChangeParams,
    SummaryParams,
};
use crate::providers::ToolDefinition;

/// Bumped whenever a function is added, removed, or changes its arguments.
pub const CATALOG_VERSION: &str = "1.2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionName {
    SearchRecords,
    GetRecordDetail,
    GetSummaryStats,
    RankVendors,
    ProposeStatusChange,
    ProposeNoteAppend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Read,
    /// Produces a proposal; never mutates directly.
    Write,
}

impl FunctionName {
    pub const ALL: [FunctionName; 6] = [
        FunctionName::SearchRecords,
        FunctionName::GetRecordDetail,
        FunctionName::GetSummaryStats,
        FunctionName::RankVendors,
        FunctionName::ProposeStatusChange,
        FunctionName::ProposeNoteAppend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionName::SearchRecords => "search_records",
            FunctionName::GetRecordDetail => "get_record_detail",
            FunctionName::GetSummaryStats => "get_summary_stats",
            FunctionName::RankVendors => "rank_vendors",
            FunctionName::ProposeStatusChange => "propose_status_change",
            FunctionName::ProposeNoteAppend => "propose_note_append",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.as_str() == s)
    }

    pub fn kind(&self) -> FunctionKind {
        match self {
            FunctionName::ProposeStatusChange | FunctionName::ProposeNoteAppend => {
                FunctionKind::Write
            }
            _ => FunctionKind::Read,
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        let (description, parameters) = match self {
            FunctionName::SearchRecords => (
                "List the user's invoices matching a filter, newest first.",
                json!({
                    "type": "object",
                    "properties": {
                        "filter": filter_schema(),
                        "limit": {
                            "type": "integer",
                            "minimum": 1,
                            "maximum": 100,
                            "description": "Maximum number of invoices to return (default 20)"
                        }
                    },
                    "additionalProperties": false
                }),
            ),
            FunctionName::GetRecordDetail => (
                "Show every field of a single invoice, including its notes.",
                json!({
                    "type": "object",
                    "properties": { "record_id": record_id_schema() },
                    "required": ["record_id"],
                    "additionalProperties": false
                }),
            ),
            FunctionName::GetSummaryStats => (
                "Count and total the invoices matching a filter, broken down by status.",
                json!({
                    "type": "object",
                    "properties": { "filter": filter_schema() },
                    "additionalProperties": false
                }),
            ),
            FunctionName::RankVendors => (
                "Rank vendors by total invoiced amount or by number of invoices.",
                json!({
                    "type": "object",
                    "properties": {
                        "filter": filter_schema(),
                        "by": {
                            "type": "string",
                            "enum": ["total", "count"],
                            "description": "Ranking key (default total)"
                        },
                        "limit": {
                            "type": "integer",
                            "minimum": 1,
                            "maximum": 100
                        }
                    },
                    "additionalProperties": false
                }),
            ),
            FunctionName::ProposeStatusChange => (
                "Propose moving an invoice to a new status. The user must confirm before anything changes.",
                json!({
                    "type": "object",
                    "properties": {
                        "record_id": record_id_schema(),
                        "to": status_schema()
                    },
                    "required": ["record_id", "to"],
                    "additionalProperties": false
                }),
            ),
            FunctionName::ProposeNoteAppend => (
                "Propose adding a note to an invoice. The user must confirm before anything changes.",
                json!({
                    "type": "object",
                    "properties": {
                        "record_id": record_id_schema(),
                        "note": {
                            "type": "string",
                            "minLength": 1,
                            "maxLength": 1000
                        }
                    },
                    "required": ["record_id", "note"],
                    "additionalProperties": false
                }),
            ),
        };
        ToolDefinition {
            name: self.as_str().to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// A validated-shape request for one catalog function. Argument values are
/// checked later by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionCall {
    SearchRecords(SearchParams),
    GetRecordDetail(RecordDetailParams),
    GetSummaryStats(SummaryParams),
    RankVendors(RankVendorsParams),
    ProposeStatusChange(StatusChangeParams),
    ProposeNoteAppend(NoteAppendParams),
}

impl FunctionCall {
    pub fn name(&self) -> FunctionName {
        match self {
            FunctionCall::SearchRecords(_) => FunctionName::SearchRecords,
            FunctionCall::GetRecordDetail(_) => FunctionName::GetRecordDetail,
            FunctionCall::GetSummaryStats(_) => FunctionName::GetSummaryStats,
            FunctionCall::RankVendors(_) => FunctionName::RankVendors,
            FunctionCall::ProposeStatusChange(_) => FunctionName::ProposeStatusChange,
            FunctionCall::ProposeNoteAppend(_) => FunctionName::ProposeNoteAppend,
        }
    }

    pub fn kind(&self) -> FunctionKind {
        self.name().kind()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CatalogError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("invalid arguments for {function}: {message}")]
    InvalidArguments {
        function: &'static str,
        message: String,
    },
}

pub fn definitions() -> Vec<ToolDefinition> {
    FunctionName::ALL.iter().map(|name| name.definition()).collect()
}

/// Maps a model-emitted call onto the closed catalog. Unknown names and
/// unexpected argument fields are rejected.
pub fn parse_call(name: &str, arguments: Value) -> Result<FunctionCall, CatalogError> {
    let function =
        FunctionName::from_str(name).ok_or_else(|| CatalogError::UnknownFunction(name.to_string()))?;
    // Some models send `null` or nothing for argument-less calls.
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };

    let call = match function {
        FunctionName::SearchRecords => FunctionCall::SearchRecords(args(function, arguments)?),
        FunctionName::GetRecordDetail => FunctionCall::GetRecordDetail(args(function, arguments)?),
        FunctionName::GetSummaryStats => FunctionCall::GetSummaryStats(args(function, arguments)?),
        FunctionName::RankVendors => FunctionCall::RankVendors(args(function, arguments)?),
        FunctionName::ProposeStatusChange => {
            FunctionCall::ProposeStatusChange(args(function, arguments)?)
        }
        FunctionName::ProposeNoteAppend => {
            FunctionCall::ProposeNoteAppend(args(function, arguments)?)
        }
    };
    Ok(call)
}

fn args<T: DeserializeOwned>(function: FunctionName, arguments: Value) -> Result<T, CatalogError> {
    serde_json::from_value(arguments).map_err(|e| CatalogError::InvalidArguments {
        function: function.as_str(),
        message: e.to_string(),
    })
}

fn record_id_schema() -> Value {
    json!({
        "type": "string",
        "pattern": "^[A-Z]{2,6}-[0-9]+$",
        "description": "Invoice id, e.g. INV-100"
    })
}

fn status_schema() -> Value {
    json!({
        "type": "string",
        "enum": ["pending", "in_review", "approved", "paid", "overdue"]
    })
}

fn filter_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "statuses": { "type": "array", "items": status_schema() },
            "vendors": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Vendor names; partial, case-insensitive match"
            },
            "amount_min": { "type": "number", "minimum": 0, "description": "Inclusive, in dollars" },
            "amount_max": { "type": "number", "minimum": 0, "description": "Inclusive, in dollars" },
            "date_from": { "type": "string", "format": "date", "description": "Issue date lower bound, YYYY-MM-DD" },
            "date_to": { "type": "string", "format": "date", "description": "Issue date upper bound, YYYY-MM-DD" }
        },
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InvoiceStatus;

    #[test]
    fn test_every_function_has_a_definition() {
        let defs = definitions();
        assert_eq!(defs.len(), FunctionName::ALL.len());
        for def in &defs {
            assert!(FunctionName::from_str(&def.name).is_some());
            assert_eq!(def.parameters["type"], "object");
        }
    }

    #[test]
    fn test_write_functions_are_proposals() {
        let writes: Vec<_> = FunctionName::ALL
            .into_iter()
            .filter(|f| f.kind() == FunctionKind::Write)
            .map(|f| f.as_str())
            .collect();
        assert_eq!(writes, vec!["propose_status_change", "propose_note_append"]);
    }

    #[test]
    fn test_parse_status_change() {
        let call = parse_call(
            "propose_status_change",
            json!({"record_id": "INV-100", "to": "paid"}),
        )
        .unwrap();
        assert_eq!(
            call,
            FunctionCall::ProposeStatusChange(StatusChangeParams {
                record_id: "INV-100".to_string(),
                to: InvoiceStatus::Paid,
            })
        );
        assert_eq!(call.kind(), FunctionKind::Write);
    }

    #[test]
    fn test_parse_search_with_nested_filter_and_null_args() {
        let call = parse_call(
            "search_records",
            json!({"filter": {"statuses": ["pending"], "amount_min": 500}, "limit": 5}),
        )
        .unwrap();
        let FunctionCall::SearchRecords(params) = call else {
            panic!("expected search");
        };
        assert_eq!(params.filter.statuses, vec![InvoiceStatus::Pending]);
        assert_eq!(params.filter.amount_min, Some(500.0));
        assert_eq!(params.limit, Some(5));

        let call = parse_call("get_summary_stats", Value::Null).unwrap();
        assert_eq!(call, FunctionCall::GetSummaryStats(SummaryParams::default()));
    }

    #[test]
    fn test_unknown_function_fails_closed() {
        assert_eq!(
            parse_call("delete_record", json!({"record_id": "INV-1"})),
            Err(CatalogError::UnknownFunction("delete_record".to_string()))
        );
    }

    #[test]
    fn test_bad_arguments_are_rejected() {
        let err = parse_call("propose_status_change", json!({"record_id": "INV-1", "to": "void"}))
            .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::InvalidArguments { function: "propose_status_change", .. }
        ));

        let err = parse_call("search_records", json!({"filter": {"colour": "red"}})).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidArguments { .. }));
    }
}
