use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ActionError;
use crate::functions::params::{
    NoteAppendParams, RankVendorsParams, RecordDetailParams, SearchParams, StatusChangeParams,
    SummaryParams,
};
use crate::functions::FunctionCall;
use crate::models::Message;
use crate::records::RecordFilter;

/// Minimum confidence at which a deterministic match counts as a canonical
/// template and overrides the semantic interpreter.
pub const CANONICAL_CONFIDENCE: f32 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Search(SearchParams),
    Summary(SummaryParams),
    VendorRanking(RankVendorsParams),
    RecordDetail(RecordDetailParams),
    ProposeStatusChange(StatusChangeParams),
    ProposeNoteAppend(NoteAppendParams),
    Unrecognized { reason: String },
}

impl Intent {
    pub fn unrecognized(reason: impl Into<String>) -> Self {
        Intent::Unrecognized {
            reason: reason.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Intent::Search(_) => "search",
            Intent::Summary(_) => "summary",
            Intent::VendorRanking(_) => "vendor_ranking",
            Intent::RecordDetail(_) => "record_detail",
            Intent::ProposeStatusChange(_) => "propose_status_change",
            Intent::ProposeNoteAppend(_) => "propose_note_append",
            Intent::Unrecognized { .. } => "unrecognized",
        }
    }

    pub fn is_unrecognized(&self) -> bool {
        matches!(self, Intent::Unrecognized { .. })
    }

    /// The catalog call this intent dispatches to; `None` for `Unrecognized`.
    pub fn into_call(self) -> Option<FunctionCall> {
        match self {
            Intent::Search(p) => Some(FunctionCall::SearchRecords(p)),
            Intent::Summary(p) => Some(FunctionCall::GetSummaryStats(p)),
            Intent::VendorRanking(p) => Some(FunctionCall::RankVendors(p)),
            Intent::RecordDetail(p) => Some(FunctionCall::GetRecordDetail(p)),
            Intent::ProposeStatusChange(p) => Some(FunctionCall::ProposeStatusChange(p)),
            Intent::ProposeNoteAppend(p) => Some(FunctionCall::ProposeNoteAppend(p)),
            Intent::Unrecognized { .. } => None,
        }
    }

    pub fn from_call(call: FunctionCall) -> Self {
        match call {
            FunctionCall::SearchRecords(p) => Intent::Search(p),
            FunctionCall::GetSummaryStats(p) => Intent::Summary(p),
            FunctionCall::RankVendors(p) => Intent::VendorRanking(p),
            FunctionCall::GetRecordDetail(p) => Intent::RecordDetail(p),
            FunctionCall::ProposeStatusChange(p) => Intent::ProposeStatusChange(p),
            FunctionCall::ProposeNoteAppend(p) => Intent::ProposeNoteAppend(p),
        }
    }

    /// Seeds an unfiltered search or summary with the dashboard's active filter.
    pub fn with_dashboard_filter(self, context: Option<&DashboardContext>) -> Self {
        let Some(active) = context.and_then(|c| c.active_filter.as_ref()) else {
            return self;
        };
        match self {
            Intent::Search(mut p) if p.filter.is_empty() => {
                p.filter = active.clone();
                Intent::Search(p)
            }
            Intent::Summary(mut p) if p.filter.is_empty() => {
                p.filter = active.clone();
                Intent::Summary(p)
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpreterSource {
    Semantic,
    Deterministic,
}

impl InterpreterSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterpreterSource::Semantic => "semantic",
            InterpreterSource::Deterministic => "deterministic",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Usage {
    pub model: String,
    pub tokens_in: Option<i64>,
    pub tokens_out: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub intent: Intent,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub source: InterpreterSource,
    /// Free text the interpreter wants shown, e.g. a clarifying question.
    pub reply: Option<String>,
    pub usage: Option<Usage>,
}

impl Interpretation {
    pub fn new(intent: Intent, confidence: f32, source: InterpreterSource) -> Self {
        Self {
            intent,
            confidence: confidence.clamp(0.0, 1.0),
            source,
            reply: None,
            usage: None,
        }
    }
}

/// What the user is looking at, when the caller knows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardContext {
    #[serde(default)]
    pub selected_record_ids: Vec<String>,
    #[serde(default)]
    pub active_filter: Option<RecordFilter>,
}

impl DashboardContext {
    /// The record "this invoice" refers to, when exactly one is selected.
    pub fn single_selection(&self) -> Option<&str> {
        match self.selected_record_ids.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Interpreter: Send + Sync {
    fn name(&self) -> &'static str;

    /// `history` is oldest first and already bounded by the caller.
    async fn interpret(
        &self,
        utterance: &str,
        history: &[Message],
        context: Option<&DashboardContext>,
    ) -> Result<Interpretation, ActionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InvoiceStatus;

    #[test]
    fn test_intent_call_mapping_is_symmetric() {
        let intent = Intent::ProposeStatusChange(StatusChangeParams {
            record_id: "INV-1".to_string(),
            to: InvoiceStatus::Paid,
        });
        let call = intent.clone().into_call().unwrap();
        assert_eq!(Intent::from_call(call), intent);
        assert!(Intent::unrecognized("nope").into_call().is_none());
    }

    #[test]
    fn test_dashboard_filter_only_seeds_empty_filters() {
        let context = DashboardContext {
            selected_record_ids: Vec::new(),
            active_filter: Some(RecordFilter {
                statuses: vec![InvoiceStatus::Overdue],
                ..Default::default()
            }),
        };
        let seeded = Intent::Search(SearchParams::default()).with_dashboard_filter(Some(&context));
        let Intent::Search(p) = seeded else { panic!() };
        assert_eq!(p.filter.statuses, vec![InvoiceStatus::Overdue]);

        let own = Intent::Search(SearchParams {
            filter: RecordFilter {
                statuses: vec![InvoiceStatus::Paid],
                ..Default::default()
            },
            limit: None,
        });
        let Intent::Search(p) = own.with_dashboard_filter(Some(&context)) else { panic!() };
        assert_eq!(p.filter.statuses, vec![InvoiceStatus::Paid]);
    }

    #[test]
    fn test_single_selection() {
        let mut context = DashboardContext::default();
        assert_eq!(context.single_selection(), None);
        context.selected_record_ids = vec!["INV-7".to_string()];
        assert_eq!(context.single_selection(), Some("INV-7"));
        context.selected_record_ids.push("INV-8".to_string());
        assert_eq!(context.single_selection(), None);
    }
}
