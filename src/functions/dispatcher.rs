use std::collections::HashMap;

use crate::error::ActionError;
use crate::models::{Invoice, InvoiceStatus, ProposedAction, RequestedChange};
use crate::records::{GuardedStore, PageRequest, RecordFilter, RecordPage};

use super::catalog::FunctionCall;
use super::params::{
    normalize_filter, normalize_limit, normalize_note, normalize_record_id, RankBy,
};

/// Page size used when aggregating over every matching record.
const SCAN_PAGE: u32 = 200;
/// Aggregates stop here rather than walk an unbounded result set.
const SCAN_CAP: u64 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct StatusBreakdown {
    pub status: InvoiceStatus,
    pub count: u64,
    pub total_cents: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryStats {
    pub filter: RecordFilter,
    pub count: u64,
    pub total_cents: i64,
    /// One row per status present in the result, in status order.
    pub by_status: Vec<StatusBreakdown>,
    /// Set when more records matched than were aggregated.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VendorStanding {
    pub vendor: String,
    pub invoice_count: u64,
    pub total_cents: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutput {
    Records {
        filter: RecordFilter,
        page: RecordPage,
    },
    Detail(Invoice),
    Summary(SummaryStats),
    VendorRanking {
        by: RankBy,
        standings: Vec<VendorStanding>,
    },
}

impl ReadOutput {
    /// Record ids a reply refers to, in display order.
    pub fn record_ids(&self) -> Vec<String> {
        match self {
            ReadOutput::Records { page, .. } => {
                page.records.iter().map(|r| r.id.clone()).collect()
            }
            ReadOutput::Detail(invoice) => vec![invoice.id.clone()],
            ReadOutput::Summary(_) | ReadOutput::VendorRanking { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Read(ReadOutput),
    /// A write request, validated but not yet checked against the record.
    Proposal(ProposedAction),
}

/// Runs catalog calls. Reads execute immediately against the record store;
/// writes come back as proposals for the confirmation gate.
#[derive(Clone)]
pub struct Dispatcher {
    records: GuardedStore,
}

impl Dispatcher {
    pub fn new(records: GuardedStore) -> Self {
        Self { records }
    }

    pub async fn dispatch(
        &self,
        owner_id: &str,
        call: FunctionCall,
    ) -> Result<Dispatched, ActionError> {
        let function = call.name().as_str();
        tracing::debug!(owner_id, function, "Dispatching function call");

        match call {
            FunctionCall::SearchRecords(params) => {
                let filter = normalize_filter(params.filter)?;
                let limit = normalize_limit(params.limit)?;
                let page = self
                    .records
                    .query(owner_id, &filter, PageRequest { offset: 0, limit })
                    .await?;
                Ok(Dispatched::Read(ReadOutput::Records { filter, page }))
            }
            FunctionCall::GetRecordDetail(params) => {
                let record_id = normalize_record_id(&params.record_id)?;
                let invoice = self.records.read(owner_id, &record_id).await?.ok_or_else(|| {
                    ActionError::validation("record_id", format!("{} was not found", record_id))
                })?;
                Ok(Dispatched::Read(ReadOutput::Detail(invoice)))
            }
            FunctionCall::GetSummaryStats(params) => {
                let filter = normalize_filter(params.filter)?;
                let (records, truncated) = self.scan(owner_id, &filter).await?;
                Ok(Dispatched::Read(ReadOutput::Summary(summarize(
                    filter, &records, truncated,
                ))))
            }
            FunctionCall::RankVendors(params) => {
                let filter = normalize_filter(params.filter)?;
                let limit = normalize_limit(params.limit)?;
                let (records, _) = self.scan(owner_id, &filter).await?;
                let standings = rank_vendors(&records, params.by, limit as usize);
                Ok(Dispatched::Read(ReadOutput::VendorRanking {
                    by: params.by,
                    standings,
                }))
            }
            FunctionCall::ProposeStatusChange(params) => {
                let record_id = normalize_record_id(&params.record_id)?;
                Ok(Dispatched::Proposal(ProposedAction {
                    record_id,
                    change: RequestedChange::StatusChange { to: params.to },
                }))
            }
            FunctionCall::ProposeNoteAppend(params) => {
                let record_id = normalize_record_id(&params.record_id)?;
                let note = normalize_note(&params.note)?;
                Ok(Dispatched::Proposal(ProposedAction {
                    record_id,
                    change: RequestedChange::NoteAppend { note },
                }))
            }
        }
    }

    async fn scan(
        &self,
        owner_id: &str,
        filter: &RecordFilter,
    ) -> Result<(Vec<Invoice>, bool), ActionError> {
        let mut records = Vec::new();
        let mut offset = 0u32;
        loop {
            let page = self
                .records
                .query(
                    owner_id,
                    filter,
                    PageRequest {
                        offset,
                        limit: SCAN_PAGE,
                    },
                )
                .await?;
            let fetched = page.records.len() as u32;
            records.extend(page.records);

            let seen = records.len() as u64;
            if seen >= SCAN_CAP {
                return Ok((records, page.total > seen));
            }
            if fetched < SCAN_PAGE || seen >= page.total {
                return Ok((records, false));
            }
            offset += fetched;
        }
    }
}

fn summarize(filter: RecordFilter, records: &[Invoice], truncated: bool) -> SummaryStats {
    let mut by_status: Vec<StatusBreakdown> = Vec::new();
    for status in InvoiceStatus::ALL {
        let matching = records.iter().filter(|r| r.status == status);
        let (count, total_cents) =
            matching.fold((0u64, 0i64), |(n, sum), r| (n + 1, sum + r.amount_cents));
        if count > 0 {
            by_status.push(StatusBreakdown {
                status,
                count,
                total_cents,
            });
        }
    }
    SummaryStats {
        filter,
        count: records.len() as u64,
        total_cents: records.iter().map(|r| r.amount_cents).sum(),
        by_status,
        truncated,
    }
}

fn rank_vendors(records: &[Invoice], by: RankBy, limit: usize) -> Vec<VendorStanding> {
    let mut vendors: HashMap<&str, VendorStanding> = HashMap::new();
    for record in records {
        let entry = vendors
            .entry(record.vendor.as_str())
            .or_insert_with(|| VendorStanding {
                vendor: record.vendor.clone(),
                invoice_count: 0,
                total_cents: 0,
            });
        entry.invoice_count += 1;
        entry.total_cents += record.amount_cents;
    }

    let mut standings: Vec<VendorStanding> = vendors.into_values().collect();
    standings.sort_by(|a, b| {
        let primary = match by {
            RankBy::Total => b.total_cents.cmp(&a.total_cents),
            RankBy::Count => b.invoice_count.cmp(&a.invoice_count),
        };
        primary.then_with(|| a.vendor.cmp(&b.vendor))
    });
    standings.truncate(limit);
    standings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::functions::params::{
        NoteAppendParams, RankVendorsParams, RecordDetailParams, SearchParams,
        StatusChangeParams, SummaryParams,
    };
    use crate::services::database::tests::invoice;
    use crate::services::database::Database;

    async fn dispatcher_with_invoices() -> (Dispatcher, Database) {
        let db = Database::new_in_memory().unwrap();
        for inv in [
            invoice("u1", "INV-100", "Acme Corp", 50_000, InvoiceStatus::Approved, "2026-09-10"),
            invoice("u1", "INV-101", "Acme Corp", 120_000, InvoiceStatus::Pending, "2026-09-20"),
            invoice("u1", "INV-102", "Globex", 30_000, InvoiceStatus::Pending, "2026-10-02"),
            invoice("u1", "INV-103", "Initech", 10_000, InvoiceStatus::Overdue, "2026-08-01"),
            invoice("u2", "INV-900", "Acme Corp", 999_900, InvoiceStatus::Pending, "2026-09-15"),
        ] {
            db.upsert_invoice(&inv).await.unwrap();
        }
        let store = GuardedStore::new(Arc::new(db.clone()), Duration::from_secs(3));
        (Dispatcher::new(store), db)
    }

    #[tokio::test]
    async fn test_search_is_scoped_to_owner() {
        let (dispatcher, _db) = dispatcher_with_invoices().await;
        let call = FunctionCall::SearchRecords(SearchParams {
            filter: RecordFilter {
                statuses: vec![InvoiceStatus::Pending],
                ..Default::default()
            },
            limit: None,
        });
        let Dispatched::Read(output) = dispatcher.dispatch("u1", call).await.unwrap() else {
            panic!("expected read");
        };
        assert_eq!(output.record_ids(), vec!["INV-102", "INV-101"]);
    }

    #[tokio::test]
    async fn test_invalid_params_fail_before_any_query() {
        let (dispatcher, _db) = dispatcher_with_invoices().await;
        let call = FunctionCall::SearchRecords(SearchParams {
            filter: RecordFilter::default(),
            limit: Some(500),
        });
        let err = dispatcher.dispatch("u1", call).await.unwrap_err();
        assert!(matches!(err, ActionError::Validation { ref field, .. } if field == "limit"));
    }

    #[tokio::test]
    async fn test_detail_for_other_owner_is_not_found() {
        let (dispatcher, _db) = dispatcher_with_invoices().await;
        let call = FunctionCall::GetRecordDetail(RecordDetailParams {
            record_id: "inv-900".to_string(),
        });
        let err = dispatcher.dispatch("u1", call).await.unwrap_err();
        assert!(matches!(err, ActionError::Validation { ref field, .. } if field == "record_id"));
    }

    #[tokio::test]
    async fn test_summary_breaks_down_by_status() {
        let (dispatcher, _db) = dispatcher_with_invoices().await;
        let call = FunctionCall::GetSummaryStats(SummaryParams::default());
        let Dispatched::Read(ReadOutput::Summary(stats)) =
            dispatcher.dispatch("u1", call).await.unwrap()
        else {
            panic!("expected summary");
        };
        assert_eq!(stats.count, 4);
        assert_eq!(stats.total_cents, 210_000);
        assert_eq!(
            stats.by_status[0],
            StatusBreakdown {
                status: InvoiceStatus::Pending,
                count: 2,
                total_cents: 150_000,
            }
        );
        assert!(!stats.truncated);
    }

    #[tokio::test]
    async fn test_rank_vendors_by_total_and_count() {
        let (dispatcher, _db) = dispatcher_with_invoices().await;
        let call = FunctionCall::RankVendors(RankVendorsParams {
            by: RankBy::Total,
            limit: Some(2),
            ..Default::default()
        });
        let Dispatched::Read(ReadOutput::VendorRanking { standings, .. }) =
            dispatcher.dispatch("u1", call).await.unwrap()
        else {
            panic!("expected ranking");
        };
        assert_eq!(standings.len(), 2);
        assert_eq!(standings[0].vendor, "Acme Corp");
        assert_eq!(standings[0].total_cents, 170_000);
        assert_eq!(standings[1].vendor, "Globex");
    }

    #[tokio::test]
    async fn test_writes_become_proposals_without_touching_records() {
        let (dispatcher, db) = dispatcher_with_invoices().await;
        let call = FunctionCall::ProposeStatusChange(StatusChangeParams {
            record_id: "inv-100".to_string(),
            to: InvoiceStatus::Paid,
        });
        let dispatched = dispatcher.dispatch("u1", call).await.unwrap();
        assert_eq!(
            dispatched,
            Dispatched::Proposal(ProposedAction {
                record_id: "INV-100".to_string(),
                change: RequestedChange::StatusChange {
                    to: InvoiceStatus::Paid
                },
            })
        );
        let record = db.get_invoice("u1", "INV-100").await.unwrap().unwrap();
        assert_eq!(record.status, InvoiceStatus::Approved);

        let call = FunctionCall::ProposeNoteAppend(NoteAppendParams {
            record_id: "INV-100".to_string(),
            note: "   ".to_string(),
        });
        assert!(dispatcher.dispatch("u1", call).await.is_err());
    }
}
