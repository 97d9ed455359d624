//! Contract with the external invoice store.
//!
//! Every call carries the caller's identity; implementations must never
//! return or touch records belonging to another owner.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ActionError;
use crate::models::{Invoice, InvoiceStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<InvoiceStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vendors: Vec<String>,
    /// Inclusive, in dollars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_max: Option<f64>,
    /// Inclusive bounds on the issue date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        self == &RecordFilter::default()
    }

    pub fn amount_min_cents(&self) -> Option<i64> {
        self.amount_min.map(dollars_to_cents)
    }

    pub fn amount_max_cents(&self) -> Option<i64> {
        self.amount_max.map(dollars_to_cents)
    }
}

pub fn dollars_to_cents(dollars: f64) -> i64 {
    (dollars * 100.0).round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordPage {
    pub records: Vec<Invoice>,
    /// Total matching records, ignoring paging.
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPatch {
    SetStatus { status: InvoiceStatus },
    AppendNote { note: String },
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn read(&self, owner_id: &str, id: &str) -> Result<Option<Invoice>, StoreError>;

    async fn query(
        &self,
        owner_id: &str,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<RecordPage, StoreError>;

    async fn write(
        &self,
        owner_id: &str,
        id: &str,
        patch: &RecordPatch,
    ) -> Result<Invoice, StoreError>;
}

const READ_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Wraps a `RecordStore` with the storage timeout and the single read retry.
/// Writes are never retried so a slow write can't be applied twice.
#[derive(Clone)]
pub struct GuardedStore {
    inner: Arc<dyn RecordStore>,
    timeout: Duration,
}

impl GuardedStore {
    pub fn new(inner: Arc<dyn RecordStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub async fn read(&self, owner_id: &str, id: &str) -> Result<Option<Invoice>, ActionError> {
        let inner = self.inner.as_ref();
        self.with_retry("read", move || inner.read(owner_id, id))
            .await
    }

    pub async fn query(
        &self,
        owner_id: &str,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<RecordPage, ActionError> {
        let inner = self.inner.as_ref();
        self.with_retry("query", move || inner.query(owner_id, filter, page))
            .await
    }

    pub async fn write(
        &self,
        owner_id: &str,
        id: &str,
        patch: &RecordPatch,
    ) -> Result<Invoice, ActionError> {
        match tokio::time::timeout(self.timeout, self.inner.write(owner_id, id, patch)).await {
            Ok(Ok(invoice)) => Ok(invoice),
            Ok(Err(StoreError::NotFound(id))) => {
                Err(ActionError::validation("record_id", format!("{} was not found", id)))
            }
            Ok(Err(e)) => Err(ActionError::storage(e)),
            Err(_) => Err(ActionError::storage(format!(
                "write timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, call: F) -> Result<T, ActionError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut last_error = String::new();
        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(READ_RETRY_BACKOFF).await;
            }
            match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(StoreError::NotFound(id))) => {
                    return Err(ActionError::validation(
                        "record_id",
                        format!("{} was not found", id),
                    ))
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("{} timed out after {}ms", op, self.timeout.as_millis())
                }
            }
            tracing::warn!(op, attempt, error = %last_error, "Record storage call failed");
        }
        Err(ActionError::storage(last_error))
    }
}
