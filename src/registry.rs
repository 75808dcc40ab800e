//! Document registry view-model.
//!
//! Holds the authoritative document list, maps backend processing status to a
//! UI status and owns the re-poll timer that runs while anything is still
//! being processed.

use crate::api::models::{DocumentRecord, DocumentSummary};
use crate::api::HealthApi;
use crate::error::ApiError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

const SYNCED_STATUSES: &[&str] = &["processed", "completed", "ready", "synced"];
const PENDING_STATUSES: &[&str] = &["pending", "processing", "in_progress", "queued"];
const FAILED_STATUSES: &[&str] = &["failed", "error"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UiStatus {
    Pending,
    Synced,
    Failed,
}

impl UiStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, UiStatus::Pending)
    }

    pub fn label(self) -> &'static str {
        match self {
            UiStatus::Pending => "Processing",
            UiStatus::Synced => "Processed",
            UiStatus::Failed => "Failed",
        }
    }
}

/// Case-insensitive synonym lookup. Anything unrecognized, including a
/// missing status, is pending.
pub fn ui_status(processing_status: Option<&str>) -> UiStatus {
    let normalized = processing_status.unwrap_or_default().trim().to_lowercase();
    let status = normalized.as_str();
    if SYNCED_STATUSES.contains(&status) {
        UiStatus::Synced
    } else if FAILED_STATUSES.contains(&status) {
        UiStatus::Failed
    } else {
        if !status.is_empty() && !PENDING_STATUSES.contains(&status) {
            tracing::debug!("[Registry] Unrecognized processing status {:?}", status);
        }
        UiStatus::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub title: String,
    pub upload_date: Option<String>,
    pub status: UiStatus,
    pub raw_status: Option<String>,
    pub file_size: Option<u64>,
    pub page_count: Option<u32>,
    pub storage_path: Option<String>,
    /// Inserted locally after an upload; replaced by the next authoritative load.
    pub provisional: bool,
}

impl From<DocumentRecord> for Document {
    fn from(record: DocumentRecord) -> Self {
        let title = record
            .title
            .clone()
            .unwrap_or_else(|| record.filename.clone());
        Document {
            status: ui_status(record.processing_status.as_deref()),
            id: record.document_id,
            filename: record.filename,
            title,
            upload_date: record.upload_date,
            raw_status: record.processing_status,
            file_size: record.file_size,
            page_count: record.page_count,
            storage_path: record.gcs_path,
            provisional: false,
        }
    }
}

impl Document {
    pub fn upload_day(&self) -> Option<NaiveDate> {
        let raw = self.upload_date.as_deref()?.trim();
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.date_naive())
            .or_else(|_| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.date())
            })
            .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
            .ok()
    }

    pub fn display_date(&self) -> String {
        self.upload_day()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DocumentRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn HealthApi>,
    documents: RwLock<Vec<Document>>,
    loading: AtomicBool,
    poll_interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get_mut().take() {
            handle.abort();
        }
    }
}

impl DocumentRegistry {
    pub fn new(api: Arc<dyn HealthApi>, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                documents: RwLock::new(Vec::new()),
                loading: AtomicBool::new(false),
                poll_interval,
                poller: Mutex::new(None),
            }),
        }
    }

    pub fn documents(&self) -> Vec<Document> {
        self.inner.documents.read().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    /// True while any document has not reached a terminal status.
    pub fn has_pending(&self) -> bool {
        self.inner
            .documents
            .read()
            .iter()
            .any(|d| !d.status.is_terminal())
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .poller
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Fetch the list and start or stop polling to match it. Safe to call
    /// repeatedly; each successful response replaces the list wholesale.
    pub async fn load(&self) {
        self.fetch().await;
        self.sync_polling();
    }

    async fn fetch(&self) -> bool {
        self.inner.loading.store(true, Ordering::SeqCst);
        let result = self.inner.api.list_documents().await;
        self.inner.loading.store(false, Ordering::SeqCst);

        match result {
            Ok(records) => {
                let docs: Vec<Document> = records.into_iter().map(Document::from).collect();
                tracing::info!("[Registry] Loaded {} documents", docs.len());
                *self.inner.documents.write() = docs;
                true
            }
            Err(e) => {
                tracing::warn!("[Registry] Failed to load documents: {}", e);
                false
            }
        }
    }

    fn sync_polling(&self) {
        let mut poller = self.inner.poller.lock();
        let pending = self.has_pending();
        let running = poller.as_ref().is_some_and(|h| !h.is_finished());

        if pending && !running {
            tracing::debug!(
                "[Registry] Documents still processing, polling every {:?}",
                self.inner.poll_interval
            );
            let weak = Arc::downgrade(&self.inner);
            *poller = Some(tokio::spawn(poll_loop(weak, self.inner.poll_interval)));
        } else if !pending {
            if let Some(handle) = poller.take() {
                handle.abort();
            }
        }
    }

    pub fn stop_polling(&self) {
        if let Some(handle) = self.inner.poller.lock().take() {
            handle.abort();
        }
    }

    /// Show a just-uploaded document before the backend lists it.
    pub fn insert_provisional(&self, record: DocumentRecord) -> Document {
        let mut doc = Document::from(record);
        doc.provisional = true;
        let mut docs = self.inner.documents.write();
        docs.retain(|d| d.id != doc.id);
        docs.insert(0, doc.clone());
        doc
    }

    pub fn clear(&self) {
        self.stop_polling();
        self.inner.documents.write().clear();
    }

    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        match self.inner.api.delete_document(id).await {
            Ok(()) => {
                self.inner.documents.write().retain(|d| d.id != id);
                tracing::info!("[Registry] Deleted document {}", id);
                self.sync_polling();
                Ok(())
            }
            Err(e) => {
                tracing::warn!("[Registry] Failed to delete document {}: {}", id, e);
                Err(e)
            }
        }
    }

    pub async fn view_url(&self, id: &str) -> Result<String, ApiError> {
        self.inner.api.document_view_url(id).await
    }

    pub async fn summaries(&self) -> Result<Vec<DocumentSummary>, ApiError> {
        self.inner.api.list_summaries().await
    }

    pub async fn get(&self, id: &str) -> Result<Document, ApiError> {
        self.inner.api.get_document(id).await.map(Document::from)
    }
}

async fn poll_loop(inner: Weak<Inner>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let registry = DocumentRegistry { inner };
        registry.fetch().await;
        // Decided under the poller lock: a concurrent `sync_polling` either
        // sees this task still running or an empty slot it can refill.
        let done = {
            let mut poller = registry.inner.poller.lock();
            let done = !registry.has_pending();
            if done && poller.as_ref().is_some_and(|h| h.id() == tokio::task::id()) {
                poller.take();
            }
            done
        };
        if done {
            tracing::info!("[Registry] All documents processed, polling stopped");
            break;
        }
    }
}
