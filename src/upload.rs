//! Upload coordinator: client-side checks, multipart submission and the
//! staged progress shown while the backend picks the file up.

use crate::api::models::UploadFile;
use crate::api::HealthApi;
use crate::registry::{Document, DocumentRegistry};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const PDF_MIME: &str = "application/pdf";

/// Pause before reporting `Processing`, so the stage does not flash by.
pub const PROCESSING_STAGE_DELAY: Duration = Duration::from_millis(1000);

const UPLOAD_FALLBACK: &str = "Upload failed. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStage {
    Uploading,
    Processing,
    Complete,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Please upload a PDF document.")]
    NotPdf,
    #[error("File is too large. Maximum size is {limit_mb} MB.")]
    TooLarge { size: u64, limit_mb: u64 },
    #[error("An upload is already in progress.")]
    Busy,
    #[error("Could not read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Failed(String),
}

impl Serialize for UploadError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Read a file from disk, inferring its type from the extension.
pub fn read_upload(path: &Path) -> Result<UploadFile, UploadError> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let content_type = match ext.as_str() {
        "pdf" => PDF_MIME,
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    };
    let bytes = std::fs::read(path)?;
    Ok(UploadFile::new(filename, content_type, bytes))
}

/// Clears the in-progress flag however the upload ends.
struct UploadingGuard<'a>(&'a AtomicBool);

impl Drop for UploadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct UploadCoordinator {
    api: Arc<dyn HealthApi>,
    registry: DocumentRegistry,
    max_bytes: u64,
    stage_delay: Duration,
    uploading: AtomicBool,
    error: Mutex<Option<String>>,
}

impl UploadCoordinator {
    pub fn new(api: Arc<dyn HealthApi>, registry: DocumentRegistry, max_bytes: u64) -> Self {
        Self {
            api,
            registry,
            max_bytes,
            stage_delay: PROCESSING_STAGE_DELAY,
            uploading: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }

    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        self.stage_delay = delay;
        self
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst)
    }

    /// Message from the last rejected or failed upload.
    pub fn last_error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    /// UX checks only; the backend validates again.
    pub fn validate(&self, file: &UploadFile) -> Result<(), UploadError> {
        if file.content_type != PDF_MIME {
            return Err(UploadError::NotPdf);
        }
        if file.size() > self.max_bytes {
            return Err(UploadError::TooLarge {
                size: file.size(),
                limit_mb: self.max_bytes / (1024 * 1024),
            });
        }
        Ok(())
    }

    pub async fn upload(
        &self,
        file: UploadFile,
        on_stage: impl Fn(UploadStage) + Send,
    ) -> Result<Document, UploadError> {
        if let Err(e) = self.validate(&file) {
            tracing::info!("[Upload] Rejected {}: {}", file.filename, e);
            *self.error.lock() = Some(e.to_string());
            return Err(e);
        }
        if self.uploading.swap(true, Ordering::SeqCst) {
            return Err(UploadError::Busy);
        }
        let _guard = UploadingGuard(&self.uploading);
        *self.error.lock() = None;

        on_stage(UploadStage::Uploading);
        tracing::info!("[Upload] Uploading {} ({} bytes)", file.filename, file.size());

        let record = match self.api.upload_document(&file).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("[Upload] Upload of {} failed: {}", file.filename, e);
                let message = e.user_message(UPLOAD_FALLBACK);
                *self.error.lock() = Some(message.clone());
                return Err(UploadError::Failed(message));
            }
        };

        tokio::time::sleep(self.stage_delay).await;
        on_stage(UploadStage::Processing);

        let doc = self.registry.insert_provisional(record);
        tracing::info!("[Upload] Uploaded {} as {}", doc.filename, doc.id);
        self.registry.load().await;

        on_stage(UploadStage::Complete);
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{record, MockApi};
    use crate::config::{MAX_UPLOAD_BYTES, POLL_INTERVAL};

    fn coordinator(api: Arc<MockApi>) -> (UploadCoordinator, DocumentRegistry) {
        let registry = DocumentRegistry::new(api.clone(), POLL_INTERVAL);
        let uploads = UploadCoordinator::new(api, registry.clone(), MAX_UPLOAD_BYTES);
        (uploads, registry)
    }

    fn pdf(size: usize) -> UploadFile {
        UploadFile::new("labs.pdf", PDF_MIME, vec![0u8; size])
    }

    #[tokio::test]
    async fn non_pdf_is_rejected_without_network() {
        let api = MockApi::new();
        let (uploads, _) = coordinator(api.clone());

        let file = UploadFile::new("photo.png", "image/png", vec![1, 2, 3]);
        let err = uploads.upload(file, |_| {}).await.unwrap_err();
        assert!(matches!(err, UploadError::NotPdf));
        assert_eq!(api.total_calls(), 0);
        assert_eq!(
            uploads.last_error().as_deref(),
            Some("Please upload a PDF document.")
        );
        assert!(!uploads.is_uploading());
    }

    #[test]
    fn size_ceiling_is_inclusive() {
        let api = MockApi::new();
        let (uploads, _) = coordinator(api);
        let limit = MAX_UPLOAD_BYTES as usize;

        assert!(uploads.validate(&pdf(limit)).is_ok());
        let err = uploads.validate(&pdf(limit + 1)).unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { limit_mb: 15, .. }));
        assert_eq!(err.to_string(), "File is too large. Maximum size is 15 MB.");
    }

    #[tokio::test]
    async fn oversized_upload_makes_no_calls() {
        let api = MockApi::new();
        let (uploads, _) = coordinator(api.clone());
        let err = uploads
            .upload(pdf(MAX_UPLOAD_BYTES as usize + 1), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { .. }));
        assert_eq!(api.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_walks_every_stage_and_refreshes() {
        let api = MockApi::new();
        api.push_upload(Ok(record("d-new", "labs.pdf", "pending")));
        api.push_documents(Ok(vec![record("d-new", "labs.pdf", "processed")]));
        let (uploads, registry) = coordinator(api.clone());

        let stages = Mutex::new(Vec::new());
        let doc = uploads
            .upload(pdf(1024), |stage| stages.lock().push(stage))
            .await
            .unwrap();

        assert_eq!(doc.id, "d-new");
        assert!(doc.provisional);
        assert_eq!(
            *stages.lock(),
            vec![
                UploadStage::Uploading,
                UploadStage::Processing,
                UploadStage::Complete
            ]
        );
        assert_eq!(api.calls("upload_document"), 1);
        assert_eq!(api.calls("list_documents"), 1);
        let docs = registry.documents();
        assert_eq!(docs.len(), 1);
        assert!(!docs[0].provisional);
        assert!(!uploads.is_uploading());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_surfaces_server_detail_and_resets() {
        let api = MockApi::new();
        api.push_upload(Err((400, "Only PDF files allowed".into())));
        let (uploads, registry) = coordinator(api.clone());

        let stages = Mutex::new(Vec::new());
        let err = uploads
            .upload(pdf(10), |stage| stages.lock().push(stage))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Only PDF files allowed");
        assert_eq!(*stages.lock(), vec![UploadStage::Uploading]);
        assert!(!uploads.is_uploading());
        assert_eq!(api.calls("list_documents"), 0);
        assert!(registry.documents().is_empty());
        assert_eq!(
            uploads.last_error().as_deref(),
            Some("Only PDF files allowed")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_error_body_uses_generic_message() {
        let api = MockApi::new();
        api.push_upload(Err((500, String::new())));
        let (uploads, _) = coordinator(api);
        let err = uploads.upload(pdf(10), |_| {}).await.unwrap_err();
        assert_eq!(err.to_string(), UPLOAD_FALLBACK);
    }

    #[test]
    fn read_upload_infers_pdf_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Report.PDF");
        std::fs::write(&path, b"%PDF-1.7").unwrap();
        let file = read_upload(&path).unwrap();
        assert_eq!(file.filename, "Report.PDF");
        assert_eq!(file.content_type, PDF_MIME);
        assert_eq!(file.size(), 8);
    }
}
