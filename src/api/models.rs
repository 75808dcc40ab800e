use serde::{Deserialize, Serialize};

/// A document as the backend reports it, normalized to one canonical shape.
///
/// Older routes used `id`, `uploaded_at`, `created_at`, `size` and `pages`;
/// those are folded in here so nothing past the transport sees them.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(from = "RawDocumentRecord")]
pub struct DocumentRecord {
    pub document_id: String,
    pub filename: String,
    pub title: Option<String>,
    pub upload_date: Option<String>,
    pub processing_status: Option<String>,
    pub file_size: Option<u64>,
    pub page_count: Option<u32>,
    pub gcs_path: Option<String>,
}

#[derive(Deserialize)]
struct RawDocumentRecord {
    document_id: Option<String>,
    id: Option<String>,
    filename: Option<String>,
    title: Option<String>,
    upload_date: Option<String>,
    uploaded_at: Option<String>,
    created_at: Option<String>,
    processing_status: Option<String>,
    file_size: Option<u64>,
    size: Option<u64>,
    page_count: Option<u32>,
    pages: Option<u32>,
    gcs_path: Option<String>,
}

impl From<RawDocumentRecord> for DocumentRecord {
    fn from(raw: RawDocumentRecord) -> Self {
        DocumentRecord {
            document_id: raw.document_id.or(raw.id).unwrap_or_default(),
            filename: raw.filename.unwrap_or_else(|| "unknown.pdf".to_string()),
            title: raw.title.filter(|t| !t.trim().is_empty()),
            upload_date: raw.upload_date.or(raw.uploaded_at).or(raw.created_at),
            processing_status: raw.processing_status,
            file_size: raw.file_size.or(raw.size),
            page_count: raw.page_count.or(raw.pages),
            gcs_path: raw.gcs_path.filter(|p| !p.is_empty()),
        }
    }
}

/// `/documents/list` has answered both with a bare array and with a wrapper.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DocumentList {
    Bare(Vec<DocumentRecord>),
    /// `documents` is required so an error body is not read as an empty list.
    Wrapped { documents: Vec<DocumentRecord> },
}

impl DocumentList {
    pub fn into_records(self) -> Vec<DocumentRecord> {
        match self {
            DocumentList::Bare(docs) | DocumentList::Wrapped { documents: docs } => docs,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DocumentSummary {
    #[serde(alias = "document_id")]
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub processing_status: Option<String>,
    #[serde(default)]
    pub chunk_count: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SummaryList {
    #[serde(default)]
    pub documents: Vec<DocumentSummary>,
}

/// A file ready to be sent to `/documents/upload`.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryRequest {
    pub question: String,
    pub top_k: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct QueryResponse {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<SourceRecord>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub chat_name: Option<String>,
}

/// A retrieved chunk cited by an answer.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SourceRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl SourceRecord {
    pub fn page_number(&self) -> Option<u32> {
        match self.metadata.get("page_number")? {
            serde_json::Value::Number(n) => n.as_u64().map(|n| n as u32),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Document id, falling back to the one stored in chunk metadata.
    pub fn resolved_document_id(&self) -> Option<String> {
        self.document_id.clone().or_else(|| {
            self.metadata
                .get("document_id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatSummary {
    pub chat_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub message_count: u32,
}

impl ChatSummary {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("New Chat")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatMessageRecord {
    #[serde(default, alias = "id")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub sources: Vec<SourceRecord>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Note {
    pub note_id: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub pinned_message_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub chat_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CreateNote {
    pub content: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinned_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct UpdateNote {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

/// Filters for `GET /notes`.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct NoteQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}
