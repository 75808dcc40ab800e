//! Recording `HealthApi` double for coordinator tests.

use super::models::{
    ChatMessageRecord, ChatSummary, CreateNote, DocumentRecord, DocumentSummary, Note, NoteQuery,
    QueryRequest, QueryResponse, UpdateNote, UploadFile,
};
use super::HealthApi;
use crate::error::ApiError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;

/// `Err((status, detail))` becomes `ApiError::Api`.
pub type Scripted<T> = Result<T, (u16, String)>;

/// Responses are queued per route; the last one repeats once the queue drains.
struct Script<T> {
    queue: VecDeque<Scripted<T>>,
    last: Option<Scripted<T>>,
}

impl<T: Clone> Script<T> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            last: None,
        }
    }

    fn next(&mut self, default: impl FnOnce() -> T) -> Result<T, ApiError> {
        if let Some(next) = self.queue.pop_front() {
            self.last = Some(next);
        }
        match self.last.clone() {
            Some(Ok(v)) => Ok(v),
            Some(Err((status, detail))) => Err(ApiError::Api { status, detail }),
            None => Ok(default()),
        }
    }
}

pub fn record(id: &str, filename: &str, status: &str) -> DocumentRecord {
    DocumentRecord {
        document_id: id.to_string(),
        filename: filename.to_string(),
        processing_status: Some(status.to_string()),
        ..Default::default()
    }
}

pub fn answer(text: &str, chat_id: Option<&str>) -> QueryResponse {
    QueryResponse {
        answer: text.to_string(),
        sources: Vec::new(),
        chat_id: chat_id.map(str::to_string),
        chat_name: None,
    }
}

pub struct MockApi {
    calls: Mutex<HashMap<&'static str, usize>>,
    documents: Mutex<Script<Vec<DocumentRecord>>>,
    uploads: Mutex<Script<DocumentRecord>>,
    queries: Mutex<Script<QueryResponse>>,
    chat_messages: Mutex<Script<Vec<ChatMessageRecord>>>,
    chats: Mutex<Script<Vec<ChatSummary>>>,
    notes: Mutex<Script<Vec<Note>>>,
    delete_failure: Mutex<Option<(u16, String)>>,
    profile_failure: Mutex<Option<(u16, String)>>,
    pub query_log: Mutex<Vec<(String, Option<String>)>>,
    pub created_notes: Mutex<Vec<CreateNote>>,
    pub updated_notes: Mutex<Vec<(String, UpdateNote)>>,
    pub note_queries: Mutex<Vec<NoteQuery>>,
    query_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(HashMap::new()),
            documents: Mutex::new(Script::new()),
            uploads: Mutex::new(Script::new()),
            queries: Mutex::new(Script::new()),
            chat_messages: Mutex::new(Script::new()),
            chats: Mutex::new(Script::new()),
            notes: Mutex::new(Script::new()),
            delete_failure: Mutex::new(None),
            profile_failure: Mutex::new(None),
            query_log: Mutex::new(Vec::new()),
            created_notes: Mutex::new(Vec::new()),
            updated_notes: Mutex::new(Vec::new()),
            note_queries: Mutex::new(Vec::new()),
            query_gate: Mutex::new(None),
        })
    }

    fn hit(&self, route: &'static str) {
        *self.calls.lock().entry(route).or_insert(0) += 1;
    }

    pub fn calls(&self, route: &str) -> usize {
        self.calls.lock().get(route).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn push_documents(&self, response: Scripted<Vec<DocumentRecord>>) {
        self.documents.lock().queue.push_back(response);
    }

    pub fn push_upload(&self, response: Scripted<DocumentRecord>) {
        self.uploads.lock().queue.push_back(response);
    }

    pub fn push_query(&self, response: Scripted<QueryResponse>) {
        self.queries.lock().queue.push_back(response);
    }

    pub fn push_chat_messages(&self, response: Scripted<Vec<ChatMessageRecord>>) {
        self.chat_messages.lock().queue.push_back(response);
    }

    pub fn push_chats(&self, response: Scripted<Vec<ChatSummary>>) {
        self.chats.lock().queue.push_back(response);
    }

    pub fn push_notes(&self, response: Scripted<Vec<Note>>) {
        self.notes.lock().queue.push_back(response);
    }

    pub fn fail_next_delete(&self, status: u16, detail: &str) {
        *self.delete_failure.lock() = Some((status, detail.to_string()));
    }

    pub fn fail_profile(&self, status: u16, detail: &str) {
        *self.profile_failure.lock() = Some((status, detail.to_string()));
    }

    /// Hold every query until the returned handle is notified.
    pub fn gate_queries(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.query_gate.lock() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl HealthApi for MockApi {
    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, ApiError> {
        self.hit("list_documents");
        self.documents.lock().next(Vec::new)
    }

    async fn get_document(&self, id: &str) -> Result<DocumentRecord, ApiError> {
        self.hit("get_document");
        Ok(record(id, &format!("{}.pdf", id), "ready"))
    }

    async fn upload_document(&self, file: &UploadFile) -> Result<DocumentRecord, ApiError> {
        self.hit("upload_document");
        let filename = file.filename.clone();
        self.uploads
            .lock()
            .next(|| record("uploaded", &filename, "pending"))
    }

    async fn delete_document(&self, _id: &str) -> Result<(), ApiError> {
        self.hit("delete_document");
        match self.delete_failure.lock().take() {
            Some((status, detail)) => Err(ApiError::Api { status, detail }),
            None => Ok(()),
        }
    }

    async fn document_view_url(&self, id: &str) -> Result<String, ApiError> {
        self.hit("document_view_url");
        Ok(format!("http://mock/documents/{}/view?token=t", id))
    }

    async fn list_summaries(&self) -> Result<Vec<DocumentSummary>, ApiError> {
        self.hit("list_summaries");
        Ok(Vec::new())
    }

    async fn query(
        &self,
        request: &QueryRequest,
        chat_id: Option<&str>,
    ) -> Result<QueryResponse, ApiError> {
        self.hit("query");
        self.query_log
            .lock()
            .push((request.question.clone(), chat_id.map(str::to_string)));
        let gate = self.query_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.queries.lock().next(QueryResponse::default)
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ApiError> {
        self.hit("list_chats");
        self.chats.lock().next(Vec::new)
    }

    async fn chat_messages(&self, _chat_id: &str) -> Result<Vec<ChatMessageRecord>, ApiError> {
        self.hit("chat_messages");
        self.chat_messages.lock().next(Vec::new)
    }

    async fn list_notes(&self, query: &NoteQuery) -> Result<Vec<Note>, ApiError> {
        self.hit("list_notes");
        self.note_queries.lock().push(query.clone());
        self.notes.lock().next(Vec::new)
    }

    async fn create_note(&self, note: &CreateNote) -> Result<Note, ApiError> {
        self.hit("create_note");
        self.created_notes.lock().push(note.clone());
        Ok(Note {
            note_id: format!("note-{}", self.calls("create_note")),
            content: note.content.clone(),
            tags: note.tags.clone(),
            order: 0,
            created_at: None,
            updated_at: None,
            pinned_message_id: note.pinned_message_id.clone(),
            chat_id: note.chat_id.clone(),
            chat_name: note.chat_name.clone(),
        })
    }

    async fn update_note(&self, id: &str, update: &UpdateNote) -> Result<Note, ApiError> {
        self.hit("update_note");
        self.updated_notes
            .lock()
            .push((id.to_string(), update.clone()));
        Ok(Note {
            note_id: id.to_string(),
            content: update.content.clone().unwrap_or_default(),
            tags: update.tags.clone().unwrap_or_default(),
            order: update.order.unwrap_or(0),
            created_at: None,
            updated_at: None,
            pinned_message_id: None,
            chat_id: None,
            chat_name: None,
        })
    }

    async fn delete_note(&self, _id: &str) -> Result<(), ApiError> {
        self.hit("delete_note");
        Ok(())
    }

    async fn ensure_profile(&self) -> Result<serde_json::Value, ApiError> {
        self.hit("ensure_profile");
        match self.profile_failure.lock().clone() {
            Some((status, detail)) => Err(ApiError::Api { status, detail }),
            None => Ok(serde_json::json!({"user_id": "uid"})),
        }
    }
}
