//! Chat session coordinator.
//!
//! Keeps the ordered transcript and the active chat id, which survives
//! restarts through the key-value store. A send appends the user turn before
//! the request goes out and always appends exactly one assistant turn when it
//! settles, success or not.

use crate::api::models::{ChatMessageRecord, ChatSummary, CreateNote, QueryRequest, SourceRecord};
use crate::api::HealthApi;
use crate::error::ApiError;
use crate::store::{KeyValueStore, CHAT_ID_KEY, CHAT_NAME_KEY};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DEFAULT_TOP_K: u32 = 5;

const EMPTY_ANSWER_FALLBACK: &str = "I reviewed your records and generated a response.";
const QUERY_ERROR_FALLBACK: &str = "Sorry, something went wrong retrieving your medical insights.";

pub const SUGGESTION_PROMPTS: &[&str] = &[
    "Summarize my latest labs",
    "Explain my diagnosis",
    "Create a follow-up plan",
    "What questions should I ask my doctor?",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// History uses `assistant`; older clients stored `ai`.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("user") {
            Role::User
        } else {
            Role::Assistant
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_id: String,
    pub page: Option<u32>,
}

impl SourceRef {
    fn from_record(source: &SourceRecord) -> Option<Self> {
        Some(SourceRef {
            document_id: source.resolved_document_id()?,
            page: source.page_number(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub sources: Vec<SourceRef>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>, sources: Vec<SourceRef>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            sources,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, Vec::new())
    }

    pub fn assistant(content: impl Into<String>, sources: Vec<SourceRef>) -> Self {
        Self::new(Role::Assistant, content, sources)
    }

    /// One citation per document, keeping the first page seen.
    pub fn unique_sources(&self) -> Vec<SourceRef> {
        let mut seen = Vec::<SourceRef>::new();
        for source in &self.sources {
            if !seen.iter().any(|s| s.document_id == source.document_id) {
                seen.push(source.clone());
            }
        }
        seen
    }
}

impl From<ChatMessageRecord> for Message {
    fn from(record: ChatMessageRecord) -> Self {
        let timestamp = record
            .timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Message {
            id: record
                .message_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            role: Role::parse(&record.role),
            content: record.content,
            sources: record
                .sources
                .iter()
                .filter_map(SourceRef::from_record)
                .collect(),
            timestamp,
        }
    }
}

/// Local, unsaved reactions to a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Annotations {
    pub liked: bool,
    pub disliked: bool,
    pub pinned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPhase {
    Idle,
    AwaitingResponse,
}

#[derive(Default)]
struct ChatState {
    chat_id: Option<String>,
    chat_name: Option<String>,
    messages: Vec<Message>,
    annotations: HashMap<String, Annotations>,
    /// Bumped by new-chat and resume so a late answer from the previous
    /// thread is not appended to the new one.
    generation: u64,
}

struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ChatSession {
    api: Arc<dyn HealthApi>,
    store: Arc<dyn KeyValueStore>,
    state: Mutex<ChatState>,
    loading: AtomicBool,
    top_k: u32,
}

impl ChatSession {
    /// Picks up the chat id and name persisted by a previous run.
    pub fn new(api: Arc<dyn HealthApi>, store: Arc<dyn KeyValueStore>) -> Self {
        let read = |key: &str| match store.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!("[Chat] Could not read {}: {}", key, e);
                None
            }
        };
        let state = ChatState {
            chat_id: read(CHAT_ID_KEY),
            chat_name: read(CHAT_NAME_KEY),
            ..Default::default()
        };
        if let Some(id) = &state.chat_id {
            tracing::info!("[Chat] Resuming persisted chat {}", id);
        }
        Self {
            api,
            store,
            state: Mutex::new(state),
            loading: AtomicBool::new(false),
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    pub fn chat_id(&self) -> Option<String> {
        self.state.lock().chat_id.clone()
    }

    pub fn chat_name(&self) -> Option<String> {
        self.state.lock().chat_name.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> ChatPhase {
        if self.is_loading() {
            ChatPhase::AwaitingResponse
        } else {
            ChatPhase::Idle
        }
    }

    fn persist(&self, key: &str, value: Option<&str>) {
        let result = match value {
            Some(v) => self.store.set(key, v),
            None => self.store.remove(key),
        };
        if let Err(e) = result {
            tracing::warn!("[Chat] Could not persist {}: {}", key, e);
        }
    }

    fn append(&self, message: Message) {
        self.state.lock().messages.push(message);
    }

    /// Send one user turn. Returns the assistant reply, or `None` when the
    /// text is blank or a previous send is still outstanding.
    pub async fn send(&self, text: &str) -> Option<Message> {
        let question = text.trim();
        if question.is_empty() {
            return None;
        }
        if self.loading.swap(true, Ordering::SeqCst) {
            tracing::debug!("[Chat] Send ignored while awaiting a response");
            return None;
        }
        let _guard = LoadingGuard(&self.loading);

        let (chat_id, generation) = {
            let mut state = self.state.lock();
            state.messages.push(Message::user(question));
            (state.chat_id.clone(), state.generation)
        };
        tracing::debug!("[Chat] Query with chat id {:?}", chat_id);

        let request = QueryRequest {
            question: question.to_string(),
            top_k: self.top_k,
        };
        let result = self.api.query(&request, chat_id.as_deref()).await;

        if self.state.lock().generation != generation {
            tracing::info!("[Chat] Dropping reply for a chat that was reset");
            return None;
        }

        let reply = match result {
            Ok(resp) => {
                if let Some(id) = resp.chat_id.as_deref().filter(|id| !id.is_empty()) {
                    self.state.lock().chat_id = Some(id.to_string());
                    self.persist(CHAT_ID_KEY, Some(id));
                    tracing::info!("[Chat] Active chat id {}", id);
                }
                if let Some(name) = resp.chat_name.as_deref().filter(|n| !n.is_empty()) {
                    self.state.lock().chat_name = Some(name.to_string());
                    self.persist(CHAT_NAME_KEY, Some(name));
                }
                let answer = if resp.answer.trim().is_empty() {
                    EMPTY_ANSWER_FALLBACK.to_string()
                } else {
                    resp.answer
                };
                let sources = resp
                    .sources
                    .iter()
                    .filter_map(SourceRef::from_record)
                    .collect();
                Message::assistant(answer, sources)
            }
            Err(e) => {
                tracing::error!("[Chat] Query failed: {}", e);
                Message::assistant(e.user_message(QUERY_ERROR_FALLBACK), Vec::new())
            }
        };

        self.append(reply.clone());
        Some(reply)
    }

    /// Forget the current thread; the next send starts a new one server-side.
    pub fn new_chat(&self) {
        {
            let mut state = self.state.lock();
            state.messages.clear();
            state.annotations.clear();
            state.chat_id = None;
            state.chat_name = None;
            state.generation += 1;
        }
        self.persist(CHAT_ID_KEY, None);
        self.persist(CHAT_NAME_KEY, None);
        tracing::info!("[Chat] Started new chat");
    }

    /// Replace the transcript with a chat picked from history.
    pub async fn resume(&self, chat_id: &str, chat_name: Option<&str>) -> Result<(), ApiError> {
        let records = match self.api.chat_messages(chat_id).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("[Chat] Failed to load chat {}: {}", chat_id, e);
                return Err(e);
            }
        };
        let messages: Vec<Message> = records.into_iter().map(Message::from).collect();
        let name = chat_name
            .filter(|n| !n.is_empty())
            .unwrap_or("Chat")
            .to_string();
        tracing::info!("[Chat] Resumed chat {} ({} messages)", chat_id, messages.len());
        {
            let mut state = self.state.lock();
            state.messages = messages;
            state.annotations.clear();
            state.chat_id = Some(chat_id.to_string());
            state.chat_name = Some(name.clone());
            state.generation += 1;
        }
        self.persist(CHAT_ID_KEY, Some(chat_id));
        self.persist(CHAT_NAME_KEY, Some(&name));
        Ok(())
    }

    /// Drop in-memory state without touching persisted keys, for sign-out.
    pub fn reset_in_memory(&self) {
        let mut state = self.state.lock();
        state.messages.clear();
        state.annotations.clear();
        state.chat_id = None;
        state.chat_name = None;
        state.generation += 1;
    }

    pub async fn history(&self) -> Result<Vec<ChatSummary>, ApiError> {
        self.api.list_chats().await
    }

    pub fn annotations(&self, message_id: &str) -> Annotations {
        self.state
            .lock()
            .annotations
            .get(message_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn toggle_like(&self, message_id: &str) -> Annotations {
        let mut state = self.state.lock();
        let entry = state.annotations.entry(message_id.to_string()).or_default();
        entry.liked = !entry.liked;
        if entry.liked {
            entry.disliked = false;
        }
        *entry
    }

    pub fn toggle_dislike(&self, message_id: &str) -> Annotations {
        let mut state = self.state.lock();
        let entry = state.annotations.entry(message_id.to_string()).or_default();
        entry.disliked = !entry.disliked;
        if entry.disliked {
            entry.liked = false;
        }
        *entry
    }

    /// Pin a message to the notes board, or unpin it locally if already pinned.
    pub async fn toggle_pin(&self, message_id: &str) -> Result<Annotations, ApiError> {
        let (message, chat_id, chat_name, pinned) = {
            let state = self.state.lock();
            let message = state.messages.iter().find(|m| m.id == message_id).cloned();
            let pinned = state
                .annotations
                .get(message_id)
                .is_some_and(|a| a.pinned);
            (message, state.chat_id.clone(), state.chat_name.clone(), pinned)
        };

        if !pinned {
            let Some(message) = message else {
                return Ok(self.annotations(message_id));
            };
            let note = CreateNote {
                content: message.content,
                tags: vec!["pinned".to_string(), "from-chat".to_string()],
                pinned_message_id: Some(message.id),
                chat_id,
                chat_name: Some(chat_name.unwrap_or_else(|| "Chat".to_string())),
            };
            self.api.create_note(&note).await.map_err(|e| {
                tracing::warn!("[Chat] Failed to pin message {}: {}", message_id, e);
                e
            })?;
        }

        let mut state = self.state.lock();
        let entry = state.annotations.entry(message_id.to_string()).or_default();
        entry.pinned = !pinned;
        Ok(*entry)
    }

    /// Titles for the documents a message cites; lookups that fail read "Document".
    pub async fn source_titles(&self, message: &Message) -> HashMap<String, String> {
        let ids: Vec<String> = message
            .unique_sources()
            .into_iter()
            .map(|s| s.document_id)
            .collect();
        let lookups = ids.iter().map(|id| self.api.get_document(id));
        let results = join_all(lookups).await;

        ids.into_iter()
            .zip(results)
            .map(|(id, result)| {
                let title = match result {
                    Ok(doc) => doc.title.unwrap_or(doc.filename),
                    Err(e) => {
                        tracing::warn!("[Chat] Failed to fetch document {}: {}", id, e);
                        "Document".to_string()
                    }
                };
                (id, title)
            })
            .collect()
    }
}

/// Case-insensitive title filter for the history list.
pub fn filter_chats<'a>(chats: &'a [ChatSummary], query: &str) -> Vec<&'a ChatSummary> {
    let needle = query.trim().to_lowercase();
    chats
        .iter()
        .filter(|c| needle.is_empty() || c.display_title().to_lowercase().contains(&needle))
        .collect()
}
