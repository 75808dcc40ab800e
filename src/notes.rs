//! Notes board: free-form notes with tags, including messages pinned from chat.

use crate::api::models::{CreateNote, Note, NoteQuery, UpdateNote};
use crate::api::HealthApi;
use crate::error::ApiError;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum NotesError {
    #[error("Note content cannot be empty.")]
    EmptyContent,
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Serialize for NotesError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Split a comma-separated tag field, dropping blanks and repeats.
pub fn parse_tags(input: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

pub struct NotesBoard {
    api: Arc<dyn HealthApi>,
    notes: Mutex<Vec<Note>>,
}

impl NotesBoard {
    pub fn new(api: Arc<dyn HealthApi>) -> Self {
        Self {
            api,
            notes: Mutex::new(Vec::new()),
        }
    }

    /// Notes from the last successful `list`, in board order.
    pub fn notes(&self) -> Vec<Note> {
        self.notes.lock().clone()
    }

    pub fn clear(&self) {
        self.notes.lock().clear();
    }

    pub fn all_tags(&self) -> Vec<String> {
        self.notes
            .lock()
            .iter()
            .flat_map(|n| n.tags.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub async fn list(&self, search: Option<&str>, tags: &[String]) -> Result<Vec<Note>, NotesError> {
        let query = NoteQuery {
            search: search
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            tags: (!tags.is_empty()).then(|| tags.join(",")),
        };
        let mut notes = self.api.list_notes(&query).await?;
        notes.sort_by_key(|n| n.order);
        tracing::debug!("[Notes] Loaded {} notes", notes.len());
        *self.notes.lock() = notes.clone();
        Ok(notes)
    }

    pub async fn create(&self, content: &str, tags: Vec<String>) -> Result<Note, NotesError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(NotesError::EmptyContent);
        }
        let note = self
            .api
            .create_note(&CreateNote {
                content: content.to_string(),
                tags,
                ..Default::default()
            })
            .await?;
        tracing::info!("[Notes] Created note {}", note.note_id);
        self.notes.lock().push(note.clone());
        Ok(note)
    }

    pub async fn update(
        &self,
        id: &str,
        content: Option<&str>,
        tags: Option<Vec<String>>,
    ) -> Result<Note, NotesError> {
        let content = content.map(str::trim);
        if content.is_some_and(str::is_empty) {
            return Err(NotesError::EmptyContent);
        }
        let update = UpdateNote {
            content: content.map(str::to_string),
            tags,
            order: None,
        };
        let note = self.api.update_note(id, &update).await?;
        if let Some(existing) = self.notes.lock().iter_mut().find(|n| n.note_id == id) {
            *existing = note.clone();
        }
        Ok(note)
    }

    /// Persist a new board order after a drag; `ids` is the full order.
    pub async fn reorder(&self, ids: &[String]) -> Result<(), NotesError> {
        for (index, id) in ids.iter().enumerate() {
            let order = index as i64;
            let current = self
                .notes
                .lock()
                .iter()
                .find(|n| &n.note_id == id)
                .map(|n| n.order);
            if current == Some(order) {
                continue;
            }
            let update = UpdateNote {
                order: Some(order),
                ..Default::default()
            };
            self.api.update_note(id, &update).await?;
            if let Some(note) = self.notes.lock().iter_mut().find(|n| &n.note_id == id) {
                note.order = order;
            }
        }
        self.notes.lock().sort_by_key(|n| n.order);
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), NotesError> {
        self.api.delete_note(id).await?;
        self.notes.lock().retain(|n| n.note_id != id);
        tracing::info!("[Notes] Deleted note {}", id);
        Ok(())
    }
}
