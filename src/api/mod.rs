pub mod models;

#[cfg(test)]
pub(crate) mod mock;

use crate::config::normalize_base_url;
use crate::error::ApiError;
use async_trait::async_trait;
use models::{
    ChatMessageRecord, ChatSummary, CreateNote, DocumentList, DocumentRecord, DocumentSummary,
    Note, NoteQuery, QueryRequest, QueryResponse, SummaryList, UpdateNote, UploadFile,
};
use reqwest::{multipart, Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Supplies the bearer token for outbound requests.
///
/// Tokens may be stale; callers retry the enclosing request rather than cache.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Option<String>;
}

/// A fixed token, for scripts and tests.
pub struct StaticToken(pub Option<String>);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Every backend route the client uses. Coordinators hold an
/// `Arc<dyn HealthApi>` so they can run against a mock.
#[async_trait]
pub trait HealthApi: Send + Sync {
    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, ApiError>;
    async fn get_document(&self, id: &str) -> Result<DocumentRecord, ApiError>;
    async fn upload_document(&self, file: &UploadFile) -> Result<DocumentRecord, ApiError>;
    async fn delete_document(&self, id: &str) -> Result<(), ApiError>;
    async fn document_view_url(&self, id: &str) -> Result<String, ApiError>;
    async fn list_summaries(&self) -> Result<Vec<DocumentSummary>, ApiError>;
    async fn query(
        &self,
        request: &QueryRequest,
        chat_id: Option<&str>,
    ) -> Result<QueryResponse, ApiError>;
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ApiError>;
    async fn chat_messages(&self, chat_id: &str) -> Result<Vec<ChatMessageRecord>, ApiError>;
    async fn list_notes(&self, query: &NoteQuery) -> Result<Vec<Note>, ApiError>;
    async fn create_note(&self, note: &CreateNote) -> Result<Note, ApiError>;
    async fn update_note(&self, id: &str, update: &UpdateNote) -> Result<Note, ApiError>;
    async fn delete_note(&self, id: &str) -> Result<(), ApiError>;
    async fn ensure_profile(&self) -> Result<serde_json::Value, ApiError>;
}

/// reqwest-backed client for the records backend.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl ApiClient {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenSource>) -> Result<Self, ApiError> {
        let base_url =
            normalize_base_url(base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            client: Client::new(),
            base_url,
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn token(&self) -> Result<String, ApiError> {
        self.tokens.access_token().await.ok_or(ApiError::NoSession)
    }

    async fn authorized(&self, req: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let token = self.token().await?;
        Ok(req.header("Authorization", format!("Bearer {}", token)))
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let resp = self.authorized(req).await?.send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_body(status, &text));
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let resp = self.send(req).await?;
        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Parse(e.to_string()))
    }
}

#[async_trait]
impl HealthApi for ApiClient {
    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, ApiError> {
        let list: DocumentList = self
            .send_json(self.client.get(self.url("/documents/list")))
            .await?;
        Ok(list.into_records())
    }

    async fn get_document(&self, id: &str) -> Result<DocumentRecord, ApiError> {
        self.send_json(self.client.get(self.url(&format!("/documents/{}", id))))
            .await
    }

    async fn upload_document(&self, file: &UploadFile) -> Result<DocumentRecord, ApiError> {
        let part = multipart::Part::bytes(file.bytes.clone())
            .file_name(file.filename.clone())
            .mime_str(&file.content_type)?;
        let form = multipart::Form::new().part("file", part);

        let value: serde_json::Value = self
            .send_json(self.client.post(self.url("/documents/upload")).multipart(form))
            .await?;

        // Some deployments nest the record under `document`.
        let record = match value.get("document") {
            Some(doc) if doc.is_object() => doc.clone(),
            _ => value,
        };
        let mut doc: DocumentRecord =
            serde_json::from_value(record).map_err(|e| ApiError::Parse(e.to_string()))?;
        if doc.filename == "unknown.pdf" {
            doc.filename = file.filename.clone();
        }
        Ok(doc)
    }

    async fn delete_document(&self, id: &str) -> Result<(), ApiError> {
        self.send(self.client.delete(self.url(&format!("/documents/{}", id))))
            .await?;
        Ok(())
    }

    async fn document_view_url(&self, id: &str) -> Result<String, ApiError> {
        let token = self.token().await?;
        let url = Url::parse_with_params(
            &self.url(&format!("/documents/{}/view", id)),
            &[("token", token)],
        )
        .map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        Ok(url.to_string())
    }

    async fn list_summaries(&self) -> Result<Vec<DocumentSummary>, ApiError> {
        let list: SummaryList = self
            .send_json(self.client.get(self.url("/documents/summaries")))
            .await?;
        Ok(list.documents)
    }

    async fn query(
        &self,
        request: &QueryRequest,
        chat_id: Option<&str>,
    ) -> Result<QueryResponse, ApiError> {
        let mut req = self.client.post(self.url("/query")).json(request);
        if let Some(chat_id) = chat_id {
            req = req.query(&[("chat_id", chat_id)]);
        }
        self.send_json(req).await
    }

    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ApiError> {
        self.send_json(self.client.get(self.url("/chats"))).await
    }

    async fn chat_messages(&self, chat_id: &str) -> Result<Vec<ChatMessageRecord>, ApiError> {
        self.send_json(
            self.client
                .get(self.url(&format!("/chats/{}/messages", chat_id))),
        )
        .await
    }

    async fn list_notes(&self, query: &NoteQuery) -> Result<Vec<Note>, ApiError> {
        self.send_json(self.client.get(self.url("/notes")).query(query))
            .await
    }

    async fn create_note(&self, note: &CreateNote) -> Result<Note, ApiError> {
        self.send_json(self.client.post(self.url("/notes")).json(note))
            .await
    }

    async fn update_note(&self, id: &str, update: &UpdateNote) -> Result<Note, ApiError> {
        self.send_json(
            self.client
                .patch(self.url(&format!("/notes/{}", id)))
                .json(update),
        )
        .await
    }

    async fn delete_note(&self, id: &str) -> Result<(), ApiError> {
        self.send(self.client.delete(self.url(&format!("/notes/{}", id))))
            .await?;
        Ok(())
    }

    async fn ensure_profile(&self) -> Result<serde_json::Value, ApiError> {
        let value: serde_json::Value = self.send_json(self.client.get(self.url("/profile"))).await?;
        Ok(value.get("profile").cloned().unwrap_or(value))
    }
}
