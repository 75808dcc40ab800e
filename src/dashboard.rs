//! Dashboard: wires the session, registry, uploads, chat and notes together
//! and reacts to auth-state changes.

use crate::api::{ApiClient, HealthApi};
use crate::auth::firebase::FirebaseIdentity;
use crate::auth::{AuthError, AuthState, Registration, Session, SessionProvider};
use crate::chat::ChatSession;
use crate::config::AppConfig;
use crate::error::{ApiError, StartupError, StoreError};
use crate::notes::NotesBoard;
use crate::registry::DocumentRegistry;
use crate::store::{get_flag, set_flag, KeyValueStore, SqliteStore, RECORDS_COLLAPSED_KEY};
use crate::upload::UploadCoordinator;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub const PROFILE_ERROR: &str = "Failed to create profile. Please try again.";

pub struct Dashboard {
    session: Arc<SessionProvider>,
    api: Arc<dyn HealthApi>,
    store: Arc<dyn KeyValueStore>,
    registry: DocumentRegistry,
    uploads: UploadCoordinator,
    chat: ChatSession,
    notes: NotesBoard,
}

impl Dashboard {
    pub fn new(
        config: &AppConfig,
        session: Arc<SessionProvider>,
        api: Arc<dyn HealthApi>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let registry = DocumentRegistry::new(api.clone(), config.poll_interval);
        let uploads = UploadCoordinator::new(api.clone(), registry.clone(), config.max_upload_bytes);
        let chat = ChatSession::new(api.clone(), store.clone());
        let notes = NotesBoard::new(api.clone());
        Self {
            session,
            api,
            store,
            registry,
            uploads,
            chat,
            notes,
        }
    }

    /// Build the production stack: SQLite store, identity REST adapter and
    /// HTTP client. The persisted session is restored before returning.
    pub async fn connect(config: &AppConfig) -> Result<Self, StartupError> {
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&config.data_dir)?);
        let identity = Arc::new(FirebaseIdentity::new(
            &config.identity_api_key,
            &config.api_base_url,
            store.clone(),
        ));
        let session = Arc::new(SessionProvider::new(identity.clone(), config.environment));
        identity.restore().await;

        let api = Arc::new(ApiClient::new(&config.api_base_url, session.clone())?);
        tracing::info!(
            "[Dashboard] Connected to {} ({:?})",
            api.base_url(),
            config.environment
        );
        Ok(Self::new(config, session, api, store))
    }

    pub fn session(&self) -> &SessionProvider {
        &self.session
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.uploads
    }

    pub fn chat(&self) -> &ChatSession {
        &self.chat
    }

    pub fn notes(&self) -> &NotesBoard {
        &self.notes
    }

    /// Wait for the first auth callback, then load what the session allows.
    pub async fn mount(&self) -> AuthState {
        let state = self.session.ready().await;
        self.apply(&state).await;
        state
    }

    async fn apply(&self, state: &AuthState) {
        match state {
            AuthState::SignedIn(session) => {
                tracing::info!("[Dashboard] Loading data for {}", session.label());
                // Profile failures are reported on the session; records still load.
                let _ = self.ensure_profile().await;
                self.registry.load().await;
            }
            AuthState::SignedOut => self.reset(),
            AuthState::Loading => {}
        }
    }

    /// Make sure the backend has a profile for the signed-in user.
    pub async fn ensure_profile(&self) -> Result<(), ApiError> {
        match self.api.ensure_profile().await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!("[Dashboard] Profile ensure failed: {}", e);
                self.session.set_auth_error(PROFILE_ERROR);
                Err(e)
            }
        }
    }

    /// Drop everything tied to the previous user.
    pub fn reset(&self) {
        self.registry.clear();
        self.chat.reset_in_memory();
        self.notes.clear();
        tracing::info!("[Dashboard] Cleared session data");
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self.session.login_with_email(email, password).await?;
        let _ = self.ensure_profile().await;
        Ok(session)
    }

    pub async fn login_with_google(&self, id_token: &str) -> Result<Session, AuthError> {
        let session = self.session.sign_in_with_google(id_token).await?;
        let _ = self.ensure_profile().await;
        Ok(session)
    }

    pub async fn register(&self, form: &Registration) -> Result<Session, AuthError> {
        let session = self.session.register(form).await?;
        let _ = self.ensure_profile().await;
        Ok(session)
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.session.sign_out().await?;
        self.reset();
        Ok(())
    }

    pub fn records_collapsed(&self) -> bool {
        get_flag(self.store.as_ref(), RECORDS_COLLAPSED_KEY)
    }

    pub fn set_records_collapsed(&self, collapsed: bool) -> Result<(), StoreError> {
        set_flag(self.store.as_ref(), RECORDS_COLLAPSED_KEY, collapsed)
    }

    /// Follow auth changes for as long as the dashboard lives: a new session
    /// reloads records, losing it clears user data.
    pub fn watch_auth(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.session.subscribe();
        // Baseline is taken now, not on the task's first poll, so a change
        // racing the spawn is still seen.
        let mut last_uid = self.session.current_user().map(|s| s.uid);
        let dashboard = Arc::downgrade(self);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                let uid = state.session().map(|s| s.uid.clone());
                if uid == last_uid {
                    continue;
                }
                last_uid = uid;
                let Some(strong) = dashboard.upgrade() else {
                    break;
                };
                tracing::debug!("[Dashboard] Auth state changed: {:?}", last_uid);
                if matches!(state, AuthState::SignedIn(_)) {
                    // A different user may have signed in over the old one.
                    strong.reset();
                }
                strong.apply(&state).await;
            }
        })
    }
}
