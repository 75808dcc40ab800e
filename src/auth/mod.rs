//! Identity session provider.
//!
//! Wraps an [`IdentityProvider`] (the identity platform SDK or its REST
//! adapter) and exposes current-user state, sign-in/out and token retrieval.
//! Consumers wait on [`SessionProvider::ready`] before showing protected
//! content so an unresolved session never reads as "signed out".

pub mod firebase;

use crate::api::TokenSource;
use crate::config::Environment;
use crate::error::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// The signed-in user as the identity platform reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

impl Session {
    /// Name to show in the sidebar.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.email.as_deref().filter(|e| !e.is_empty()))
            .unwrap_or("Signed in")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    /// No auth-state callback has fired yet.
    Loading,
    SignedIn(Session),
    SignedOut,
}

impl AuthState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthState::SignedIn(session) => Some(session),
            _ => None,
        }
    }
}

/// Popup locally, full-page redirect when deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInFlow {
    Popup,
    Redirect,
}

impl SignInFlow {
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Local => SignInFlow::Popup,
            Environment::Deployed => SignInFlow::Redirect,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Credentials {
    /// Google id token obtained through the popup or redirect flow.
    Google { id_token: String },
    Email { email: String, password: String },
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Identity provider error: {code}")]
    Provider { code: String, message: String },
    #[error("{0}")]
    Validation(String),
    #[error("Unsupported sign-in: {0}")]
    Unsupported(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Serialize for AuthError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.user_message())
    }
}

const FALLBACK_AUTH_MESSAGE: &str = "Failed to sign in. Please try again.";

/// Provider error codes, in both the SDK (`auth/...`) and REST spellings.
const AUTH_ERROR_MESSAGES: &[(&[&str], &str)] = &[
    (
        &["auth/email-already-in-use", "EMAIL_EXISTS"],
        "This email is already registered. Please log in instead.",
    ),
    (
        &["auth/invalid-email", "INVALID_EMAIL"],
        "Please enter a valid email address.",
    ),
    (
        &["auth/network-request-failed"],
        "Network error. Please check your connection and try again.",
    ),
    (
        &["auth/weak-password", "WEAK_PASSWORD"],
        "Password must be at least 8 characters.",
    ),
    (
        &["auth/user-not-found", "EMAIL_NOT_FOUND"],
        "No account found with this email. Please sign in to create one.",
    ),
    (
        &["auth/wrong-password", "INVALID_PASSWORD"],
        "Incorrect password. Please try again.",
    ),
    (
        &["auth/invalid-credential", "INVALID_LOGIN_CREDENTIALS"],
        "Incorrect email or password. Please try again.",
    ),
    (
        &["auth/too-many-requests", "TOO_MANY_ATTEMPTS_TRY_LATER"],
        "Too many attempts. Please try again later.",
    ),
    (
        &["auth/user-disabled", "USER_DISABLED"],
        "This account has been disabled.",
    ),
];

impl AuthError {
    pub fn code(&self) -> Option<&str> {
        match self {
            AuthError::Provider { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            AuthError::Provider { code, .. } => AUTH_ERROR_MESSAGES
                .iter()
                .find(|(codes, _)| codes.contains(&code.as_str()))
                .map(|(_, msg)| msg.to_string())
                .unwrap_or_else(|| FALLBACK_AUTH_MESSAGE.to_string()),
            AuthError::Validation(msg) => msg.clone(),
            AuthError::Http(_) => {
                "Network error. Please check your connection and try again.".to_string()
            }
            AuthError::Unsupported(_) | AuthError::Store(_) => FALLBACK_AUTH_MESSAGE.to_string(),
        }
    }
}

/// The identity platform as a capability. The concrete SDK lives behind it.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_session(&self) -> Option<Session>;
    async fn sign_in(&self, credentials: &Credentials, flow: SignInFlow)
        -> Result<Session, AuthError>;
    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Session, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;
    /// Stream of auth-state changes; starts at [`AuthState::Loading`].
    fn on_session_changed(&self) -> watch::Receiver<AuthState>;
    async fn get_token(&self, force_refresh: bool) -> Result<Option<String>, AuthError>;
}

/// Email sign-up form, validated before any network call.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub confirm_password: String,
    pub accepted_terms: bool,
}

pub const MIN_PASSWORD_LEN: usize = 8;

impl Registration {
    pub fn validate(&self) -> Result<(), AuthError> {
        if !self.accepted_terms {
            return Err(AuthError::Validation(
                "You must accept the Terms of Service to continue.".into(),
            ));
        }
        if self.display_name.trim().is_empty() {
            return Err(AuthError::Validation("Display name is required.".into()));
        }
        if self.password != self.confirm_password {
            return Err(AuthError::Validation("Passwords don't match.".into()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(
                "Password must be at least 8 characters.".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordStrength {
    Empty,
    Weak,
    Medium,
    Strong,
}

pub fn password_strength(password: &str) -> PasswordStrength {
    if password.is_empty() {
        return PasswordStrength::Empty;
    }
    let len = password.chars().count();
    let has_number = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| !c.is_ascii_alphanumeric());
    if len >= 12 && has_number && has_symbol {
        PasswordStrength::Strong
    } else if len >= 8 && (has_number || has_symbol) {
        PasswordStrength::Medium
    } else {
        PasswordStrength::Weak
    }
}

pub struct SessionProvider {
    identity: Arc<dyn IdentityProvider>,
    flow: SignInFlow,
    state: watch::Receiver<AuthState>,
    auth_error: Mutex<Option<String>>,
}

impl SessionProvider {
    pub fn new(identity: Arc<dyn IdentityProvider>, environment: Environment) -> Self {
        let state = identity.on_session_changed();
        Self {
            identity,
            flow: SignInFlow::for_environment(environment),
            state,
            auth_error: Mutex::new(None),
        }
    }

    pub fn flow(&self) -> SignInFlow {
        self.flow
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn current_user(&self) -> Option<Session> {
        self.state.borrow().session().cloned()
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.state.borrow(), AuthState::Loading)
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.clone()
    }

    /// Resolve once the first auth-state callback has fired.
    pub async fn ready(&self) -> AuthState {
        let mut rx = self.state.clone();
        let resolved = rx
            .wait_for(|state| !matches!(state, AuthState::Loading))
            .await
            .map(|state| state.clone());
        // Provider dropped before ever resolving: treat as signed out.
        resolved.unwrap_or(AuthState::SignedOut)
    }

    pub fn auth_error(&self) -> Option<String> {
        self.auth_error.lock().clone()
    }

    pub fn set_auth_error(&self, message: impl Into<String>) {
        *self.auth_error.lock() = Some(message.into());
    }

    pub fn clear_auth_error(&self) {
        *self.auth_error.lock() = None;
    }

    pub async fn sign_in_with_google(&self, id_token: &str) -> Result<Session, AuthError> {
        tracing::info!("[Auth] Google sign-in via {:?} flow", self.flow);
        let credentials = Credentials::Google {
            id_token: id_token.to_string(),
        };
        self.sign_in(&credentials).await
    }

    pub async fn login_with_email(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            let err = AuthError::Validation("Email and password are required.".into());
            self.set_auth_error(err.user_message());
            return Err(err);
        }
        let credentials = Credentials::Email {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        self.sign_in(&credentials).await
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        self.clear_auth_error();
        match self.identity.sign_in(credentials, self.flow).await {
            Ok(session) => {
                tracing::info!("[Auth] Signed in as {}", session.label());
                Ok(session)
            }
            Err(e) => {
                tracing::warn!("[Auth] Sign-in failed: {}", e);
                self.set_auth_error(e.user_message());
                Err(e)
            }
        }
    }

    pub async fn register(&self, form: &Registration) -> Result<Session, AuthError> {
        self.clear_auth_error();
        if let Err(e) = form.validate() {
            self.set_auth_error(e.user_message());
            return Err(e);
        }
        let result = self
            .identity
            .register(
                form.email.trim(),
                &form.password,
                Some(form.display_name.trim()),
            )
            .await;
        match result {
            Ok(session) => {
                tracing::info!("[Auth] Registered {}", session.label());
                Ok(session)
            }
            Err(e) => {
                tracing::warn!("[Auth] Registration failed: {}", e);
                self.set_auth_error(e.user_message());
                Err(e)
            }
        }
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.clear_auth_error();
        if let Err(e) = self.identity.sign_out().await {
            tracing::warn!("[Auth] Sign-out failed: {}", e);
            self.set_auth_error(e.user_message());
            return Err(e);
        }
        tracing::info!("[Auth] Signed out");
        Ok(())
    }

    /// Current access token, or `None` when there is no session.
    pub async fn get_token(&self) -> Option<String> {
        match self.identity.get_token(false).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("[Auth] Token retrieval failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl TokenSource for SessionProvider {
    async fn access_token(&self) -> Option<String> {
        self.get_token().await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// In-process identity provider with scripted outcomes.
    pub struct FakeIdentity {
        state: watch::Sender<AuthState>,
        pub fail_with: Mutex<Option<String>>,
        pub last_flow: Mutex<Option<SignInFlow>>,
        pub register_calls: Mutex<u32>,
    }

    impl FakeIdentity {
        pub fn new() -> Arc<Self> {
            let (state, _) = watch::channel(AuthState::Loading);
            Arc::new(Self {
                state,
                fail_with: Mutex::new(None),
                last_flow: Mutex::new(None),
                register_calls: Mutex::new(0),
            })
        }

        pub fn resolve(&self, state: AuthState) {
            self.state.send_replace(state);
        }

        fn session(email: &str, display_name: Option<&str>) -> Session {
            Session {
                uid: format!("uid-{}", email),
                display_name: display_name.map(str::to_string),
                email: Some(email.to_string()),
                photo_url: None,
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeIdentity {
        async fn current_session(&self) -> Option<Session> {
            self.state.borrow().session().cloned()
        }

        async fn sign_in(
            &self,
            credentials: &Credentials,
            flow: SignInFlow,
        ) -> Result<Session, AuthError> {
            *self.last_flow.lock() = Some(flow);
            if let Some(code) = self.fail_with.lock().clone() {
                return Err(AuthError::Provider {
                    code,
                    message: String::new(),
                });
            }
            let session = match credentials {
                Credentials::Email { email, .. } => Self::session(email, None),
                Credentials::Google { .. } => Self::session("google@example.com", Some("G")),
            };
            self.state.send_replace(AuthState::SignedIn(session.clone()));
            Ok(session)
        }

        async fn register(
            &self,
            email: &str,
            _password: &str,
            display_name: Option<&str>,
        ) -> Result<Session, AuthError> {
            *self.register_calls.lock() += 1;
            let session = Self::session(email, display_name);
            self.state.send_replace(AuthState::SignedIn(session.clone()));
            Ok(session)
        }

        async fn sign_out(&self) -> Result<(), AuthError> {
            if let Some(code) = self.fail_with.lock().clone() {
                return Err(AuthError::Provider {
                    code,
                    message: String::new(),
                });
            }
            self.state.send_replace(AuthState::SignedOut);
            Ok(())
        }

        fn on_session_changed(&self) -> watch::Receiver<AuthState> {
            self.state.subscribe()
        }

        async fn get_token(&self, _force_refresh: bool) -> Result<Option<String>, AuthError> {
            Ok(self
                .state
                .borrow()
                .session()
                .map(|s| format!("token-{}", s.uid)))
        }
    }
}
