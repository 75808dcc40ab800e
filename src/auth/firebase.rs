//! Identity Toolkit REST adapter.

use super::{AuthError, AuthState, Credentials, IdentityProvider, Session, SignInFlow};
use crate::store::{KeyValueStore, REFRESH_TOKEN_KEY};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

const IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";

/// Refresh this long before the id token actually expires.
const EXPIRY_BUFFER_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct TokenSet {
    id_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl TokenSet {
    fn is_expiring(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_BUFFER_SECS) >= self.expires_at
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdpRequest {
    post_body: String,
    request_uri: String,
    return_secure_token: bool,
    return_idp_credential: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest<'a> {
    id_token: &'a str,
    display_name: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    id_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

fn expiry_from(expires_in: Option<&str>) -> DateTime<Utc> {
    let secs = expires_in
        .and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(3600);
    Utc::now() + Duration::seconds(secs)
}

/// Turn `{"error":{"message":"WEAK_PASSWORD : Password should be ..."}}`
/// into a provider error keyed by the leading code.
fn provider_error(status: u16, body: &str) -> AuthError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());
    let code = message
        .split(" : ")
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    let code = if code.is_empty() {
        format!("HTTP_{}", status)
    } else {
        code
    };
    AuthError::Provider { code, message }
}

/// Identity platform over its REST API. The refresh token is persisted so a
/// session survives restarts.
pub struct FirebaseIdentity {
    client: Client,
    api_key: String,
    identity_url: String,
    token_url: String,
    redirect_uri: String,
    store: Arc<dyn KeyValueStore>,
    tokens: Mutex<Option<TokenSet>>,
    /// Bumped on every sign-in and sign-out, under the `tokens` lock.
    epoch: AtomicU64,
    state: watch::Sender<AuthState>,
}

impl FirebaseIdentity {
    pub fn new(api_key: &str, redirect_uri: &str, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_endpoints(api_key, redirect_uri, store, IDENTITY_URL, TOKEN_URL)
    }

    pub fn with_endpoints(
        api_key: &str,
        redirect_uri: &str,
        store: Arc<dyn KeyValueStore>,
        identity_url: &str,
        token_url: &str,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::Loading);
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            identity_url: identity_url.trim_end_matches('/').to_string(),
            token_url: token_url.trim_end_matches('/').to_string(),
            redirect_uri: redirect_uri.to_string(),
            store,
            tokens: Mutex::new(None),
            epoch: AtomicU64::new(0),
            state,
        }
    }

    fn request_uri(&self, flow: SignInFlow) -> String {
        match flow {
            SignInFlow::Popup => "http://localhost".to_string(),
            SignInFlow::Redirect => self.redirect_uri.clone(),
        }
    }

    async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T, AuthError> {
        let resp = self
            .client
            .post(format!("{}/{}", self.identity_url, endpoint))
            .query(&[("key", &self.api_key)])
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(provider_error(status, &text));
        }
        Ok(resp.json().await?)
    }

    /// Resolve the persisted session, if any, and fire the first auth-state
    /// callback. Failures resolve to signed-out.
    pub async fn restore(&self) -> AuthState {
        let refresh_token = match self.store.get(REFRESH_TOKEN_KEY) {
            Ok(Some(token)) => token,
            Ok(None) => return self.publish(AuthState::SignedOut),
            Err(e) => {
                tracing::warn!("[Identity] Could not read persisted session: {}", e);
                return self.publish(AuthState::SignedOut);
            }
        };

        let epoch = self.epoch.load(Ordering::SeqCst);
        let restored = async {
            let Some(tokens) = self.refresh(&refresh_token, epoch).await? else {
                return Ok::<_, AuthError>(None);
            };
            self.lookup(&tokens.id_token).await.map(Some)
        }
        .await;

        if self.epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!("[Identity] Session changed while restoring");
            return self.state.borrow().clone();
        }
        match restored {
            Ok(None) => self.state.borrow().clone(),
            Ok(Some(session)) => {
                tracing::info!("[Identity] Restored session for {}", session.label());
                self.publish(AuthState::SignedIn(session))
            }
            Err(e) => {
                tracing::warn!("[Identity] Persisted session rejected: {}", e);
                self.clear_local();
                self.publish(AuthState::SignedOut)
            }
        }
    }

    fn publish(&self, state: AuthState) -> AuthState {
        self.state.send_replace(state.clone());
        state
    }

    fn clear_local(&self) {
        let mut live = self.tokens.lock();
        *live = None;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.store.remove(REFRESH_TOKEN_KEY) {
            tracing::warn!("[Identity] Could not clear persisted session: {}", e);
        }
    }

    /// Make `tokens` the live session. With `since`, only if nobody signed in
    /// or out after that epoch; returns whether they were kept.
    fn remember(&self, tokens: TokenSet, since: Option<u64>) -> Result<bool, AuthError> {
        let mut live = self.tokens.lock();
        match since {
            Some(epoch) if epoch != self.epoch.load(Ordering::SeqCst) => return Ok(false),
            Some(_) => {}
            None => {
                self.epoch.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.store.set(REFRESH_TOKEN_KEY, &tokens.refresh_token)?;
        *live = Some(tokens);
        Ok(true)
    }

    /// Exchange a refresh token. `None` when the session changed while the
    /// call was in flight; the result is then discarded, not persisted.
    async fn refresh(&self, refresh_token: &str, epoch: u64) -> Result<Option<TokenSet>, AuthError> {
        let resp = self
            .client
            .post(format!("{}/token", self.token_url))
            .query(&[("key", &self.api_key)])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(provider_error(status, &text));
        }
        let data: RefreshResponse = resp.json().await?;
        let tokens = TokenSet {
            id_token: data.id_token,
            refresh_token: data.refresh_token,
            expires_at: expiry_from(data.expires_in.as_deref()),
        };
        if !self.remember(tokens.clone(), Some(epoch))? {
            tracing::debug!("[Identity] Dropping refreshed tokens for an ended session");
            return Ok(None);
        }
        Ok(Some(tokens))
    }

    async fn lookup(&self, id_token: &str) -> Result<Session, AuthError> {
        let data: LookupResponse = self
            .post("accounts:lookup", &LookupRequest { id_token })
            .await?;
        let user = data.users.into_iter().next().ok_or(AuthError::Provider {
            code: "USER_NOT_FOUND".into(),
            message: "account lookup returned no users".into(),
        })?;
        Ok(Session {
            uid: user.local_id,
            display_name: user.display_name,
            email: user.email,
            photo_url: user.photo_url,
        })
    }

    fn accept(&self, resp: AuthResponse) -> Result<Session, AuthError> {
        self.remember(
            TokenSet {
                id_token: resp.id_token,
                refresh_token: resp.refresh_token,
                expires_at: expiry_from(resp.expires_in.as_deref()),
            },
            None,
        )?;
        let session = Session {
            uid: resp.local_id,
            display_name: resp.display_name.filter(|n| !n.is_empty()),
            email: resp.email,
            photo_url: resp.photo_url,
        };
        self.publish(AuthState::SignedIn(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn current_session(&self) -> Option<Session> {
        self.state.borrow().session().cloned()
    }

    async fn sign_in(
        &self,
        credentials: &Credentials,
        flow: SignInFlow,
    ) -> Result<Session, AuthError> {
        let resp: AuthResponse = match credentials {
            Credentials::Email { email, password } => {
                self.post(
                    "accounts:signInWithPassword",
                    &PasswordRequest {
                        email,
                        password,
                        return_secure_token: true,
                    },
                )
                .await?
            }
            Credentials::Google { id_token } => {
                tracing::debug!("[Identity] Exchanging Google credential ({:?})", flow);
                self.post(
                    "accounts:signInWithIdp",
                    &IdpRequest {
                        post_body: format!("id_token={}&providerId=google.com", id_token),
                        request_uri: self.request_uri(flow),
                        return_secure_token: true,
                        return_idp_credential: true,
                    },
                )
                .await?
            }
        };
        self.accept(resp)
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Session, AuthError> {
        let mut resp: AuthResponse = self
            .post(
                "accounts:signUp",
                &PasswordRequest {
                    email,
                    password,
                    return_secure_token: true,
                },
            )
            .await?;

        if let Some(name) = display_name.filter(|n| !n.is_empty()) {
            let _: serde_json::Value = self
                .post(
                    "accounts:update",
                    &UpdateProfileRequest {
                        id_token: &resp.id_token,
                        display_name: name,
                        return_secure_token: false,
                    },
                )
                .await?;
            resp.display_name = Some(name.to_string());
        }
        self.accept(resp)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.clear_local();
        self.publish(AuthState::SignedOut);
        Ok(())
    }

    fn on_session_changed(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    async fn get_token(&self, force_refresh: bool) -> Result<Option<String>, AuthError> {
        let (current, epoch) = {
            let live = self.tokens.lock();
            (live.clone(), self.epoch.load(Ordering::SeqCst))
        };
        let Some(tokens) = current else {
            return Ok(None);
        };
        if !force_refresh && !tokens.is_expiring() {
            return Ok(Some(tokens.id_token));
        }
        match self.refresh(&tokens.refresh_token, epoch).await? {
            Some(refreshed) => Ok(Some(refreshed.id_token)),
            // Signed out or replaced mid-refresh: answer for whoever is live now.
            None => Ok(self.tokens.lock().as_ref().map(|t| t.id_token.clone())),
        }
    }
}
