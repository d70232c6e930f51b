use std::sync::Arc;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{ApiError, ApiResult};
use super::token_store::{StoredTokens, TokenStore, TokenStoreError};

pub(crate) const REFRESH_PATH: &str = "auth/refresh";

/// Access/refresh token pair currently used to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSession {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl CredentialSession {
    pub fn new(access_token: String, refresh_token: Option<String>) -> Self {
        let expires_at = jwt_expiry(&access_token);
        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Expiry from the access token's `exp` claim, if it is a JWT.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }

    fn to_stored(&self) -> StoredTokens {
        StoredTokens {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

impl From<StoredTokens> for CredentialSession {
    fn from(tokens: StoredTokens) -> Self {
        CredentialSession::new(tokens.access_token, tokens.refresh_token)
    }
}

fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

/// What the embedding shell should show. `Expired` means the session was torn
/// down because it could not be recovered and the user must sign in again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated,
    Expired,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("token refresh failed: {0}")]
pub struct RefreshFailed(String);

type PendingRefresh = Shared<BoxFuture<'static, Result<CredentialSession, RefreshFailed>>>;

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct SessionInner {
    current: RwLock<Option<CredentialSession>>,
    store: Arc<dyn TokenStore>,
    http: Client,
    base_url: Url,
    // At most one refresh exchange in flight; every waiter shares its outcome
    pending_refresh: Mutex<Option<PendingRefresh>>,
    state_tx: watch::Sender<AuthState>,
}

/// Owner of the credential session. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(http: Client, base_url: Url, store: Arc<dyn TokenStore>) -> Self {
        let (state_tx, _) = watch::channel(AuthState::Anonymous);
        Self {
            inner: Arc::new(SessionInner {
                current: RwLock::new(None),
                store,
                http,
                base_url,
                pending_refresh: Mutex::new(None),
                state_tx,
            }),
        }
    }

    /// Loads a previously persisted session. Returns whether one was found.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> ApiResult<bool> {
        let stored = match self.inner.store.load() {
            Ok(stored) => stored,
            Err(TokenStoreError::Io(e)) => return Err(ApiError::Io(e)),
            Err(e @ TokenStoreError::Corrupt(_)) => {
                warn!(error = %e, "Ignoring unreadable persisted session");
                None
            }
        };
        let Some(tokens) = stored else {
            return Ok(false);
        };
        let session = CredentialSession::from(tokens);
        if !session.is_valid_at(Utc::now()) {
            debug!("Restored access token is past its expiry, it will be refreshed on first use");
        }
        *self.inner.current.write().await = Some(session);
        self.inner.state_tx.send_replace(AuthState::Authenticated);
        info!("Session restored from storage");
        Ok(true)
    }

    pub async fn establish(&self, session: CredentialSession) {
        let mut current = self.inner.current.write().await;
        self.persist(&session);
        *current = Some(session);
        self.inner.state_tx.send_replace(AuthState::Authenticated);
    }

    pub async fn current(&self) -> Option<CredentialSession> {
        self.inner.current.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner
            .current
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token().to_string())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner
            .current
            .read()
            .await
            .as_ref()
            .is_some_and(|s| s.is_valid_at(Utc::now()))
    }

    pub fn state(&self) -> AuthState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state_tx.subscribe()
    }

    /// User-initiated logout.
    pub async fn sign_out(&self) {
        self.teardown(AuthState::Anonymous).await;
    }

    /// Called after a request authenticated with `rejected_token` came back 401.
    /// Returns the access token the request should be replayed with.
    pub(crate) async fn recover(&self, rejected_token: Option<&str>) -> ApiResult<String> {
        let pending = {
            let mut slot = self.inner.pending_refresh.lock().await;
            let current = self.inner.current.read().await.clone();
            let Some(session) = current else {
                debug!("No session to recover");
                return Err(ApiError::AuthExpired);
            };
            if rejected_token != Some(session.access_token()) {
                // Someone else already refreshed while this request was in flight
                return Ok(session.access_token().to_string());
            }
            match (slot.as_ref(), session.refresh_token()) {
                (Some(pending), _) => pending.clone(),
                (None, Some(refresh_token)) => {
                    let pending = self.clone().exchange(refresh_token.to_string()).boxed().shared();
                    *slot = Some(pending.clone());
                    pending
                }
                (None, None) => {
                    warn!("Unauthorized and no refresh token available, signing out");
                    self.teardown(AuthState::Expired).await;
                    return Err(ApiError::AuthExpired);
                }
            }
        };

        pending
            .await
            .map(|session| session.access_token().to_string())
            .map_err(|_| ApiError::AuthExpired)
    }

    #[instrument(skip_all, fields(on_close = true))]
    async fn exchange(self, refresh_token: String) -> Result<CredentialSession, RefreshFailed> {
        info!("Refreshing access token");
        let outcome = self.request_refresh(&refresh_token).await;

        // Settle the session and release the slot together so late 401s see a
        // consistent picture
        let mut slot = self.inner.pending_refresh.lock().await;
        let result = match outcome {
            Ok(body) => {
                let session = CredentialSession::new(
                    body.access_token,
                    body.refresh_token.or(Some(refresh_token)),
                );
                self.establish(session.clone()).await;
                info!("Access token refreshed");
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, signing out");
                self.teardown(AuthState::Expired).await;
                Err(e)
            }
        };
        *slot = None;
        result
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshFailed> {
        let url = self
            .inner
            .base_url
            .join(REFRESH_PATH)
            .map_err(|e| RefreshFailed(e.to_string()))?;
        let response = self
            .inner
            .http
            .post(url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshFailed(format!("refresh endpoint answered {status}")));
        }
        response
            .json::<RefreshResponse>()
            .await
            .map_err(|e| RefreshFailed(e.to_string()))
    }

    async fn teardown(&self, state: AuthState) {
        let mut current = self.inner.current.write().await;
        *current = None;
        if let Err(e) = self.inner.store.clear() {
            warn!(error = %e, "Failed to clear persisted session");
        }
        self.inner.state_tx.send_replace(state);
    }

    fn persist(&self, session: &CredentialSession) {
        if let Err(e) = self.inner.store.save(&session.to_stored()) {
            warn!(error = %e, "Failed to persist session, it will not survive a restart");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::token_store::{FileTokenStore, MemoryTokenStore};

    fn jwt_with_exp(exp: i64) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u1","exp":{exp}}}"#));
        format!("{header}.{payload}.signature")
    }

    fn manager(store: Arc<MemoryTokenStore>) -> SessionManager {
        let base = Url::parse("http://127.0.0.1:9/api/v1/").unwrap();
        SessionManager::new(Client::new(), base, store)
    }

    #[test]
    fn expiry_comes_from_jwt_claim() {
        let session = CredentialSession::new(jwt_with_exp(1_700_000_000), None);
        let exp = session.expires_at().unwrap();
        assert_eq!(exp.timestamp(), 1_700_000_000);
        assert!(session.is_valid_at(exp - chrono::Duration::seconds(1)));
        assert!(!session.is_valid_at(exp));
    }

    #[test]
    fn opaque_tokens_have_unknown_expiry() {
        let session = CredentialSession::new("opaque-token".to_string(), None);
        assert!(session.expires_at().is_none());
        assert!(session.is_valid_at(Utc::now()));
    }

    #[tokio::test]
    async fn restore_and_sign_out_round_trip() {
        let store = Arc::new(MemoryTokenStore::with_tokens(StoredTokens {
            access_token: "a1".to_string(),
            refresh_token: Some("r1".to_string()),
        }));
        let sessions = manager(store.clone());
        assert_eq!(sessions.state(), AuthState::Anonymous);

        assert!(sessions.restore().await.unwrap());
        assert_eq!(sessions.access_token().await.as_deref(), Some("a1"));
        assert_eq!(sessions.state(), AuthState::Authenticated);

        sessions.sign_out().await;
        assert!(sessions.current().await.is_none());
        assert!(store.snapshot().is_none());
        assert_eq!(sessions.state(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn restore_skips_corrupt_file_but_surfaces_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let base = Url::parse("http://127.0.0.1:9/api/v1/").unwrap();

        let corrupt = dir.path().join("session.json");
        std::fs::write(&corrupt, "{not json").unwrap();
        let sessions = SessionManager::new(Client::new(), base.clone(), Arc::new(FileTokenStore::new(&corrupt)));
        assert!(!sessions.restore().await.unwrap());
        assert!(sessions.current().await.is_none());
        assert_eq!(sessions.state(), AuthState::Anonymous);

        // Reading a directory fails with an I/O error, not a decode error
        let sessions = SessionManager::new(Client::new(), base, Arc::new(FileTokenStore::new(dir.path())));
        let err = sessions.restore().await.unwrap_err();
        assert!(matches!(err, ApiError::Io(_)));
        assert_eq!(sessions.state(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn recover_without_refresh_token_tears_down() {
        let store = Arc::new(MemoryTokenStore::new());
        let sessions = manager(store.clone());
        sessions
            .establish(CredentialSession::new("a1".to_string(), None))
            .await;

        let err = sessions.recover(Some("a1")).await.unwrap_err();
        assert!(err.is_auth_expired());
        assert_eq!(sessions.state(), AuthState::Expired);
        assert_eq!(store.clear_count(), 1);

        // A second late 401 must not tear down again
        let err = sessions.recover(Some("a1")).await.unwrap_err();
        assert!(err.is_auth_expired());
        assert_eq!(store.clear_count(), 1);
    }

    #[tokio::test]
    async fn recover_reuses_token_replaced_in_the_meantime() {
        let sessions = manager(Arc::new(MemoryTokenStore::new()));
        sessions
            .establish(CredentialSession::new("a2".to_string(), Some("r1".to_string())))
            .await;
        let token = sessions.recover(Some("a1")).await.unwrap();
        assert_eq!(token, "a2");
    }
}
