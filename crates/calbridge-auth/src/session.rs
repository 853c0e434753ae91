//! Per-profile OAuth session management.
//!
//! [`SessionManager`] is the only way the rest of the system obtains access
//! tokens. It guarantees that at most one credential operation (refresh or
//! interactive authorization) runs per profile at a time; concurrent callers
//! for the same profile wait on the first caller's result instead of racing
//! the token endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use calbridge_core::ProfileId;

use crate::error::{AuthError, AuthResult};
use crate::oauth::{OAuthClient, PkceFlow};
use crate::pending::{CallbackOutcome, PendingAuthorizations};
use crate::record::CredentialRecord;
use crate::store::TokenStore;

/// Default bound on the interactive authorization wait.
const DEFAULT_AUTHORIZE_TIMEOUT: Duration = Duration::from_secs(300);

/// Tunables for the session manager.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How long to wait for the user to complete consent before giving up.
    pub authorize_timeout: Duration,
    /// Whether to try opening the consent URL in a local browser.
    pub open_browser: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            authorize_timeout: DEFAULT_AUTHORIZE_TIMEOUT,
            open_browser: false,
        }
    }
}

impl SessionOptions {
    /// Builder: set the authorization wait bound.
    #[must_use]
    pub fn with_authorize_timeout(mut self, timeout: Duration) -> Self {
        self.authorize_timeout = timeout;
        self
    }

    /// Builder: enable or disable browser opening.
    #[must_use]
    pub fn with_open_browser(mut self, open: bool) -> Self {
        self.open_browser = open;
        self
    }
}

/// Manages OAuth credentials for all profiles.
pub struct SessionManager {
    store: Arc<dyn TokenStore>,
    oauth: Arc<OAuthClient>,
    pending: Arc<PendingAuthorizations>,
    // One lock per profile, created lazily. The outer mutex only guards the
    // map; per-profile locks are held across the whole credential operation.
    locks: Mutex<HashMap<ProfileId, Arc<Mutex<()>>>>,
    options: SessionOptions,
}

impl SessionManager {
    /// Creates a session manager over the given store and OAuth client.
    pub fn new(
        store: Arc<dyn TokenStore>,
        oauth: Arc<OAuthClient>,
        options: SessionOptions,
    ) -> Self {
        Self {
            store,
            oauth,
            pending: Arc::new(PendingAuthorizations::new()),
            locks: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// The pending-authorization registry (shared with the callback endpoint).
    pub fn pending(&self) -> &Arc<PendingAuthorizations> {
        &self.pending
    }

    /// Returns a valid access token for the profile, doing whatever that
    /// takes: nothing, a silent refresh, or a full interactive flow.
    ///
    /// # Errors
    ///
    /// - [`AuthError::ReauthorizationRequired`] when the provider revoked the
    ///   refresh token (the stored credential is deleted first)
    /// - [`AuthError::AuthorizationTimedOut`] when an interactive flow was
    ///   needed and the user did not complete consent in time
    /// - [`AuthError::Store`] when the credential store is unreachable
    pub async fn get_valid_token(&self, profile: &ProfileId) -> AuthResult<String> {
        // Fast path: no lock needed to hand out a token that is still valid.
        if let Some(record) = self.store.get(profile).await? {
            if !record.is_expired() && record.covers(self.oauth.scopes()) {
                return Ok(record.access_token);
            }
        }

        let lock = self.profile_lock(profile).await;
        let _guard = lock.lock().await;

        // Re-read: another caller may have finished the work while we waited.
        match self.store.get(profile).await? {
            Some(record) if !record.covers(self.oauth.scopes()) => {
                // A refresh never widens the grant, so go straight back
                // through the consent flow.
                warn!(%profile, "stored credential lacks required scopes");
                self.store.delete(profile).await?;
                self.authorize_locked(profile).await
            }
            Some(record) if !record.is_expired() => Ok(record.access_token),
            Some(record) if record.refresh_token.is_some() => {
                self.refresh_locked(profile, record).await
            }
            Some(_) => {
                // Expired and nothing to refresh with: the credential is dead.
                self.store.delete(profile).await?;
                self.authorize_locked(profile).await
            }
            None => self.authorize_locked(profile).await,
        }
    }

    /// Discards the current access token and refreshes, regardless of the
    /// recorded expiry. Used after the provider rejected a token the store
    /// still considered valid.
    pub async fn force_refresh(&self, profile: &ProfileId) -> AuthResult<String> {
        let lock = self.profile_lock(profile).await;
        let _guard = lock.lock().await;

        match self.store.get(profile).await? {
            Some(record) if record.refresh_token.is_some() => {
                self.refresh_locked(profile, record).await
            }
            Some(_) => {
                self.store.delete(profile).await?;
                Err(AuthError::ReauthorizationRequired {
                    profile: profile.clone(),
                })
            }
            None => Err(AuthError::ReauthorizationRequired {
                profile: profile.clone(),
            }),
        }
    }

    /// Runs the interactive authorization flow for a profile, replacing any
    /// stored credential on success. Returns the new access token.
    pub async fn authorize(&self, profile: &ProfileId) -> AuthResult<String> {
        let lock = self.profile_lock(profile).await;
        let _guard = lock.lock().await;
        self.authorize_locked(profile).await
    }

    /// Deletes the stored credential for a profile.
    pub async fn revoke(&self, profile: &ProfileId) -> AuthResult<()> {
        let lock = self.profile_lock(profile).await;
        {
            let _guard = lock.lock().await;
            self.store.delete(profile).await?;
        }

        // Evict the lock table entry so the map stays bounded by live
        // profiles, but only while nobody else holds a clone of it.
        let mut locks = self.locks.lock().await;
        if let Some(entry) = locks.get(profile)
            && Arc::strong_count(entry) == 2
        {
            locks.remove(profile);
        }
        Ok(())
    }

    /// Resolves an authorization callback, waking the flow that registered
    /// the state token. Returns the profile the flow belongs to.
    pub fn resolve_callback(
        &self,
        state: &str,
        outcome: CallbackOutcome,
    ) -> AuthResult<ProfileId> {
        self.pending.resolve(state, outcome)
    }

    /// Snapshot of every stored credential, for status reporting.
    pub async fn profile_statuses(&self) -> AuthResult<Vec<(ProfileId, CredentialRecord)>> {
        let mut statuses = Vec::new();
        for profile in self.store.list_profiles().await? {
            if let Some(record) = self.store.get(&profile).await? {
                statuses.push((profile, record));
            }
        }
        Ok(statuses)
    }

    async fn profile_lock(&self, profile: &ProfileId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(profile.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Refreshes under the profile lock.
    ///
    /// `invalid_grant` deletes the credential and converts to
    /// [`AuthError::ReauthorizationRequired`]; transient failures leave the
    /// stored credential untouched so a later attempt can retry.
    async fn refresh_locked(
        &self,
        profile: &ProfileId,
        mut record: CredentialRecord,
    ) -> AuthResult<String> {
        let refresh_token = record
            .refresh_token
            .clone()
            .ok_or_else(|| AuthError::internal("refresh_locked called without refresh token"))?;

        match self.oauth.refresh(&refresh_token).await {
            Ok(grant) => {
                record.apply_refresh(grant);
                self.store.put(profile, &record).await?;
                info!(%profile, "refreshed access token");
                Ok(record.access_token)
            }
            Err(AuthError::InvalidGrant) => {
                warn!(%profile, "refresh token revoked, deleting credential");
                self.store.delete(profile).await?;
                Err(AuthError::ReauthorizationRequired {
                    profile: profile.clone(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Runs one interactive flow under the profile lock.
    async fn authorize_locked(&self, profile: &ProfileId) -> AuthResult<String> {
        let pkce = PkceFlow::new();
        let rx = self.pending.register(pkce.state.clone(), profile.clone());
        let url = self.oauth.consent_url(&pkce);

        info!(%profile, %url, "authorization required, waiting for consent callback");
        if self.options.open_browser {
            if let Err(e) = open::that(&url) {
                warn!("failed to open browser: {e}");
            }
        }

        let outcome = match timeout(self.options.authorize_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                self.pending.cancel(&pkce.state);
                return Err(AuthError::internal("authorization callback channel closed"));
            }
            Err(_) => {
                self.pending.cancel(&pkce.state);
                warn!(%profile, "authorization timed out");
                return Err(AuthError::AuthorizationTimedOut {
                    profile: profile.clone(),
                    waited_secs: self.options.authorize_timeout.as_secs(),
                });
            }
        };

        let code = match outcome {
            CallbackOutcome::Code(code) => code,
            CallbackOutcome::Denied(reason) => {
                return Err(AuthError::AuthorizationDenied(reason));
            }
        };

        let grant = self.oauth.exchange_code(&code, &pkce.verifier).await?;
        let record = CredentialRecord::from_grant(grant, self.oauth.scopes().to_vec());
        self.store.put(profile, &record).await?;
        info!(%profile, "profile authorized");
        Ok(record.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::{OAuthConfig, TokenGrant};
    use crate::store::MemoryTokenStore;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar.events";

    fn profile(id: &str) -> ProfileId {
        ProfileId::new(id).unwrap()
    }

    fn oauth_against(server: &MockServer) -> Arc<OAuthClient> {
        let config = OAuthConfig::new(
            "client-id",
            "client-secret",
            "http://127.0.0.1:835/oauth/callback",
            vec![CALENDAR_SCOPE.to_string()],
        )
        .with_token_url(format!("{}/token", server.uri()));
        Arc::new(OAuthClient::new(config, Duration::from_secs(5)))
    }

    fn session(
        store: Arc<dyn TokenStore>,
        server: &MockServer,
        options: SessionOptions,
    ) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(store, oauth_against(server), options))
    }

    async fn seed(store: &MemoryTokenStore, id: &str, access: &str, expired: bool) {
        let mut record = CredentialRecord::from_grant(
            TokenGrant {
                access_token: access.to_string(),
                refresh_token: Some("rt-1".to_string()),
                expires_in: Some(3600),
            },
            vec![CALENDAR_SCOPE.to_string()],
        );
        if expired {
            record.expires_at = Some(Utc::now() - chrono::Duration::minutes(5));
        }
        store.put(&profile(id), &record).await.unwrap();
    }

    #[tokio::test]
    async fn valid_token_needs_no_endpoint_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        seed(&store, "work", "at-valid", false).await;
        let session = session(store, &server, SessionOptions::default());

        let token = session.get_valid_token(&profile("work")).await.unwrap();
        assert_eq!(token, "at-valid");
    }

    #[tokio::test]
    async fn under_scoped_credential_is_not_served() {
        let server = MockServer::start().await;
        // Neither a refresh nor a code exchange may be attempted silently
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        // A valid, unexpired token granted without the calendar scope
        let store = Arc::new(MemoryTokenStore::new());
        let record = CredentialRecord::from_grant(
            TokenGrant {
                access_token: "at-unscoped".to_string(),
                refresh_token: Some("rt-1".to_string()),
                expires_in: Some(3600),
            },
            vec![],
        );
        store.put(&profile("work"), &record).await.unwrap();

        let options =
            SessionOptions::default().with_authorize_timeout(Duration::from_millis(50));
        let session = session(store.clone(), &server, options);

        // The narrow grant is discarded and the flow falls through to
        // interactive consent, which nobody completes here
        let err = session.get_valid_token(&profile("work")).await.unwrap_err();
        assert!(matches!(err, AuthError::AuthorizationTimedOut { .. }));
        assert!(store.get(&profile("work")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_token_refreshes_once_across_concurrent_callers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "at-new", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        seed(&store, "work", "at-old", true).await;
        let session = session(store.clone(), &server, SessionOptions::default());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                session.get_valid_token(&profile("work")).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "at-new");
        }

        // The stored record was updated, and the refresh token survived
        let record = store.get(&profile("work")).await.unwrap().unwrap();
        assert_eq!(record.access_token, "at-new");
        assert_eq!(record.refresh_token.as_deref(), Some("rt-1"));
    }

    #[tokio::test]
    async fn rotated_refresh_token_is_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-new",
                "refresh_token": "rt-rotated",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        seed(&store, "work", "at-old", true).await;
        let session = session(store.clone(), &server, SessionOptions::default());

        session.get_valid_token(&profile("work")).await.unwrap();
        let record = store.get(&profile("work")).await.unwrap().unwrap();
        assert_eq!(record.refresh_token.as_deref(), Some("rt-rotated"));
    }

    #[tokio::test]
    async fn invalid_grant_deletes_credential_and_requires_reauth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        seed(&store, "work", "at-old", true).await;
        let session = session(store.clone(), &server, SessionOptions::default());

        let err = session.get_valid_token(&profile("work")).await.unwrap_err();
        assert!(matches!(err, AuthError::ReauthorizationRequired { .. }));
        assert!(store.get(&profile("work")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transient_refresh_failure_keeps_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        seed(&store, "work", "at-old", true).await;
        let session = session(store.clone(), &server, SessionOptions::default());

        let err = session.get_valid_token(&profile("work")).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenEndpoint { status: 500, .. }));
        assert!(err.is_transient());
        // The credential stays so a later attempt can retry the refresh
        assert!(store.get(&profile("work")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn authorization_wait_is_bounded() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryTokenStore::new());
        let options =
            SessionOptions::default().with_authorize_timeout(Duration::from_millis(50));
        let session = session(store, &server, options);

        let err = session.get_valid_token(&profile("work")).await.unwrap_err();
        assert!(matches!(err, AuthError::AuthorizationTimedOut { .. }));
        // The abandoned flow was unregistered
        assert!(session.pending().is_empty());
    }

    #[tokio::test]
    async fn callback_completes_interactive_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-fresh",
                "refresh_token": "rt-fresh",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        let session = session(store.clone(), &server, SessionOptions::default());

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.get_valid_token(&profile("work")).await })
        };

        // Wait for the flow to register its state token
        let state = loop {
            if let Some(state) = session.pending().states().into_iter().next() {
                break state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        let resolved = session
            .resolve_callback(&state, CallbackOutcome::Code("auth-code".to_string()))
            .unwrap();
        assert_eq!(resolved.as_str(), "work");

        let token = task.await.unwrap().unwrap();
        assert_eq!(token, "at-fresh");

        let record = store.get(&profile("work")).await.unwrap().unwrap();
        assert_eq!(record.refresh_token.as_deref(), Some("rt-fresh"));
        assert!(!record.scopes.is_empty());
    }

    #[tokio::test]
    async fn profiles_do_not_block_each_other() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryTokenStore::new());
        seed(&store, "personal", "at-personal", false).await;
        let options = SessionOptions::default().with_authorize_timeout(Duration::from_secs(5));
        let session = session(store, &server, options);

        // Park "work" in its interactive consent wait
        let parked = {
            let session = session.clone();
            tokio::spawn(async move { session.get_valid_token(&profile("work")).await })
        };
        let state = loop {
            if let Some(state) = session.pending().states().into_iter().next() {
                break state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        // "personal" must complete while "work" is still waiting
        let token = timeout(
            Duration::from_millis(500),
            session.get_valid_token(&profile("personal")),
        )
        .await
        .expect("another profile's consent wait blocked this token")
        .unwrap();
        assert_eq!(token, "at-personal");
        assert!(!session.pending().is_empty());

        session
            .resolve_callback(&state, CallbackOutcome::Denied("access_denied".to_string()))
            .unwrap();
        let err = parked.await.unwrap().unwrap_err();
        assert!(matches!(err, AuthError::AuthorizationDenied(_)));
    }

    #[tokio::test]
    async fn denied_consent_fails_the_flow() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryTokenStore::new());
        let session = session(store, &server, SessionOptions::default());

        let task = {
            let session = session.clone();
            tokio::spawn(async move { session.authorize(&profile("work")).await })
        };

        let state = loop {
            if let Some(state) = session.pending().states().into_iter().next() {
                break state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        session
            .resolve_callback(&state, CallbackOutcome::Denied("access_denied".to_string()))
            .unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, AuthError::AuthorizationDenied(_)));
    }

    #[tokio::test]
    async fn force_refresh_without_refresh_token_requires_reauth() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryTokenStore::new());
        let record = CredentialRecord::from_grant(
            TokenGrant {
                access_token: "at".to_string(),
                refresh_token: None,
                expires_in: Some(3600),
            },
            vec![],
        );
        store.put(&profile("work"), &record).await.unwrap();
        let session = session(store.clone(), &server, SessionOptions::default());

        let err = session.force_refresh(&profile("work")).await.unwrap_err();
        assert!(matches!(err, AuthError::ReauthorizationRequired { .. }));
        assert!(store.get(&profile("work")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_deletes_credential() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryTokenStore::new());
        seed(&store, "work", "at", false).await;
        let session = session(store.clone(), &server, SessionOptions::default());

        session.revoke(&profile("work")).await.unwrap();
        assert!(store.get(&profile("work")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_drops_profile_lock_entry() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryTokenStore::new());
        seed(&store, "work", "at", true).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "at-new", "expires_in": 3600})),
            )
            .mount(&server)
            .await;
        let session = session(store, &server, SessionOptions::default());

        session.get_valid_token(&profile("work")).await.unwrap();
        assert_eq!(session.locks.lock().await.len(), 1);

        session.revoke(&profile("work")).await.unwrap();
        assert!(session.locks.lock().await.is_empty());
    }
}
