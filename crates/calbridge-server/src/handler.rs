//! Request handling and dispatch.
//!
//! [`RequestHandler`] turns protocol requests into responses. Parameter
//! validation happens before any credential work, so a malformed request
//! never triggers a token refresh or an interactive flow. A provider call
//! that fails with a token rejection gets exactly one forced refresh and
//! one retry before the error is surfaced.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use calbridge_auth::{AuthError, SessionManager};
use calbridge_core::ProfileId;
use calbridge_protocol::{
    DEFAULT_LIST_RESULTS, ErrorCode, ErrorResponse, MAX_LIST_RESULTS, ProfileStatus, Request,
    Response, StatusInfo,
};
use calbridge_providers::{GoogleCalendarClient, ProviderError, ProviderErrorCode};

use crate::error::{ServerError, ServerResult};
use crate::socket::Connection;

/// Shared server state.
pub struct ServerState {
    start_time: Instant,
    shutdown_requested: AtomicBool,
    shutdown: Notify,
}

impl ServerState {
    /// Creates new server state.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            shutdown_requested: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Returns the server uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Marks the server as shutting down and wakes anyone waiting on it.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Returns true if shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Completes when shutdown is requested.
    pub async fn wait_for_shutdown(&self) {
        if self.is_shutdown_requested() {
            return;
        }
        self.shutdown.notified().await;
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles protocol requests.
pub struct RequestHandler {
    state: Arc<ServerState>,
    session: Arc<SessionManager>,
    calendar: Arc<GoogleCalendarClient>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(
        state: Arc<ServerState>,
        session: Arc<SessionManager>,
        calendar: Arc<GoogleCalendarClient>,
    ) -> Self {
        Self {
            state,
            session,
            calendar,
        }
    }

    /// The shared server state.
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Handles a single request and produces a response.
    pub async fn handle(&self, request: Request) -> Response {
        if self.state.is_shutdown_requested() && !matches!(request, Request::Ping) {
            return Response::error(ErrorCode::ShuttingDown, "server is shutting down");
        }

        match request {
            Request::ListEvents {
                profile,
                max_results,
                time_min,
            } => {
                self.handle_list_events(profile.unwrap_or_default(), max_results, time_min)
                    .await
            }
            Request::CreateEvent { profile, draft } => {
                self.handle_create_event(profile.unwrap_or_default(), draft)
                    .await
            }
            Request::Authorize { profile } => {
                self.handle_authorize(profile.unwrap_or_default()).await
            }
            Request::Revoke { profile } => self.handle_revoke(profile.unwrap_or_default()).await,
            Request::Status => self.handle_status().await,
            Request::Shutdown => {
                info!("Shutdown requested by client");
                self.state.request_shutdown();
                Response::Ok
            }
            Request::Ping => Response::Pong,
        }
    }

    async fn handle_list_events(
        &self,
        profile: ProfileId,
        max_results: Option<u32>,
        time_min: Option<chrono::DateTime<Utc>>,
    ) -> Response {
        // Validate before touching any credential.
        let max_results = max_results.unwrap_or(DEFAULT_LIST_RESULTS);
        if max_results == 0 || max_results > MAX_LIST_RESULTS {
            return Response::from_error(ErrorResponse::invalid_parameters(format!(
                "max_results must be between 1 and {MAX_LIST_RESULTS}, got {max_results}"
            )));
        }
        let time_min = time_min.unwrap_or_else(Utc::now);

        debug!(%profile, max_results, "listing events");
        let result = self
            .with_token(&profile, |token| async move {
                self.calendar
                    .list_events(&token, time_min, max_results)
                    .await
            })
            .await;

        match result {
            Ok(events) => Response::events(events),
            Err(error) => Response::from_error(error),
        }
    }

    async fn handle_create_event(
        &self,
        profile: ProfileId,
        draft: calbridge_core::EventDraft,
    ) -> Response {
        if let Err(e) = draft.validate() {
            return Response::from_error(ErrorResponse::invalid_parameters(e.to_string()));
        }

        debug!(%profile, summary = %draft.summary, "creating event");
        let draft = &draft;
        let result = self
            .with_token(&profile, |token| async move {
                self.calendar.insert_event(&token, draft).await
            })
            .await;

        match result {
            Ok(event) => Response::created(event),
            Err(error) => Response::from_error(error),
        }
    }

    async fn handle_authorize(&self, profile: ProfileId) -> Response {
        match self.session.authorize(&profile).await {
            Ok(_) => Response::authorized(profile),
            Err(e) => Response::from_error(auth_error_response(&profile, e)),
        }
    }

    async fn handle_revoke(&self, profile: ProfileId) -> Response {
        match self.session.revoke(&profile).await {
            Ok(()) => {
                info!(%profile, "credential revoked");
                Response::Ok
            }
            Err(e) => Response::from_error(auth_error_response(&profile, e)),
        }
    }

    async fn handle_status(&self) -> Response {
        let statuses = match self.session.profile_statuses().await {
            Ok(statuses) => statuses,
            Err(e) => {
                return Response::from_error(auth_error_response(&ProfileId::default(), e));
            }
        };

        let mut info = StatusInfo::new(self.state.uptime_seconds());
        for (profile, record) in statuses {
            let authorized = !record.is_expired() || record.refresh_token.is_some();
            info = info.with_profile(ProfileStatus {
                profile,
                authorized,
                expires_at: record.expires_at,
            });
        }
        Response::status(info)
    }

    /// Obtains a valid token and runs the provider operation with it.
    ///
    /// When the provider rejects the token even though the store considered
    /// it valid, the token is force-refreshed and the operation retried once.
    /// A second rejection means the credential is genuinely unusable.
    async fn with_token<T, F, Fut>(
        &self,
        profile: &ProfileId,
        op: F,
    ) -> Result<T, ErrorResponse>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let token = self
            .session
            .get_valid_token(profile)
            .await
            .map_err(|e| auth_error_response(profile, e))?;

        match op(token).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_token_rejection() => {
                warn!(%profile, "provider rejected token, forcing refresh");
                let token = self
                    .session
                    .force_refresh(profile)
                    .await
                    .map_err(|e| auth_error_response(profile, e))?;
                op(token)
                    .await
                    .map_err(|e| provider_error_response(profile, e))
            }
            Err(e) => Err(provider_error_response(profile, e)),
        }
    }
}

/// Maps an auth error to a protocol error response.
fn auth_error_response(profile: &ProfileId, error: AuthError) -> ErrorResponse {
    let message = error.to_string();
    let code = match error {
        AuthError::Store(_) => ErrorCode::StoreUnavailable,
        AuthError::ReauthorizationRequired { .. }
        | AuthError::InvalidGrant
        | AuthError::AuthorizationDenied(_) => ErrorCode::ReauthorizationRequired,
        AuthError::AuthorizationTimedOut { .. } => ErrorCode::AuthorizationTimedOut,
        AuthError::UnknownState(_) => ErrorCode::InvalidRequest,
        AuthError::TokenEndpoint { .. } | AuthError::InvalidResponse(_) => {
            ErrorCode::ProviderError
        }
        AuthError::Network(_) => ErrorCode::NetworkError,
        AuthError::Internal(_) => ErrorCode::InternalError,
    };
    ErrorResponse::new(code, message).with_profile(profile.clone())
}

/// Maps a provider error to a protocol error response.
///
/// A token rejection arriving here already survived a forced refresh, so it
/// is reported as a reauthorization requirement, not a retryable failure.
fn provider_error_response(profile: &ProfileId, error: ProviderError) -> ErrorResponse {
    let code = match error.code() {
        ProviderErrorCode::TokenRejected => ErrorCode::ReauthorizationRequired,
        ProviderErrorCode::RateLimited => ErrorCode::RateLimited,
        ProviderErrorCode::NetworkError => ErrorCode::NetworkError,
        ProviderErrorCode::InternalError => ErrorCode::InternalError,
        ProviderErrorCode::AuthorizationFailed
        | ProviderErrorCode::ServerError
        | ProviderErrorCode::InvalidResponse
        | ProviderErrorCode::NotFound
        | ProviderErrorCode::BadRequest => ErrorCode::ProviderError,
    };
    ErrorResponse::new(code, error.message()).with_profile(profile.clone())
}

/// Handles a single client connection: reads requests, dispatches them,
/// writes responses. Returns when the client disconnects or the server
/// starts shutting down.
pub async fn handle_connection(
    handler: Arc<RequestHandler>,
    mut connection: Connection,
) -> ServerResult<()> {
    loop {
        let envelope = match connection.read_request().await? {
            Some(envelope) => envelope,
            None => {
                debug!("Client disconnected");
                return Ok(());
            }
        };

        let request_id = envelope.request_id.clone();
        debug!(request_id = %request_id, "Handling request");

        let response = handler.handle(envelope.payload).await;
        let shutting_down = handler.state().is_shutdown_requested();
        connection.respond(&request_id, response).await?;

        if shutting_down {
            return Err(ServerError::Shutdown);
        }
    }
}

/// Builds the connection handler closure passed to the socket server.
pub fn make_connection_handler(
    handler: Arc<RequestHandler>,
) -> impl Fn(Connection) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
+ Send
+ Sync
+ 'static {
    move |connection| {
        let handler = handler.clone();
        Box::pin(async move {
            match handle_connection(handler, connection).await {
                Ok(()) | Err(ServerError::Shutdown) => {}
                Err(e) => error!(error = %e, "Connection error"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use calbridge_auth::{
        CredentialRecord, MemoryTokenStore, OAuthClient, OAuthConfig, SessionOptions, TokenGrant,
        TokenStore,
    };
    use calbridge_core::EventDraft;

    fn profile(id: &str) -> ProfileId {
        ProfileId::new(id).unwrap()
    }

    struct Fixture {
        handler: RequestHandler,
        store: Arc<MemoryTokenStore>,
    }

    async fn fixture(token_server: &MockServer, calendar_server: &MockServer) -> Fixture {
        let store = Arc::new(MemoryTokenStore::new());
        let config = OAuthConfig::new(
            "client-id",
            "client-secret",
            "http://127.0.0.1:835/oauth/callback",
            vec!["https://www.googleapis.com/auth/calendar.events".to_string()],
        )
        .with_token_url(format!("{}/token", token_server.uri()));
        let oauth = Arc::new(OAuthClient::new(config, Duration::from_secs(5)));
        let session = Arc::new(SessionManager::new(
            store.clone(),
            oauth,
            SessionOptions::default().with_authorize_timeout(Duration::from_millis(50)),
        ));
        let calendar = Arc::new(
            GoogleCalendarClient::new(Duration::from_secs(5))
                .with_base_url(calendar_server.uri()),
        );
        Fixture {
            handler: RequestHandler::new(Arc::new(ServerState::new()), session, calendar),
            store,
        }
    }

    async fn seed(store: &MemoryTokenStore, id: &str, access: &str, with_refresh: bool) {
        let record = CredentialRecord::from_grant(
            TokenGrant {
                access_token: access.to_string(),
                refresh_token: with_refresh.then(|| "rt-1".to_string()),
                expires_in: Some(3600),
            },
            vec!["https://www.googleapis.com/auth/calendar.events".to_string()],
        );
        store.put(&profile(id), &record).await.unwrap();
    }

    fn event_body(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "summary": "Standup",
            "start": { "dateTime": "2026-03-15T10:00:00Z" },
            "end": { "dateTime": "2026-03-15T10:15:00Z" },
        })
    }

    #[tokio::test]
    async fn ping_returns_pong() {
        let token_server = MockServer::start().await;
        let calendar_server = MockServer::start().await;
        let fx = fixture(&token_server, &calendar_server).await;

        assert_eq!(fx.handler.handle(Request::Ping).await, Response::Pong);
    }

    #[tokio::test]
    async fn invalid_max_results_fails_before_any_credential_work() {
        let token_server = MockServer::start().await;
        let calendar_server = MockServer::start().await;
        // No mocks mounted: any request to either server would 404 loudly,
        // but the point is the expect(0) below.
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&calendar_server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&token_server)
            .await;

        let fx = fixture(&token_server, &calendar_server).await;

        for bad in [0, 101, 5000] {
            let response = fx
                .handler
                .handle(Request::ListEvents {
                    profile: None,
                    max_results: Some(bad),
                    time_min: None,
                })
                .await;
            let error = response.as_error().unwrap();
            assert_eq!(error.code, ErrorCode::InvalidParameters, "max_results={bad}");
        }
    }

    #[tokio::test]
    async fn invalid_draft_fails_before_any_credential_work() {
        let token_server = MockServer::start().await;
        let calendar_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&token_server)
            .await;

        let fx = fixture(&token_server, &calendar_server).await;

        let start = Utc::now();
        // end before start
        let draft = EventDraft::new("Backwards", start, start - ChronoDuration::hours(1));
        let response = fx
            .handler
            .handle(Request::create_event(None, draft))
            .await;
        assert_eq!(
            response.as_error().unwrap().code,
            ErrorCode::InvalidParameters
        );
    }

    #[tokio::test]
    async fn list_events_uses_stored_token() {
        let token_server = MockServer::start().await;
        let calendar_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .and(header("authorization", "Bearer at-valid"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"items": [event_body("evt-1")]})),
            )
            .expect(1)
            .mount(&calendar_server)
            .await;

        let fx = fixture(&token_server, &calendar_server).await;
        seed(&fx.store, "default", "at-valid", true).await;

        let response = fx.handler.handle(Request::list_events(None)).await;
        match response {
            Response::Events { events } => {
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].id, "evt-1");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_token_is_refreshed_and_retried_once() {
        let token_server = MockServer::start().await;
        let calendar_server = MockServer::start().await;

        // The stored token is rejected; the refreshed one works.
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .and(header("authorization", "Bearer at-stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&calendar_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .and(header("authorization", "Bearer at-fresh"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"items": [event_body("evt-1")]})),
            )
            .expect(1)
            .mount(&calendar_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "at-fresh", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&token_server)
            .await;

        let fx = fixture(&token_server, &calendar_server).await;
        seed(&fx.store, "default", "at-stale", true).await;

        let response = fx.handler.handle(Request::list_events(None)).await;
        assert!(response.is_success(), "got {response:?}");
    }

    #[tokio::test]
    async fn second_rejection_requires_reauthorization() {
        let token_server = MockServer::start().await;
        let calendar_server = MockServer::start().await;

        // Provider rejects every token, refreshed or not.
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&calendar_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "at-fresh", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&token_server)
            .await;

        let fx = fixture(&token_server, &calendar_server).await;
        seed(&fx.store, "default", "at-stale", true).await;

        let response = fx.handler.handle(Request::list_events(None)).await;
        let error = response.as_error().unwrap();
        assert_eq!(error.code, ErrorCode::ReauthorizationRequired);
        assert_eq!(
            error.profile.as_ref().map(ProfileId::as_str),
            Some("default")
        );
    }

    #[tokio::test]
    async fn unauthorized_profile_times_out_waiting_for_consent() {
        let token_server = MockServer::start().await;
        let calendar_server = MockServer::start().await;
        let fx = fixture(&token_server, &calendar_server).await;

        // No stored credential and nobody completes the consent flow.
        let response = fx
            .handler
            .handle(Request::list_events(Some(profile("work"))))
            .await;
        let error = response.as_error().unwrap();
        assert_eq!(error.code, ErrorCode::AuthorizationTimedOut);
        assert_eq!(error.profile.as_ref().map(ProfileId::as_str), Some("work"));
    }

    #[tokio::test]
    async fn create_event_returns_created() {
        let token_server = MockServer::start().await;
        let calendar_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .and(header("authorization", "Bearer at-valid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(event_body("evt-new")))
            .expect(1)
            .mount(&calendar_server)
            .await;

        let fx = fixture(&token_server, &calendar_server).await;
        seed(&fx.store, "default", "at-valid", true).await;

        let start = Utc::now();
        let draft = EventDraft::new("Standup", start, start + ChronoDuration::hours(1));
        let response = fx.handler.handle(Request::create_event(None, draft)).await;
        match response {
            Response::Created { event } => assert_eq!(event.id, "evt-new"),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_reports_profiles() {
        let token_server = MockServer::start().await;
        let calendar_server = MockServer::start().await;
        let fx = fixture(&token_server, &calendar_server).await;
        seed(&fx.store, "work", "at", true).await;
        seed(&fx.store, "personal", "at2", true).await;

        let response = fx.handler.handle(Request::Status).await;
        match response {
            Response::Status { info } => {
                assert_eq!(info.profiles.len(), 2);
                assert!(info.profiles.iter().all(|p| p.authorized));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn revoke_deletes_credential() {
        let token_server = MockServer::start().await;
        let calendar_server = MockServer::start().await;
        let fx = fixture(&token_server, &calendar_server).await;
        seed(&fx.store, "work", "at", true).await;

        let response = fx
            .handler
            .handle(Request::revoke(Some(profile("work"))))
            .await;
        assert_eq!(response, Response::Ok);
        assert!(fx.store.get(&profile("work")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shutdown_flags_state_and_rejects_later_requests() {
        let token_server = MockServer::start().await;
        let calendar_server = MockServer::start().await;
        let fx = fixture(&token_server, &calendar_server).await;

        let response = fx.handler.handle(Request::Shutdown).await;
        assert_eq!(response, Response::Ok);
        assert!(fx.handler.state().is_shutdown_requested());

        let response = fx.handler.handle(Request::Status).await;
        assert_eq!(
            response.as_error().unwrap().code,
            ErrorCode::ShuttingDown
        );
        // Ping still answers so health checks keep working during drain
        assert_eq!(fx.handler.handle(Request::Ping).await, Response::Pong);
    }
}
