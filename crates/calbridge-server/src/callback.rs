//! OAuth callback endpoint.
//!
//! A small loopback HTTP listener that accepts the provider's redirect after
//! the user completes (or denies) consent. The state token in the redirect
//! selects which pending authorization flow gets woken; the listener itself
//! holds no per-flow state and serves every profile.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use calbridge_auth::{CallbackOutcome, SessionManager};

use crate::error::ServerResult;

/// Path the OAuth application redirects to.
const CALLBACK_PATH: &str = "/oauth/callback";

const SUCCESS_RESPONSE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
    <html><body><h1>Authorization Successful</h1>\
    <p>You can close this window and return to the terminal.</p></body></html>";

const FAILURE_RESPONSE: &str = "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html\r\n\r\n\
    <html><body><h1>Authorization Failed</h1>\
    <p>You can close this window.</p></body></html>";

const NOT_FOUND_RESPONSE: &str = "HTTP/1.1 404 Not Found\r\nContent-Type: text/html\r\n\r\n\
    <html><body><h1>Not Found</h1></body></html>";

/// Loopback HTTP server for OAuth redirects.
pub struct CallbackServer {
    listener: TcpListener,
    session: Arc<SessionManager>,
}

impl CallbackServer {
    /// Binds the callback listener.
    pub async fn bind(addr: &str, session: Arc<SessionManager>) -> ServerResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Callback server listening");
        Ok(Self { listener, session })
    }

    /// The address the listener actually bound to.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts redirects until the task is dropped.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "Callback connection");
                    let session = self.session.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_redirect(stream, session).await {
                            warn!(error = %e, "Failed to handle callback request");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept callback connection");
                }
            }
        }
    }
}

/// Handles one browser request on the callback listener.
async fn handle_redirect(
    mut stream: TcpStream,
    session: Arc<SessionManager>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(&mut stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Parse the request line: GET /oauth/callback?code=...&state=... HTTP/1.1
    let mut parts = request_line.split_whitespace();
    let (method, path) = match (parts.next(), parts.next()) {
        (Some(method), Some(path)) => (method, path),
        _ => {
            stream.write_all(NOT_FOUND_RESPONSE.as_bytes()).await?;
            return Ok(());
        }
    };

    if method != "GET" || !path.starts_with(CALLBACK_PATH) {
        stream.write_all(NOT_FOUND_RESPONSE.as_bytes()).await?;
        return Ok(());
    }

    let query = path.find('?').map(|i| &path[i + 1..]).unwrap_or("");
    let params = parse_query(query);

    let response = match dispatch_outcome(&session, &params) {
        Ok(profile) => {
            info!(%profile, "Authorization callback resolved");
            SUCCESS_RESPONSE
        }
        Err(reason) => {
            warn!(reason, "Authorization callback rejected");
            FAILURE_RESPONSE
        }
    };

    stream.write_all(response.as_bytes()).await?;
    stream.flush().await
}

/// Resolves the callback parameters against the pending flows.
///
/// Returns the profile the flow belonged to, or a human-readable reason the
/// callback was rejected.
fn dispatch_outcome(
    session: &SessionManager,
    params: &QueryParams,
) -> Result<calbridge_core::ProfileId, &'static str> {
    let state = params.state.as_deref().ok_or("missing state parameter")?;

    let outcome = if let Some(ref error) = params.error {
        CallbackOutcome::Denied(error.clone())
    } else if let Some(ref code) = params.code {
        CallbackOutcome::Code(code.clone())
    } else {
        return Err("missing authorization code");
    };

    session
        .resolve_callback(state, outcome)
        .map_err(|_| "unknown state token")
}

#[derive(Debug, Default)]
struct QueryParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

fn parse_query(query: &str) -> QueryParams {
    let mut params = QueryParams::default();
    for param in query.split('&') {
        let mut kv = param.splitn(2, '=');
        if let (Some(key), Some(value)) = (kv.next(), kv.next()) {
            let value = urlencoding::decode(value).unwrap_or_default().into_owned();
            match key {
                "code" => params.code = Some(value),
                "state" => params.state = Some(value),
                "error" => params.error = Some(value),
                _ => {}
            }
        }
    }
    params
}
