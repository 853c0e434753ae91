//! calbridged: the calbridge daemon.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use calbridge_auth::{FileTokenStore, OAuthClient, OAuthConfig, SessionManager, SessionOptions};
use calbridge_core::{TracingConfig, init_tracing};
use calbridge_providers::GoogleCalendarClient;
use calbridge_server::{
    AppConfig, CallbackServer, RequestHandler, ServerResult, ServerState, SocketServer,
    make_connection_handler,
};

/// Timeout for outgoing HTTP requests.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    if let Err(e) = init_tracing(TracingConfig::daemon()) {
        eprintln!("failed to initialize tracing: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run().await {
        error!(error = %e, "Daemon failed");
        std::process::exit(1);
    }
}

async fn run() -> ServerResult<()> {
    let config = AppConfig::from_env()?;

    let store = Arc::new(FileTokenStore::new(&config.token_dir));
    let oauth_config = OAuthConfig::new(
        config.client_id.clone(),
        config.client_secret.clone(),
        config.redirect_uri(),
        config.scopes.clone(),
    );
    let oauth = Arc::new(OAuthClient::new(oauth_config, HTTP_TIMEOUT));
    let session = Arc::new(SessionManager::new(
        store,
        oauth,
        SessionOptions::default()
            .with_authorize_timeout(config.authorize_timeout)
            .with_open_browser(config.open_browser),
    ));

    let mut calendar = GoogleCalendarClient::new(HTTP_TIMEOUT);
    if let Some(ref base_url) = config.base_url {
        calendar = calendar.with_base_url(base_url);
    }
    let calendar = Arc::new(calendar);

    let callback = CallbackServer::bind(&config.callback_addr, session.clone()).await?;
    tokio::spawn(callback.run());

    let state = Arc::new(ServerState::new());
    let handler = Arc::new(RequestHandler::new(state.clone(), session, calendar));

    let server = SocketServer::bind(config.server).await?;
    info!(socket = %server.socket_path().display(), "calbridged started");

    let shutdown = {
        let state = state.clone();
        async move {
            tokio::select! {
                _ = state.wait_for_shutdown() => {
                    info!("Shutting down on client request");
                }
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!(error = %e, "Failed to listen for shutdown signal");
                    }
                    info!("Shutting down on signal");
                }
            }
        }
    };

    server
        .run_until_shutdown(make_connection_handler(handler), shutdown)
        .await?;

    Ok(())
}
