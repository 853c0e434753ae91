//! OAuth 2.0 authorization-code flow with PKCE.
//!
//! Implements RFC 7636 (Proof Key for Code Exchange) against the provider's
//! authorization and token endpoints. The interactive half of the flow (who
//! waits for the redirect, and how) lives in [`crate::session`]; this module
//! only knows how to build consent URLs and talk to the token endpoint.
//!
//! # Security
//!
//! - PKCE prevents authorization code interception attacks
//! - The state parameter correlates callbacks and prevents CSRF
//! - Credentials are stored with restrictive file permissions by the store

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng as _;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{AuthError, AuthResult};

/// Google OAuth endpoints.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// The PKCE code verifier length (in bytes, before base64 encoding).
const CODE_VERIFIER_LENGTH: usize = 32;

/// OAuth application configuration.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Redirect URI registered with the provider; the callback listener
    /// must serve this address.
    pub redirect_uri: String,
    /// Scopes requested at consent time.
    pub scopes: Vec<String>,
    /// Authorization (consent page) endpoint.
    pub auth_url: String,
    /// Token exchange/refresh endpoint.
    pub token_url: String,
}

impl OAuthConfig {
    /// Creates a config against Google's endpoints.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }

    /// Builder: override the authorization endpoint.
    #[must_use]
    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = url.into();
        self
    }

    /// Builder: override the token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }
}

/// A successful response from the token endpoint.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TokenGrant {
    /// The access token for API requests.
    pub access_token: String,
    /// A refresh token, when the provider issued or rotated one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// OAuth client for the provider's token endpoints.
#[derive(Debug)]
pub struct OAuthClient {
    config: OAuthConfig,
    http_client: reqwest::Client,
}

impl OAuthClient {
    /// Creates a new OAuth client.
    pub fn new(config: OAuthConfig, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to create HTTP client");

        Self {
            config,
            http_client,
        }
    }

    /// Returns the configured scopes.
    pub fn scopes(&self) -> &[String] {
        &self.config.scopes
    }

    /// Builds the consent page URL for a PKCE flow.
    ///
    /// `access_type=offline` plus `prompt=consent` makes the provider issue a
    /// refresh token on every completed flow.
    pub fn consent_url(&self, pkce: &PkceFlow) -> String {
        let scope = self.config.scopes.join(" ");

        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&\
            code_challenge={}&code_challenge_method=S256&state={}&\
            access_type=offline&prompt=consent",
            self.config.auth_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&scope),
            urlencoding::encode(&pkce.challenge),
            urlencoding::encode(&pkce.state),
        )
    }

    /// Exchanges an authorization code (with its PKCE verifier) for tokens.
    pub async fn exchange_code(&self, code: &str, verifier: &str) -> AuthResult<TokenGrant> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("code_verifier", verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];

        info!("exchanging authorization code for tokens");
        self.token_request(&params).await
    }

    /// Refreshes an access token using the stored refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidGrant`] when the provider reports the
    /// refresh token as revoked or expired; callers should delete the stored
    /// credential and require re-authorization.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenGrant> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        debug!("refreshing access token");
        self.token_request(&params).await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> AuthResult<TokenGrant> {
        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| AuthError::network(format!("token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::network(format!("failed to read token response: {e}")))?;

        if !status.is_success() {
            if is_invalid_grant(&body) {
                return Err(AuthError::InvalidGrant);
            }
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        let grant: TokenGrant = serde_json::from_str(&body)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        info!("token endpoint returned a grant");
        Ok(grant)
    }
}

/// Returns true if a token endpoint error body reports `invalid_grant`.
fn is_invalid_grant(body: &str) -> bool {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
    }

    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .is_some_and(|e| e == "invalid_grant")
}

/// PKCE flow state and utilities.
///
/// Implements RFC 7636 (Proof Key for Code Exchange).
#[derive(Debug)]
pub struct PkceFlow {
    /// The code verifier (high-entropy random string).
    pub verifier: String,
    /// The code challenge (SHA-256 hash of verifier, base64url encoded).
    pub challenge: String,
    /// Random state for CSRF protection and callback correlation.
    pub state: String,
}

impl PkceFlow {
    /// Creates a new PKCE flow with random verifier and state.
    pub fn new() -> Self {
        let verifier = Self::generate_verifier();
        let challenge = Self::compute_challenge(&verifier);
        let state = Self::generate_state();

        Self {
            verifier,
            challenge,
            state,
        }
    }

    /// Generates a cryptographically random code verifier.
    fn generate_verifier() -> String {
        let mut rng = rand::rng();
        let bytes: Vec<u8> = (0..CODE_VERIFIER_LENGTH).map(|_| rng.random()).collect();
        URL_SAFE_NO_PAD.encode(&bytes)
    }

    /// Computes the SHA-256 challenge for a code verifier.
    fn compute_challenge(verifier: &str) -> String {
        let digest = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }

    /// Generates a random state string.
    fn generate_state() -> String {
        let mut rng = rand::rng();
        let bytes: Vec<u8> = (0..16).map(|_| rng.random()).collect();
        URL_SAFE_NO_PAD.encode(&bytes)
    }
}

impl Default for PkceFlow {
    fn default() -> Self {
        Self::new()
    }
}
