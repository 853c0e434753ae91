//! Authentication and session error types.

use calbridge_core::ProfileId;
use thiserror::Error;

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Error raised by a [`TokenStore`](crate::store::TokenStore) backend.
///
/// A store error never encodes "no credential for this profile" (that is
/// `Ok(None)` from `get`); it always means the backend itself failed.
#[derive(Debug, Error)]
#[error("token store unavailable: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    /// Creates a store error from any displayable cause.
    pub fn new(cause: impl std::fmt::Display) -> Self {
        Self(cause.to_string())
    }
}

/// Errors that can occur while obtaining or refreshing credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token store backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The profile has no usable credential and the caller must run (or
    /// re-run) interactive authorization.
    #[error("profile {profile} must be re-authorized")]
    ReauthorizationRequired {
        /// The profile whose credential is gone.
        profile: ProfileId,
    },

    /// Interactive authorization did not complete before the deadline.
    #[error("authorization for profile {profile} timed out after {waited_secs}s")]
    AuthorizationTimedOut {
        /// The profile that was waiting for consent.
        profile: ProfileId,
        /// How long the server waited.
        waited_secs: u64,
    },

    /// The user (or the provider) denied the consent request.
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    /// A callback arrived carrying a state token no one is waiting on.
    #[error("unknown authorization state token: {0}")]
    UnknownState(String),

    /// The provider revoked or rejected the refresh token.
    #[error("refresh token no longer valid")]
    InvalidGrant,

    /// The token endpoint returned a non-success status.
    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// Network failure reaching the OAuth endpoints.
    #[error("network error: {0}")]
    Network(String),

    /// The token endpoint returned a body we could not parse.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// Internal invariant violation (e.g. a dropped callback channel).
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Creates a network error from any displayable cause.
    pub fn network(cause: impl std::fmt::Display) -> Self {
        Self::Network(cause.to_string())
    }

    /// Creates an internal error from any displayable cause.
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        Self::Internal(cause.to_string())
    }

    /// Returns true if retrying without user interaction could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::Network(_) | Self::TokenEndpoint { status: 500..=599, .. }
        )
    }
}
