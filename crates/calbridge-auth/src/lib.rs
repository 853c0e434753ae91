//! Credential storage and OAuth session management for calbridge.
//!
//! This crate owns everything between "a request named a profile" and "here is
//! an access token you can put in an Authorization header":
//!
//! - [`store`]: the [`TokenStore`] trait plus file and in-memory backends
//! - [`oauth`]: the PKCE authorization-code flow against the provider's
//!   OAuth endpoints
//! - [`pending`]: correlation of consent-page callbacks to waiting profiles
//! - [`session`]: the [`SessionManager`], which ties the above together and
//!   guarantees one credential operation per profile at a time

pub mod error;
pub mod oauth;
pub mod pending;
pub mod record;
pub mod session;
pub mod store;

pub use error::{AuthError, AuthResult, StoreError};
pub use oauth::{OAuthClient, OAuthConfig, PkceFlow, TokenGrant};
pub use pending::{CallbackOutcome, PendingAuthorizations};
pub use record::CredentialRecord;
pub use session::{SessionManager, SessionOptions};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
