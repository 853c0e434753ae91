//! Calendar provider clients for calbridge.
//!
//! The provider layer is a thin pass-through: it takes an access token per
//! call, performs one HTTP request, and classifies failures into
//! [`ProviderError`] codes the dispatcher can act on. It never caches events
//! and never touches the credential store.

pub mod error;
pub mod google;

pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use google::GoogleCalendarClient;
