//! Profile identifiers.
//!
//! A profile is an isolated authentication session identity: each profile owns
//! its own credential record, so one running instance can serve several
//! calendar accounts side by side. The identifier doubles as the token store
//! key (and, for the file backend, a file name), so the accepted character set
//! is deliberately narrow.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The profile used when a request does not select one explicitly.
pub const DEFAULT_PROFILE: &str = "default";

/// Maximum accepted length for a profile identifier.
const MAX_PROFILE_LENGTH: usize = 64;

/// Error returned for a malformed profile identifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidProfileId {
    /// The identifier is empty.
    #[error("profile id must not be empty")]
    Empty,

    /// The identifier is longer than the accepted maximum.
    #[error("profile id exceeds {MAX_PROFILE_LENGTH} characters")]
    TooLong,

    /// The identifier contains a character outside `[A-Za-z0-9._-]`.
    #[error("profile id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// An isolated authentication session identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProfileId(String);

impl ProfileId {
    /// Creates a validated profile identifier.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidProfileId`] when the identifier is empty, too long, or
    /// contains a character outside `[A-Za-z0-9._-]`.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidProfileId> {
        let id = id.into();
        if id.is_empty() {
            return Err(InvalidProfileId::Empty);
        }
        if id.len() > MAX_PROFILE_LENGTH {
            return Err(InvalidProfileId::TooLong);
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(InvalidProfileId::InvalidCharacter(c));
        }
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self(DEFAULT_PROFILE.to_string())
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ProfileId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProfileId {
    type Error = InvalidProfileId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProfileId> for String {
    fn from(id: ProfileId) -> Self {
        id.0
    }
}
