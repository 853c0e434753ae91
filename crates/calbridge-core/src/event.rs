//! Calendar event types shared between the server, protocol, and providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum accepted length for an event summary.
pub const MAX_SUMMARY_LENGTH: usize = 1024;

/// A calendar event as returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Provider-assigned event identifier.
    pub id: String,

    /// Event title.
    pub summary: String,

    /// Event body/description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Start of the event.
    pub start: DateTime<Utc>,

    /// End of the event.
    pub end: DateTime<Utc>,

    /// Link to the event in the provider's web UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,

    /// Provider status string (e.g. "confirmed").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl CalendarEvent {
    /// Creates a new event with the required fields.
    pub fn new(
        id: impl Into<String>,
        summary: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            summary: summary.into(),
            description: None,
            start,
            end,
            html_link: None,
            status: None,
        }
    }
}

/// Validation errors for an [`EventDraft`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DraftError {
    /// The summary is empty or whitespace-only.
    #[error("event summary must not be empty")]
    EmptySummary,

    /// The summary exceeds [`MAX_SUMMARY_LENGTH`].
    #[error("event summary exceeds {MAX_SUMMARY_LENGTH} characters")]
    SummaryTooLong,

    /// The end time is not strictly after the start time.
    #[error("event end ({end}) must be after start ({start})")]
    EndNotAfterStart {
        /// Requested start time.
        start: DateTime<Utc>,
        /// Requested end time.
        end: DateTime<Utc>,
    },
}

/// A new event to be created, before it has a provider identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    /// Event title.
    pub summary: String,

    /// Start of the event.
    pub start: DateTime<Utc>,

    /// End of the event.
    pub end: DateTime<Utc>,

    /// Event body/description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EventDraft {
    /// Creates a draft with the required fields.
    pub fn new(summary: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            summary: summary.into(),
            start,
            end,
            description: None,
        }
    }

    /// Builder: set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validates the draft before it is sent anywhere.
    ///
    /// # Errors
    ///
    /// Returns a [`DraftError`] when the summary is empty or too long, or when
    /// the end time is not strictly after the start time.
    pub fn validate(&self) -> Result<(), DraftError> {
        if self.summary.trim().is_empty() {
            return Err(DraftError::EmptySummary);
        }
        if self.summary.len() > MAX_SUMMARY_LENGTH {
            return Err(DraftError::SummaryTooLong);
        }
        if self.end <= self.start {
            return Err(DraftError::EndNotAfterStart {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}
