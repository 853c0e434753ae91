//! Request and response types for the calbridge protocol.

use calbridge_core::{CalendarEvent, EventDraft, ProfileId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PROTOCOL_VERSION;

/// Message envelope wrapping all protocol messages.
///
/// Every message exchanged between client and server is wrapped in this envelope
/// which provides versioning and request correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Protocol version (always "1" for v1).
    pub protocol_version: String,
    /// Unique request ID for correlation.
    pub request_id: String,
    /// The actual payload.
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Creates a new envelope with the current protocol version.
    pub fn new(request_id: impl Into<String>, payload: T) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            request_id: request_id.into(),
            payload,
        }
    }

    /// Creates a request envelope.
    pub fn request(request_id: impl Into<String>, request: T) -> Self {
        Self::new(request_id, request)
    }

    /// Creates a response envelope.
    pub fn response(request_id: impl Into<String>, response: T) -> Self {
        Self::new(request_id, response)
    }

    /// Checks if this envelope uses a compatible protocol version.
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }
}

/// Request types that can be sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// List upcoming events from the calendar.
    ListEvents {
        /// Profile whose credential should be used ("default" when absent).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile: Option<ProfileId>,

        /// Maximum number of events to return (1..=100, default 10).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_results: Option<u32>,

        /// Lower bound on event start time (defaults to now).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_min: Option<DateTime<Utc>>,
    },

    /// Create a new calendar event.
    CreateEvent {
        /// Profile whose credential should be used ("default" when absent).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile: Option<ProfileId>,

        /// The event to create.
        #[serde(flatten)]
        draft: EventDraft,
    },

    /// Run the interactive authorization flow for a profile without
    /// performing a calendar operation.
    Authorize {
        /// Profile to authorize ("default" when absent).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile: Option<ProfileId>,
    },

    /// Delete the stored credential for a profile.
    Revoke {
        /// Profile to revoke ("default" when absent).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile: Option<ProfileId>,
    },

    /// Get server status.
    Status,

    /// Request server shutdown.
    Shutdown,

    /// Ping to check server liveness.
    Ping,
}

impl Request {
    /// Creates a ListEvents request with defaults.
    pub fn list_events(profile: Option<ProfileId>) -> Self {
        Self::ListEvents {
            profile,
            max_results: None,
            time_min: None,
        }
    }

    /// Creates a CreateEvent request.
    pub fn create_event(profile: Option<ProfileId>, draft: EventDraft) -> Self {
        Self::CreateEvent { profile, draft }
    }

    /// Creates an Authorize request.
    pub fn authorize(profile: Option<ProfileId>) -> Self {
        Self::Authorize { profile }
    }

    /// Creates a Revoke request.
    pub fn revoke(profile: Option<ProfileId>) -> Self {
        Self::Revoke { profile }
    }

    /// Returns the profile this request targets, if it targets one.
    pub fn profile(&self) -> Option<&ProfileId> {
        match self {
            Self::ListEvents { profile, .. }
            | Self::CreateEvent { profile, .. }
            | Self::Authorize { profile }
            | Self::Revoke { profile } => profile.as_ref(),
            Self::Status | Self::Shutdown | Self::Ping => None,
        }
    }
}

/// Response types that can be sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// List of calendar events.
    Events {
        /// The events matching the request.
        events: Vec<CalendarEvent>,
    },

    /// A single created event.
    Created {
        /// The event as the provider stored it.
        event: CalendarEvent,
    },

    /// A profile completed authorization.
    Authorized {
        /// The profile that is now authorized.
        profile: ProfileId,
    },

    /// Server status information.
    Status {
        /// Status details.
        #[serde(flatten)]
        info: StatusInfo,
    },

    /// Generic success response.
    Ok,

    /// Error response.
    Error {
        /// Error details.
        #[serde(flatten)]
        error: ErrorResponse,
    },

    /// Pong response to Ping.
    Pong,
}

impl Response {
    /// Creates an Events response.
    pub fn events(events: Vec<CalendarEvent>) -> Self {
        Self::Events { events }
    }

    /// Creates a Created response.
    pub fn created(event: CalendarEvent) -> Self {
        Self::Created { event }
    }

    /// Creates an Authorized response.
    pub fn authorized(profile: ProfileId) -> Self {
        Self::Authorized { profile }
    }

    /// Creates a Status response.
    pub fn status(info: StatusInfo) -> Self {
        Self::Status { info }
    }

    /// Creates an Error response.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            error: ErrorResponse::new(code, message),
        }
    }

    /// Creates an error response from an ErrorResponse.
    pub fn from_error(error: ErrorResponse) -> Self {
        Self::Error { error }
    }

    /// Returns true if this is a success response.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Error { .. })
    }

    /// Returns the error if this is an error response.
    pub fn as_error(&self) -> Option<&ErrorResponse> {
        match self {
            Self::Error { error } => Some(error),
            _ => None,
        }
    }
}

/// Server status information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    /// Server uptime in seconds.
    pub uptime_seconds: u64,

    /// Credential state for each known profile.
    pub profiles: Vec<ProfileStatus>,
}

impl StatusInfo {
    /// Creates a new StatusInfo with no profiles.
    pub fn new(uptime_seconds: u64) -> Self {
        Self {
            uptime_seconds,
            profiles: Vec::new(),
        }
    }

    /// Builder: add a profile status.
    #[must_use]
    pub fn with_profile(mut self, profile: ProfileStatus) -> Self {
        self.profiles.push(profile);
        self
    }
}

/// Credential state of a single profile, as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStatus {
    /// The profile identifier.
    pub profile: ProfileId,

    /// Whether a credential is stored and not yet expired.
    pub authorized: bool,

    /// When the stored access token expires, if one is stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Error codes for protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Unknown or internal error.
    InternalError,

    /// Invalid request format.
    InvalidRequest,

    /// A tool parameter failed validation.
    InvalidParameters,

    /// The profile has no usable credential and must re-run authorization.
    ReauthorizationRequired,

    /// Interactive authorization did not complete within the deadline.
    AuthorizationTimedOut,

    /// The token store could not be reached.
    StoreUnavailable,

    /// Rate limited by the calendar provider.
    RateLimited,

    /// Network failure reaching the provider.
    NetworkError,

    /// The calendar provider returned an error.
    ProviderError,

    /// Request timed out.
    Timeout,

    /// Server is shutting down.
    ShuttingDown,
}

impl ErrorCode {
    /// Returns a human-readable description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InternalError => "An internal error occurred",
            Self::InvalidRequest => "The request was invalid",
            Self::InvalidParameters => "A request parameter failed validation",
            Self::ReauthorizationRequired => "The profile must be re-authorized",
            Self::AuthorizationTimedOut => "Authorization did not complete in time",
            Self::StoreUnavailable => "The credential store is unavailable",
            Self::RateLimited => "Rate limited by calendar provider",
            Self::NetworkError => "Network error reaching calendar provider",
            Self::ProviderError => "Calendar provider returned an error",
            Self::Timeout => "The request timed out",
            Self::ShuttingDown => "Server is shutting down",
        }
    }
}

/// Error response details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// The profile the error concerns, when it concerns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileId>,
}

impl ErrorResponse {
    /// Creates a new error response.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            profile: None,
        }
    }

    /// Builder: attach the concerned profile.
    #[must_use]
    pub fn with_profile(mut self, profile: ProfileId) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Creates an invalid parameters error.
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParameters, message)
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

impl std::error::Error for ErrorResponse {}
