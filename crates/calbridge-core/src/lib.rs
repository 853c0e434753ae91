//! Core types: events, drafts, profiles, tracing setup

pub mod event;
pub mod profile;
pub mod tracing;

pub use event::{CalendarEvent, DraftError, EventDraft, MAX_SUMMARY_LENGTH};
pub use profile::{InvalidProfileId, ProfileId};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
