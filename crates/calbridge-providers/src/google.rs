//! Google Calendar API client.
//!
//! A low-level HTTP client for the Google Calendar v3 API. Every call takes
//! the access token as an argument; token lifecycle belongs to the session
//! layer, not here.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use calbridge_core::{CalendarEvent, EventDraft};

use crate::error::{ProviderError, ProviderResult};

/// Base URL for Google Calendar API v3.
const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Google Calendar API client.
#[derive(Debug)]
pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    base_url: String,
    calendar_id: String,
}

impl GoogleCalendarClient {
    /// Creates a new client against the user's primary calendar.
    pub fn new(timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to create HTTP client");

        Self {
            http_client,
            base_url: CALENDAR_API_BASE.to_string(),
            calendar_id: "primary".to_string(),
        }
    }

    /// Builder: override the API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Builder: target a calendar other than `primary`.
    #[must_use]
    pub fn with_calendar_id(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = calendar_id.into();
        self
    }

    /// Lists upcoming events, ordered by start time.
    ///
    /// Recurring events are expanded into single instances. Cancelled events
    /// and events without a resolvable start/end time are skipped.
    pub async fn list_events(
        &self,
        access_token: &str,
        time_min: DateTime<Utc>,
        max_results: u32,
    ) -> ProviderResult<Vec<CalendarEvent>> {
        let url = format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(&self.calendar_id)
        );

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("timeMin", time_min.to_rfc3339()),
                ("maxResults", max_results.to_string()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        let body = Self::check_status(response).await?;
        let list: EventListResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::invalid_response(format!("failed to parse response: {e}")))?;

        let events: Vec<CalendarEvent> = list
            .items
            .into_iter()
            .filter_map(convert_event)
            .collect();
        debug!("fetched {} events from calendar {}", events.len(), self.calendar_id);
        Ok(events)
    }

    /// Creates an event and returns it as the provider stored it.
    pub async fn insert_event(
        &self,
        access_token: &str,
        draft: &EventDraft,
    ) -> ProviderResult<CalendarEvent> {
        let url = format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(&self.calendar_id)
        );

        let mut body = json!({
            "summary": draft.summary,
            "start": { "dateTime": draft.start.to_rfc3339() },
            "end": { "dateTime": draft.end.to_rfc3339() },
        });
        if let Some(ref description) = draft.description {
            body["description"] = json!(description);
        }

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let body = Self::check_status(response).await?;
        let event: ApiEvent = serde_json::from_str(&body)
            .map_err(|e| ProviderError::invalid_response(format!("failed to parse response: {e}")))?;

        convert_event(event).ok_or_else(|| {
            ProviderError::invalid_response("created event missing id or times")
        })
    }

    /// Maps the HTTP status to a provider error, or returns the body.
    async fn check_status(response: reqwest::Response) -> ProviderResult<String> {
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::token_rejected(
                "access token expired or invalid",
            ));
        }

        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::authorization("access denied to calendar"));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(ProviderError::rate_limited(format!(
                "rate limit exceeded{}",
                retry_after
                    .map(|s| format!(", retry after {s} seconds"))
                    .unwrap_or_default()
            )));
        }

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::not_found("calendar not found"));
        }

        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::bad_request(format!(
                "API rejected request ({status}): {body}"
            )));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::server(format!(
                "API error ({status}): {body}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("failed to read response: {e}")))
    }
}

fn classify_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::network("request timeout")
    } else if e.is_connect() {
        ProviderError::network(format!("connection failed: {e}"))
    } else {
        ProviderError::network(format!("request failed: {e}"))
    }
}

/// Converts an API event to a [`CalendarEvent`].
fn convert_event(event: ApiEvent) -> Option<CalendarEvent> {
    if event.status.as_deref() == Some("cancelled") {
        return None;
    }

    let id = event.id?;
    let start = resolve_time(&event.start, &id, "start")?;
    let end = resolve_time(&event.end, &id, "end")?;

    let mut out = CalendarEvent::new(id, event.summary.unwrap_or_default(), start, end);
    out.description = event.description;
    out.html_link = event.html_link;
    out.status = event.status;
    Some(out)
}

/// Resolves a timed or all-day API time to UTC. All-day events map to
/// midnight UTC on their date.
fn resolve_time(time: &ApiEventTime, event_id: &str, which: &str) -> Option<DateTime<Utc>> {
    match (&time.date_time, &time.date) {
        (Some(dt), _) => match DateTime::parse_from_rfc3339(dt) {
            Ok(parsed) => Some(parsed.with_timezone(&Utc)),
            Err(e) => {
                warn!("event {event_id}: failed to parse {which} time: {e}");
                None
            }
        },
        (None, Some(date)) => match chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            Ok(parsed) => Some(
                parsed
                    .and_hms_opt(0, 0, 0)?
                    .and_utc(),
            ),
            Err(e) => {
                warn!("event {event_id}: failed to parse {which} date: {e}");
                None
            }
        },
        (None, None) => {
            warn!("event {event_id} has no {which} time");
            None
        }
    }
}

/// Response from the events.list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
}

/// A single event from the Google Calendar API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    #[serde(default)]
    start: ApiEventTime,
    #[serde(default)]
    end: ApiEventTime,
    html_link: Option<String>,
    status: Option<String>,
}

/// Event time from the API.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date: Option<String>,
    date_time: Option<String>,
}
