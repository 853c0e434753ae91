//! Human-readable rendering of daemon responses.

use calbridge_core::CalendarEvent;
use calbridge_protocol::StatusInfo;

/// Renders an event list, one event per line.
pub fn render_events(events: &[CalendarEvent]) -> String {
    if events.is_empty() {
        return "No upcoming events.".to_string();
    }

    let mut out = String::new();
    for event in events {
        out.push_str(&format!(
            "{}  {}  {}\n",
            event.start.format("%Y-%m-%d %H:%M"),
            event.end.format("%H:%M"),
            event.summary,
        ));
        if let Some(ref link) = event.html_link {
            out.push_str(&format!("    {link}\n"));
        }
    }
    out.trim_end().to_string()
}

/// Renders a created event confirmation.
pub fn render_created(event: &CalendarEvent) -> String {
    let mut out = format!(
        "Created \"{}\" ({} to {})",
        event.summary,
        event.start.format("%Y-%m-%d %H:%M"),
        event.end.format("%H:%M"),
    );
    if let Some(ref link) = event.html_link {
        out.push_str(&format!("\n  {link}"));
    }
    out
}

/// Renders daemon status.
pub fn render_status(info: &StatusInfo) -> String {
    let mut out = format!("Daemon up for {}\n", format_duration(info.uptime_seconds));
    if info.profiles.is_empty() {
        out.push_str("No profiles authorized.");
        return out;
    }

    for status in &info.profiles {
        let state = if status.authorized {
            "authorized"
        } else {
            "needs authorization"
        };
        out.push_str(&format!("  {:<20} {state}", status.profile.as_str()));
        if let Some(expires_at) = status.expires_at {
            out.push_str(&format!(
                " (token expires {})",
                expires_at.format("%Y-%m-%d %H:%M UTC")
            ));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn format_duration(seconds: u64) -> String {
    if seconds >= 3600 {
        format!("{}h{:02}m", seconds / 3600, (seconds % 3600) / 60)
    } else if seconds >= 60 {
        format!("{}m{:02}s", seconds / 60, seconds % 60)
    } else {
        format!("{seconds}s")
    }
}
