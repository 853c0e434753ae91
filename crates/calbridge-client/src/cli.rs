//! Command-line interface definition.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

/// calbridge - Google Calendar from the command line
#[derive(Debug, Parser)]
#[command(name = "calbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the daemon socket
    #[arg(long, env = "CALBRIDGE_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, default_value = "330")]
    pub timeout: u64,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List upcoming events
    List {
        /// Profile whose credential to use
        #[arg(long)]
        profile: Option<String>,

        /// Maximum number of events to return (1-100)
        #[arg(long)]
        max_results: Option<u32>,

        /// Only show events starting at or after this RFC 3339 time
        #[arg(long)]
        time_min: Option<DateTime<Utc>>,
    },

    /// Create a calendar event
    Create {
        /// Event title
        summary: String,

        /// Event start time (RFC 3339, e.g. 2026-09-01T14:00:00Z)
        start: DateTime<Utc>,

        /// Event end time (RFC 3339)
        end: DateTime<Utc>,

        /// Event description
        #[arg(long)]
        description: Option<String>,

        /// Profile whose credential to use
        #[arg(long)]
        profile: Option<String>,
    },

    /// Run the interactive authorization flow for a profile
    Auth {
        /// Profile to authorize
        #[arg(long)]
        profile: Option<String>,
    },

    /// Delete the stored credential for a profile
    Revoke {
        /// Profile to revoke
        #[arg(long)]
        profile: Option<String>,
    },

    /// Show daemon status
    Status,

    /// Check whether the daemon is running
    Ping,

    /// Ask the daemon to shut down
    Shutdown,
}
