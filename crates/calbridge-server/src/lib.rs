//! The calbridge daemon.
//!
//! Listens on a Unix socket for protocol requests, dispatches calendar
//! operations through per-profile OAuth sessions, and runs the loopback
//! HTTP endpoint that receives consent callbacks from the provider.

pub mod callback;
pub mod config;
pub mod error;
pub mod handler;
pub mod socket;

pub use callback::CallbackServer;
pub use config::{AppConfig, ServerConfig, default_socket_path, default_token_dir};
pub use error::{ServerError, ServerResult};
pub use handler::{RequestHandler, ServerState, handle_connection, make_connection_handler};
pub use socket::{Connection, SocketServer};
