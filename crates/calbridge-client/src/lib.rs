//! CLI and socket client for the calbridge daemon.

pub mod cli;
pub mod error;
pub mod output;
pub mod socket;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
pub use socket::SocketClient;
