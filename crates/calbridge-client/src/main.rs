//! calbridge CLI entry point.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::Level;

use calbridge_client::cli::{Cli, Command};
use calbridge_client::error::{ClientError, ClientResult};
use calbridge_client::output;
use calbridge_client::socket::SocketClient;
use calbridge_core::{EventDraft, ProfileId, TracingConfig, init_tracing};
use calbridge_protocol::{Request, Response};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = if cli.debug {
        TracingConfig::cli_debug()
    } else {
        TracingConfig::default().with_level(Level::WARN)
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("failed to initialize tracing: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let socket_path = cli
        .socket
        .unwrap_or_else(calbridge_server::default_socket_path);
    let client = SocketClient::new(socket_path, Duration::from_secs(cli.timeout));

    match cli.command {
        Command::List {
            profile,
            max_results,
            time_min,
        } => {
            let request = Request::ListEvents {
                profile: parse_profile(profile)?,
                max_results,
                time_min,
            };
            match client.send(request).await? {
                Response::Events { events } => {
                    println!("{}", output::render_events(&events));
                    Ok(())
                }
                other => unexpected(other),
            }
        }

        Command::Create {
            summary,
            start,
            end,
            description,
            profile,
        } => {
            let mut draft = EventDraft::new(summary, start, end);
            if let Some(description) = description {
                draft = draft.with_description(description);
            }
            // Catch obvious mistakes before a round trip to the daemon
            draft
                .validate()
                .map_err(|e| ClientError::InvalidArgument(e.to_string()))?;

            let request = Request::create_event(parse_profile(profile)?, draft);
            match client.send(request).await? {
                Response::Created { event } => {
                    println!("{}", output::render_created(&event));
                    Ok(())
                }
                other => unexpected(other),
            }
        }

        Command::Auth { profile } => {
            println!("Waiting for authorization (check the daemon log for the consent URL)...");
            match client.send(Request::authorize(parse_profile(profile)?)).await? {
                Response::Authorized { profile } => {
                    println!("Profile {profile} authorized.");
                    Ok(())
                }
                other => unexpected(other),
            }
        }

        Command::Revoke { profile } => {
            match client.send(Request::revoke(parse_profile(profile)?)).await? {
                Response::Ok => {
                    println!("Credential deleted.");
                    Ok(())
                }
                other => unexpected(other),
            }
        }

        Command::Status => match client.send(Request::Status).await? {
            Response::Status { info } => {
                println!("{}", output::render_status(&info));
                Ok(())
            }
            other => unexpected(other),
        },

        Command::Ping => {
            if client.ping().await? {
                println!("Daemon is running.");
                Ok(())
            } else {
                Err(ClientError::Connection(format!(
                    "no daemon at {}",
                    client.socket_path().display()
                )))
            }
        }

        Command::Shutdown => match client.send(Request::Shutdown).await? {
            Response::Ok => {
                println!("Shutdown requested.");
                Ok(())
            }
            other => unexpected(other),
        },
    }
}

fn parse_profile(profile: Option<String>) -> ClientResult<Option<ProfileId>> {
    profile
        .map(|p| ProfileId::new(p).map_err(|e| ClientError::InvalidArgument(e.to_string())))
        .transpose()
}

fn unexpected(response: Response) -> ClientResult<()> {
    match response {
        Response::Error { error } => Err(error.into()),
        other => Err(ClientError::Protocol(format!(
            "unexpected response: {other:?}"
        ))),
    }
}
