//! Vetclinic - command-line client for the veterinary clinic API.
//!
//! Logs in, keeps the session between runs, and exposes the clinic's
//! resource collections for listing, inspection and raw requests.

mod commands;

use std::io;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vetclinic_core::api::Resource;
use vetclinic_core::config::Config;
use vetclinic_core::{ApiClient, ApiError};

// ============================================================================
// Constants
// ============================================================================

/// Directory for a daily rolling log file, in addition to stderr
const ENV_LOG_DIR: &str = "VETCLINIC_LOG_DIR";

/// Log file name prefix inside `VETCLINIC_LOG_DIR`
const LOG_FILE_PREFIX: &str = "vetclinic.log";

const USAGE: &str = "\
Usage: vetclinic <command> [args]

Commands:
  login [username]                 Log in and remember the session
  logout                           Invalidate the session
  whoami                           Verify the session with the server
  status                           Show the local session state
  list <resource> [key=value ...]  List a collection
  show <resource> <id>             Show one item
  delete <resource> <id>           Delete one item
  request <METHOD> <path> [json]   Send a raw authenticated request
  help                             Show this message

Resources: users, pets, appointments, consultations, clinical-histories,
           inventory, billing";

#[derive(Debug, PartialEq)]
enum Command {
    Login { username: Option<String> },
    Logout,
    Whoami,
    Status,
    List { resource: Resource, query: Vec<(String, String)> },
    Show { resource: Resource, id: String },
    Delete { resource: Resource, id: String },
    Request { method: String, path: String, body: Option<Value> },
    Help,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some((command, rest)) = args.split_first() else {
        return Ok(Command::Help);
    };

    let command = match command.as_str() {
        "login" => {
            if rest.len() > 1 {
                bail!("login takes at most one argument");
            }
            Command::Login {
                username: rest.first().cloned(),
            }
        }
        "logout" => Command::Logout,
        "whoami" => Command::Whoami,
        "status" => Command::Status,
        "list" => {
            let (resource, filters) = rest
                .split_first()
                .ok_or_else(|| anyhow!("list needs a resource"))?;
            let query = filters
                .iter()
                .map(|pair| parse_query_pair(pair))
                .collect::<Result<Vec<_>>>()?;
            Command::List {
                resource: resource.parse::<Resource>()?,
                query,
            }
        }
        "show" | "delete" => {
            let [resource, id] = rest else {
                bail!("{} needs a resource and an id", command);
            };
            let resource = resource.parse::<Resource>()?;
            let id = id.clone();
            if command == "show" {
                Command::Show { resource, id }
            } else {
                Command::Delete { resource, id }
            }
        }
        "request" => {
            let (method, path, body) = match rest {
                [method, path] => (method, path, None),
                [method, path, body] => {
                    let body: Value = serde_json::from_str(body)
                        .map_err(|e| anyhow!("Request body is not valid JSON: {}", e))?;
                    (method, path, Some(body))
                }
                _ => bail!("request needs a method, a path and an optional JSON body"),
            };
            Command::Request {
                method: method.to_uppercase(),
                path: path.clone(),
                body,
            }
        }
        "help" | "-h" | "--help" => Command::Help,
        other => bail!("Unknown command '{}'", other),
    };
    Ok(command)
}

fn parse_query_pair(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("Expected key=value, got '{}'", pair),
    }
}

/// Short message for the terminal. API failures get a hint instead of the
/// full context chain.
fn user_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<ApiError>() {
        Some(ApiError::Unauthorized) => {
            "Not logged in or session expired. Run `vetclinic login`.".to_string()
        }
        Some(ApiError::AccessDenied(_)) => {
            "Your account is not allowed to perform this action.".to_string()
        }
        Some(ApiError::NotFound(_)) => format!("{:#}", err),
        Some(ApiError::Timeout) => {
            "The API did not answer in time. Check VETCLINIC_API_URL or try again.".to_string()
        }
        Some(e) if e.is_connectivity() => format!("Could not reach the API: {}", e),
        Some(ApiError::RateLimited) => "Too many requests. Wait a moment and retry.".to_string(),
        Some(ApiError::BadRequest { body, .. }) => format!("Request rejected: {}", body),
        _ => format!("{:#}", err),
    }
}

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the log file on drop and must be held
/// until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

async fn run(command: Command) -> Result<()> {
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut config = Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring unreadable config file");
        Config::default()
    });
    let settings = config.resolve()?;
    let client = ApiClient::from_settings(&settings)?;
    debug!(?settings, "Settings resolved");

    match command {
        Command::Login { username } => commands::login(&client, &mut config, username).await,
        Command::Logout => commands::logout(&client).await,
        Command::Whoami => commands::whoami(&client).await,
        Command::Status => commands::status(&client, &settings),
        Command::List { resource, query } => commands::list(&client, resource, &query).await,
        Command::Show { resource, id } => commands::show(&client, resource, &id).await,
        Command::Delete { resource, id } => commands::delete(&client, resource, &id).await,
        Command::Request { method, path, body } => {
            commands::request(&client, &method, &path, body).await
        }
        Command::Help => Ok(()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    info!(?command, "vetclinic starting");
    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!(error = ?e, "Command failed");
            eprintln!("Error: {}", user_message(&e));
            ExitCode::FAILURE
        }
    }
}
