//! sessionkeep - keep an authenticated API session alive from the terminal.
//!
//! Restores the persisted session on every invocation, then runs one command
//! against it. Tokens are refreshed transparently when the server rejects
//! them.

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use sessionkeep_core::{
    ApiRequest, Config, SessionEvent, SessionManager, SessionSnapshot, SessionStatus,
    Subscription, Topic,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Prefix of the daily-rolling log file in the data directory
const LOG_FILE_PREFIX: &str = "sessionkeep.log";

const USAGE: &str = "\
Usage: sessionkeep <command>

Commands:
  status [--json]           Show the current session
  login [email] [--forget]  Sign in (remembers the email unless --forget)
  logout                    Sign out and clear stored credentials
  refresh                   Force an access token refresh
  get <path>                Send an authenticated GET request
  help                      Show this message

Environment:
  SESSIONKEEP_API_URL       Override the API base URL
  SESSIONKEEP_DATA_DIR      Override the data directory
  RUST_LOG                  Log filter for stderr and the log file (default: warn)";

#[derive(Debug, PartialEq)]
enum Command {
    Status { json: bool },
    Login { email: Option<String>, remember: bool },
    Logout,
    Refresh,
    Get { path: String },
    Help,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some((name, rest)) = args.split_first() else {
        return Ok(Command::Status { json: false });
    };

    match name.as_str() {
        "status" => Ok(Command::Status {
            json: rest.iter().any(|a| a == "--json"),
        }),
        "login" => {
            let remember = !rest.iter().any(|a| a == "--forget");
            let email = rest.iter().find(|a| !a.starts_with("--")).cloned();
            Ok(Command::Login { email, remember })
        }
        "logout" => Ok(Command::Logout),
        "refresh" => Ok(Command::Refresh),
        "get" => match rest.first() {
            Some(path) => Ok(Command::Get { path: path.clone() }),
            None => bail!("get requires a path, e.g. `sessionkeep get /me`"),
        },
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and, when the data directory resolves, to a daily
/// rolling file. The returned guard must be held until exit so buffered
/// lines are flushed.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.data_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(e) => {
            eprintln!("Warning: file logging disabled: {}", e);
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn subscribe(manager: &SessionManager) -> Vec<Subscription> {
    let events = manager.events();
    vec![
        events.subscribe(Topic::TokenRefreshed, |event| {
            if let SessionEvent::TokenRefreshed(tokens) = event {
                info!(access = %tokens.preview(), "Access token refreshed");
            }
            Ok(())
        }),
        events.subscribe(Topic::AuthError, |_| {
            eprintln!("The server rejected the session even after a token refresh.");
            Ok(())
        }),
        events.subscribe(Topic::AuthLogout, |_| {
            eprintln!("Signed out. Run `sessionkeep login` to sign in again.");
            Ok(())
        }),
    ]
}

fn print_status(snapshot: &SessionSnapshot) {
    let status = match snapshot.status {
        SessionStatus::Authenticated => "signed in",
        SessionStatus::Refreshing => "refreshing",
        SessionStatus::Unauthenticated => "signed out",
    };
    println!("Status:     {}", status);

    if let Some(user) = &snapshot.user {
        println!("User:       {}", user.display_name().unwrap_or("(unknown)"));
    }
    if let Some(expires_at) = snapshot.tokens.as_ref().and_then(|t| t.expires_at()) {
        println!("Expires:    {}", expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(error) = snapshot.last_error {
        println!("Last error: {:?}", error);
    }
    println!("Generation: {}", snapshot.generation);
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn login(manager: &SessionManager, email: Option<String>, remember: bool) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => match manager.remembered_email() {
            Some(remembered) => {
                let entered = prompt_line(&format!("Email [{}]: ", remembered))?;
                if entered.is_empty() {
                    remembered
                } else {
                    entered
                }
            }
            None => prompt_line("Email: ")?,
        },
    };
    let password = rpassword::prompt_password("Password: ")?;

    let snapshot = manager
        .login(&email, &password, remember)
        .await
        .context("Login failed")?;
    let name = snapshot
        .user
        .as_ref()
        .and_then(|u| u.display_name())
        .unwrap_or(&email);
    println!("Signed in as {}", name);
    Ok(())
}

async fn run(manager: &SessionManager, command: Command, snapshot: SessionSnapshot) -> Result<()> {
    match command {
        Command::Status { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_status(&snapshot);
            }
        }
        Command::Login { email, remember } => login(manager, email, remember).await?,
        Command::Logout => {
            if !snapshot.is_authenticated() {
                warn!("Logout requested without an active session");
            }
            manager.logout();
            println!("Signed out");
        }
        Command::Refresh => {
            let tokens = manager.refresh().await.context("Refresh failed")?;
            println!("Refreshed access token {}", tokens.preview());
        }
        Command::Get { path } => {
            if !snapshot.is_authenticated() {
                bail!("Not signed in. Run `sessionkeep login` first.");
            }
            let response = manager
                .gateway()
                .send(ApiRequest::get(path.as_str()))
                .await
                .with_context(|| format!("GET {} failed", path))?;
            if !response.is_success() {
                bail!("GET {} returned {}: {}", path, response.status, response.body);
            }
            match serde_json::from_str::<serde_json::Value>(&response.body) {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(_) => println!("{}", response.body),
            }
        }
        Command::Help => println!("{}", USAGE),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config);
    info!(api = %config.api_base_url, "sessionkeep starting");

    let manager = SessionManager::from_config(&config).context("Failed to set up session")?;
    let subscriptions = subscribe(&manager);

    let snapshot = manager.bootstrap().await;
    let result = run(&manager, command, snapshot).await;

    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args(&[]).unwrap(), Command::Status { json: false });
        assert_eq!(
            parse_args(&args(&["status", "--json"])).unwrap(),
            Command::Status { json: true }
        );
        assert_eq!(
            parse_args(&args(&["login", "a@b.c", "--forget"])).unwrap(),
            Command::Login {
                email: Some("a@b.c".to_string()),
                remember: false
            }
        );
        assert_eq!(
            parse_args(&args(&["get", "/me"])).unwrap(),
            Command::Get {
                path: "/me".to_string()
            }
        );
        assert_eq!(parse_args(&args(&["-h"])).unwrap(), Command::Help);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(&args(&["get"])).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
    }
}
