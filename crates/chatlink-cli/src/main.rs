//! chatlink - command-line client for the chat backend.
//!
//! Issues requests through the authenticated client from `chatlink-core`,
//! so expired access tokens are renewed transparently.

use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chatlink_core::api::ApiError;
use chatlink_core::config::{Config, StorageBackend, ENV_API_BASE_URL};
use chatlink_core::{ApiClient, ApiResponse, RequestOptions, Session};

/// Log directory; file logging is off unless this is set
const ENV_LOG_DIR: &str = "CHATLINK_LOG_DIR";

/// Exit code when the session has ended and a new login is needed
const EXIT_SESSION_ENDED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "chatlink")]
#[command(author, version, about = "Command-line client for the chat backend", long_about = None)]
struct Cli {
    /// Backend base URL for this invocation (overrides config and environment)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in and store the access token
    Login {
        /// Username (defaults to the last one used)
        username: Option<String>,
    },
    /// Log out and clear stored credentials
    Logout,
    /// Show whether an access token is held
    ///
    /// Renewal works only within a single run; a later run whose stored
    /// access token has expired needs `chatlink login` again.
    Status,
    /// GET a collection (chats, messages, models, agents), path or URL
    ///
    /// The renewal cookie set at login is not kept between runs, so an
    /// expired access token ends the session and needs a new login.
    Get { target: String },
    /// POST to a collection, path or URL
    ///
    /// The renewal cookie set at login is not kept between runs, so an
    /// expired access token ends the session and needs a new login.
    Post {
        target: String,
        /// JSON request body
        #[arg(long)]
        json: Option<String>,
    },
    /// Show or change configuration
    Config {
        #[arg(long)]
        set_base_url: Option<String>,
        #[arg(long)]
        set_storage: Option<StorageBackend>,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "chatlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(api_error) = e.downcast_ref::<ApiError>() {
                if api_error.is_session_ended() {
                    eprintln!("Session ended. Run `chatlink login` to sign in again.");
                    return ExitCode::from(EXIT_SESSION_ENDED);
                }
            }
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(ref url) = cli.base_url {
        config = config.with_overrides(|key| {
            if key == ENV_API_BASE_URL {
                Some(url.clone())
            } else {
                std::env::var(key).ok()
            }
        })?;
    }

    match cli.command {
        Commands::Config {
            set_base_url,
            set_storage,
        } => configure(config, set_base_url, set_storage),
        Commands::Login { username } => login(config, username).await,
        Commands::Logout => {
            let session = Session::new(ApiClient::from_config(&config)?);
            session.logout().await?;
            println!("Logged out");
            Ok(())
        }
        Commands::Status => {
            let api = ApiClient::from_config(&config)?;
            println!("{}", status_report(&api));
            Ok(())
        }
        Commands::Get { target } => {
            let api = ApiClient::from_config(&config)?;
            let response = api.request(&target, RequestOptions::get()).await?;
            print_response(&response)
        }
        Commands::Post { target, json } => {
            let api = ApiClient::from_config(&config)?;
            let body: serde_json::Value = match json {
                Some(raw) => serde_json::from_str(&raw).context("Invalid JSON body")?,
                None => serde_json::json!({}),
            };
            let options = RequestOptions::post().json(&body)?;
            let response = api.request(&target, options).await?;
            print_response(&response)
        }
    }
}

async fn login(mut config: Config, username: Option<String>) -> Result<()> {
    let username = match username.or_else(|| config.last_username.clone()) {
        Some(name) => name,
        None => anyhow::bail!("No username given and none remembered"),
    };
    let password = rpassword::prompt_password(format!("Password for {}: ", username))
        .context("Failed to read password")?;

    let session = Session::new(ApiClient::from_config(&config)?);
    let user = session.login(&username, &password).await?;
    info!(username = %username, "Login succeeded");

    config.last_username = Some(username.clone());
    config.save()?;

    match user {
        Some(user) => println!("Logged in as {}", user),
        None => println!("Logged in as {}", username),
    }
    Ok(())
}

/// Renewal cookies live in the HTTP client's jar, which ends with the process
const RENEWAL_NOTE: &str = "Renewal: only within a single chatlink run; once the stored \
access token expires, run `chatlink login` again";

fn status_report(api: &ApiClient) -> String {
    let mut lines = vec![format!("Backend: {}", api.endpoints().base_url())];
    if api.credentials().is_authenticated() {
        lines.push("Access token: present".to_string());
        if let Some(user) = api.credentials().user() {
            lines.push(format!("User: {}", user));
        }
        lines.push(RENEWAL_NOTE.to_string());
    } else {
        lines.push("Access token: none (run `chatlink login`)".to_string());
    }
    lines.join("\n")
}

fn configure(
    mut config: Config,
    base_url: Option<String>,
    storage: Option<StorageBackend>,
) -> Result<()> {
    let changed = base_url.is_some() || storage.is_some();
    if let Some(url) = base_url {
        config.api_base_url = Some(url);
    }
    if let Some(storage) = storage {
        config.storage = storage;
    }
    if changed {
        config.save()?;
        debug!("Configuration saved");
    }

    println!("Config file: {}", Config::config_path()?.display());
    println!(
        "Backend: {}",
        config.base_url().unwrap_or("(not configured)")
    );
    println!("Storage: {}", config.storage_backend());
    println!("Timeout: {}s", config.request_timeout().as_secs());
    Ok(())
}

fn print_response(response: &ApiResponse) -> Result<()> {
    eprintln!("HTTP {}", response.status);
    match response.json::<serde_json::Value>() {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", response.text()),
    }
    if !response.is_success() {
        anyhow::bail!("Request failed with status {}", response.status);
    }
    Ok(())
}
