//! ContaSimples CLI - sign in to the ContaSimples backend from a terminal.
//!
//! The session is kept in the configured credential store, so later
//! invocations start signed in and every API call carries the bearer token.

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use contasimples_core::models::NewUser;
use contasimples_core::{open_store, ApiClient, Config, SessionController};

/// Email used by `login` when no flag is given
const ENV_EMAIL: &str = "CONTASIMPLES_EMAIL";

/// Password used by `login` and `register` instead of prompting
const ENV_PASSWORD: &str = "CONTASIMPLES_PASSWORD";

#[derive(Parser)]
#[command(name = "contasimples", version, about = "Sign in to ContaSimples and call its API")]
struct Cli {
    /// Backend base URL (overrides config and CONTASIMPLES_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Credential storage: file, keyring or memory
    #[arg(long, global = true)]
    storage: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and remember the session
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Change the stored name or email of the signed-in user
    UpdateProfile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Create an account
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// GET a path with the session's credentials and print the JSON
    Get { path: String },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };
    config.apply_env()?;
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    if let Some(storage) = cli.storage {
        config.storage = storage.parse()?;
    }
    debug!(api_url = %config.api_url, storage = %config.storage, "Config loaded");

    let api = ApiClient::new(&config.api_url)?;
    let store = open_store(&config)?;
    let session = SessionController::new(store, &api);

    match cli.command {
        Command::Login { email } => login(&session, &config, email).await,
        Command::Logout => {
            session.sign_out()?;
            println!("Signed out");
            Ok(())
        }
        Command::Whoami => {
            match session.user() {
                Some(user) => println!("{} (id {})", user.display(), user.id),
                None => println!("Not signed in"),
            }
            Ok(())
        }
        Command::UpdateProfile { name, email } => update_profile(&session, name, email),
        Command::Register { name, email } => register(&api, name, email).await,
        Command::Get { path } => {
            let body: serde_json::Value = session
                .api()
                .get(&path)
                .await
                .with_context(|| format!("GET {} failed", path))?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
    }
}

async fn login(session: &SessionController, config: &Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| std::env::var(ENV_EMAIL).ok()) {
        Some(email) if !email.trim().is_empty() => email.trim().to_string(),
        _ => prompt_email(config.last_email.as_deref())?,
    };
    let password = read_password()?;

    match session.sign_in(&email, &password).await {
        Ok(user) => {
            if let Err(e) = remember_email(&email) {
                warn!(error = %e, "Failed to save config");
            }
            info!("Login successful");
            println!("Signed in as {}", user.display());
            Ok(())
        }
        Err(e) if e.is_invalid_credentials() => Err(anyhow::anyhow!("Invalid email or password")),
        Err(e) => Err(e).context("Sign-in failed"),
    }
}

fn update_profile(
    session: &SessionController,
    name: Option<String>,
    email: Option<String>,
) -> Result<()> {
    if name.is_none() && email.is_none() {
        return Err(anyhow::anyhow!("Nothing to update: pass --name and/or --email"));
    }
    let current = session
        .user()
        .ok_or_else(|| anyhow::anyhow!("Not signed in. Run `contasimples login` first."))?;

    let updated = current.with_changes(name, email);
    session.update_user(updated.clone())?;

    println!("Profile updated: {}", updated.display());
    Ok(())
}

async fn register(api: &ApiClient, name: String, email: String) -> Result<()> {
    let password = read_password()?;
    let user = api
        .register_user(&NewUser {
            name,
            email,
            password,
        })
        .await
        .context("Registration failed")?;

    println!("Account created for {}. Run `contasimples login` to sign in.", user.display());
    Ok(())
}

/// Store the email for next time without persisting CLI/env overrides
fn remember_email(email: &str) -> Result<()> {
    let mut config = Config::load().unwrap_or_default();
    config.last_email = Some(email.to_string());
    config.save()
}

fn prompt_email(last: Option<&str>) -> Result<String> {
    match last {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    match (input.is_empty(), last) {
        (true, Some(last)) => Ok(last.to_string()),
        (true, None) => Err(anyhow::anyhow!("Email required")),
        (false, _) => Ok(input.to_string()),
    }
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(ENV_PASSWORD) {
        if !password.is_empty() {
            return Ok(password);
        }
    }
    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        return Err(anyhow::anyhow!("Password required"));
    }
    Ok(password)
}
