//! timetrack - command-line client for the timetrack API.
//!
//! Logs in against the configured server, keeps the session between runs,
//! and sends authenticated requests through the shared gateway.

use std::io::{self, Write};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use timetrack_core::api::Method;
use timetrack_core::guard::{self, Access, GuardDecision};
use timetrack_core::utils::format_epoch;
use timetrack_core::{
    Config, Gateway, LoginRequest, RegisterRequest, RequestDescriptor, RequestError,
    SessionPersistence, SessionStore,
};

#[derive(Parser)]
#[command(name = "timetrack", version, about = "Time-tracking API client")]
struct Cli {
    /// API base URL (overrides the config file)
    #[arg(long, env = "TIMETRACK_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Keep the session in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Create an account and log in as it
    Register {
        #[arg(long)]
        pseudo: String,
        #[arg(long)]
        email: String,
    },
    /// Forget the stored session
    Logout,
    /// Show who is logged in and whether the token has expired
    Status,
    /// Exchange the stored token for a fresh one
    Refresh,
    /// GET one or more paths concurrently
    Get {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Send a request with an optional JSON body
    Send {
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        path: String,
        /// JSON payload
        #[arg(long)]
        data: Option<String>,
        /// Extra header as NAME:VALUE, repeatable
        #[arg(long = "header")]
        headers: Vec<String>,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing();

    let mut config = Config::load()?;
    if let Some(ref base_url) = cli.base_url {
        config.base_url = base_url.clone();
    }

    let persistence = if cli.ephemeral {
        SessionPersistence::in_memory()
    } else {
        config.persistence()?
    };
    let store = config.session_store(persistence)?;
    store.restore();
    info!(base_url = %config.base_url, "timetrack starting");

    match cli.command {
        Command::Login { email } => login(&store, &mut config, email).await,
        Command::Register { pseudo, email } => register(&store, &mut config, pseudo, email).await,
        Command::Logout => {
            store.logout();
            println!("Logged out");
            Ok(())
        }
        Command::Status => {
            status(&store);
            Ok(())
        }
        Command::Refresh => {
            store.refresh().await.context("Token refresh failed")?;
            println!("Token refreshed");
            Ok(())
        }
        Command::Get { paths } => get_all(&store, paths).await,
        Command::Send {
            method,
            path,
            data,
            headers,
        } => send(&store, &method, path, data, headers).await,
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn login(store: &SessionStore, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email")?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    let session = store
        .login(&LoginRequest {
            email: email.clone(),
            password,
        })
        .await?;

    config.last_email = Some(email);
    config.save()?;

    let name = session.user.map(|u| u.display_name()).unwrap_or_default();
    println!("Logged in as {}", name);
    Ok(())
}

async fn register(
    store: &SessionStore,
    config: &mut Config,
    pseudo: String,
    email: String,
) -> Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }

    store
        .register(&RegisterRequest {
            pseudo: pseudo.clone(),
            email: email.clone(),
            password,
        })
        .await?;

    config.last_email = Some(email);
    config.save()?;
    println!("Registered and logged in as {}", pseudo);
    Ok(())
}

fn status(store: &SessionStore) {
    let session = store.session();
    match session.user {
        Some(user) if session.is_authenticated => {
            println!("Logged in as {}", user.display_name());
            if let Some(role) = store.role() {
                println!("Role: {}", role);
            }
            match store.claims().and_then(|c| c.exp) {
                Some(exp) if store.is_expired() => println!("Token expired at {}", format_epoch(exp)),
                Some(exp) => println!("Token valid until {}", format_epoch(exp)),
                None if store.is_expired() => println!("Token is unreadable"),
                None => println!("Token has no expiry"),
            }
        }
        _ => println!("Not logged in"),
    }
}

/// Check the session before a protected command, refreshing if needed
async fn require_session(store: &SessionStore, target: &str) -> Result<()> {
    match guard::check(store, target, &Access::Authenticated).await {
        GuardDecision::Proceed => Ok(()),
        GuardDecision::Login { expired: true, .. } => {
            bail!("Session expired, run `timetrack login` again")
        }
        GuardDecision::Login { .. } => bail!("Not logged in, run `timetrack login` first"),
        GuardDecision::AccessDenied => bail!("Access denied"),
    }
}

async fn get_all(store: &SessionStore, paths: Vec<String>) -> Result<()> {
    require_session(store, &paths[0]).await?;

    let gateway = Gateway::new(store.clone());
    let descriptors: Vec<RequestDescriptor> =
        paths.iter().map(|p| RequestDescriptor::get(p.as_str())).collect();
    let requests = descriptors.iter().map(|d| gateway.send(d));
    let results = futures::future::join_all(requests).await;

    let mut failed = false;
    for (path, result) in paths.iter().zip(results) {
        match result {
            Ok(value) => {
                println!("{}", path);
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            Err(e) => {
                failed = true;
                report(path, &e);
            }
        }
    }

    if failed {
        bail!("Some requests failed");
    }
    Ok(())
}

async fn send(
    store: &SessionStore,
    method: &str,
    path: String,
    data: Option<String>,
    headers: Vec<String>,
) -> Result<()> {
    require_session(store, &path).await?;

    let method = method
        .to_uppercase()
        .parse::<Method>()
        .with_context(|| format!("Invalid HTTP method: {}", method))?;
    let mut descriptor = RequestDescriptor::new(path.as_str()).method(method);

    for raw in headers {
        let (name, value) = raw
            .split_once(':')
            .with_context(|| format!("Header must be NAME:VALUE, got {}", raw))?;
        descriptor = descriptor.try_header(name.trim(), value.trim())?;
    }

    if let Some(data) = data {
        let body: serde_json::Value =
            serde_json::from_str(&data).context("--data must be valid JSON")?;
        descriptor = descriptor.json(&body)?;
    }

    let gateway = Gateway::new(store.clone());
    match gateway.send(&descriptor).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            report(&path, &e);
            bail!("Request failed");
        }
    }
}

fn report(path: &str, error: &RequestError) {
    eprintln!("{}: {}", path, error);
    if let Some(location) = error.login_location() {
        eprintln!("Run `timetrack login` to sign in again ({})", location);
    }
}
