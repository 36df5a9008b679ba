// Lectern server entry point: environment loading, CLI commands, and
// shutdown wiring. Protocol and handler logic live in the library modules.

pub use lectern_server::*;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::{Error as DotenvError, dotenv, from_filename};
use lectern_core::{AppConfig, Database};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Lectern classroom server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the websocket server
    Serve,
    /// Validate configuration and store connectivity, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_status = load_env_file();
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    let _log_guard = observability::init_observability(&config)?;
    report_env_status(&env_status);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_serve(config).await,
        Command::CheckConfig => run_check_config(config).await,
    }
}

async fn run_serve(config: AppConfig) -> anyhow::Result<()> {
    info!(
        store_backend = ?config.store_backend,
        database_path = %config.database_path,
        room_code_length = config.room_code_length,
        heartbeat_interval_secs = config.heartbeat_interval_secs,
        heartbeat_timeout_secs = config.heartbeat_timeout_secs,
        "starting server"
    );

    let database = Database::connect(&config).await?;
    let state = build_state(&database, &config);
    let app = http::build_router(state);

    let listener = TcpListener::bind(config.bind_address)
        .await
        .context("failed to bind socket")?;
    let actual_addr = listener
        .local_addr()
        .context("failed to read local address")?;

    info!("listening on {actual_addr}");

    if let Err(error) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(?error, "server terminated with error");
    }

    Ok(())
}

async fn run_check_config(config: AppConfig) -> anyhow::Result<()> {
    let database = Database::connect(&config).await?;

    println!("configuration ok");
    println!("  bind_address       = {}", config.bind_address);
    println!("  store_backend      = {:?}", config.store_backend);
    if let Some(path) = database.database_path() {
        println!("  database_path      = {}", path.display());
    }
    println!("  room_code_length   = {}", config.room_code_length);
    println!(
        "  heartbeat          = every {}s, timeout {}s",
        config.heartbeat_interval_secs, config.heartbeat_timeout_secs
    );

    Ok(())
}

enum EnvLoadStatus {
    Loaded(PathBuf),
    NotFound,
    Failed(DotenvError),
}

fn load_env_file() -> EnvLoadStatus {
    if let Ok(env_file) = std::env::var("LECTERN_ENV_FILE") {
        let trimmed = env_file.trim();
        if !trimmed.is_empty() {
            let path = PathBuf::from(trimmed);
            return match from_filename(&path) {
                Ok(_) => {
                    let display_path = make_relative(&path).unwrap_or_else(|| path.clone());
                    EnvLoadStatus::Loaded(display_path)
                }
                Err(err) => EnvLoadStatus::Failed(err),
            };
        }
    }

    match dotenv() {
        Ok(path) => {
            let display_path = make_relative(&path).unwrap_or_else(|| path.clone());
            EnvLoadStatus::Loaded(display_path)
        }
        Err(DotenvError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            EnvLoadStatus::NotFound
        }
        Err(err) => EnvLoadStatus::Failed(err),
    }
}

fn report_env_status(status: &EnvLoadStatus) {
    match status {
        EnvLoadStatus::Loaded(path) => {
            info!("loaded environment variables from {}", path.display());
        }
        EnvLoadStatus::NotFound => {
            info!("no .env file found; using process environment only");
        }
        EnvLoadStatus::Failed(err) => {
            warn!("failed to load .env file: {err:?}");
        }
    }
}

fn make_relative(path: &Path) -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    path.strip_prefix(&cwd).map(|p| p.to_path_buf()).ok()
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = term.recv() => {},
            _ = int.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
