//! Distributed object storage coordinator daemon.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod crypto;
mod db;
mod error;
mod hash;
mod heartbeat;
mod lifecycle;
mod placement;
mod registry;
mod storage;
mod sync;
mod versioning;

use config::Config;
use crypto::Cipher;
use registry::NodeRegistry;

#[derive(Parser)]
#[command(name = "coordinatord")]
#[command(about = "Distributed object storage coordinator daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator (HTTP API + background maintenance loops)
    Serve,
    /// Run catalog migrations and exit
    Migrate,
    /// Report whether a coordinator is already running
    Status,
}

fn pid_file() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coordinatord.pid")
}

fn is_server_running() -> Option<u32> {
    let pid_path = pid_file();
    if pid_path.exists() {
        if let Ok(pid_str) = fs::read_to_string(&pid_path) {
            if let Ok(pid) = pid_str.trim().parse::<u32>() {
                #[cfg(unix)]
                {
                    let result = std::process::Command::new("kill")
                        .args(["-0", &pid.to_string()])
                        .stdout(std::process::Stdio::null())
                        .stderr(std::process::Stdio::null())
                        .status();
                    if result.map(|s| s.success()).unwrap_or(false) {
                        return Some(pid);
                    }
                }
                #[cfg(not(unix))]
                {
                    return Some(pid);
                }
            }
        }
        let _ = fs::remove_file(&pid_path);
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Status) {
        return show_status();
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coordinator=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve => run_server(config).await?,
        Commands::Migrate => run_migrations(&config).await?,
        Commands::Status => unreachable!(),
    }

    Ok(())
}

fn show_status() -> anyhow::Result<()> {
    if let Some(pid) = is_server_running() {
        println!("coordinatord running (pid {pid})");
    } else {
        println!("coordinatord not running");
    }
    Ok(())
}

async fn run_migrations(config: &Config) -> anyhow::Result<()> {
    println!("running migrations...");
    let pool = db::create_pool(&config.database_path, config.catalog_busy_timeout_secs).await?;
    db::run_migrations(&pool).await?;
    println!("migrations complete");
    Ok(())
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let pid_path = pid_file();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;

    for dir in config.node_dirs.values() {
        fs::create_dir_all(dir)?;
    }

    let pool = db::create_pool(&config.database_path, config.catalog_busy_timeout_secs).await?;
    tracing::info!("checking catalog migrations...");
    db::run_migrations(&pool).await?;

    let cipher = Arc::new(Cipher::load_or_init(
        &config.key_file,
        &config.salt_file,
        &config.encryption_passphrase,
    )?);
    let registry = Arc::new(NodeRegistry::new(config.node_dirs.clone()));

    let cancel = CancellationToken::new();

    let monitor_handle = tokio::spawn(heartbeat::monitor_loop(
        pool.clone(),
        registry.clone(),
        config.node_capacity_bytes,
        config.catalog_max_retries,
        config.heartbeat_threshold_secs,
        config.monitor_period_secs,
        cancel.clone(),
    ));

    let tier_handle = tokio::spawn(lifecycle::tier::migration_loop(
        pool.clone(),
        registry.clone(),
        cipher.clone(),
        config.catalog_max_retries,
        config.tier_migration_period_secs,
        config.tier_migration_backoff_secs,
        cancel.clone(),
    ));

    let retention_handle = tokio::spawn(lifecycle::retention::retention_loop(
        pool.clone(),
        config.catalog_max_retries,
        config.tier_migration_period_secs,
        cancel.clone(),
    ));

    let dedup_handle = tokio::spawn(lifecycle::dedup::dedup_loop(
        pool.clone(),
        config.tier_migration_period_secs,
        cancel.clone(),
    ));

    let state = api::AppState::new(pool, registry, cipher, config.clone());
    let addr = config.bind_addr.parse()?;
    let serve_result = api::rest::serve(addr, state, cancel.clone()).await;

    cancel.cancel();
    let _ = tokio::join!(monitor_handle, tier_handle, retention_handle, dedup_handle);

    let _ = fs::remove_file(pid_file());
    serve_result
}
