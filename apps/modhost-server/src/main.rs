#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod modules;
mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use modhost::{HostConfig, ModuleRegistry};
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// modhost-server - in-process module host
#[derive(Parser)]
#[command(name = "modhost-server")]
#[command(about = "modhost-server - in-process module host with health and metrics endpoints")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address override for the HTTP server (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Print effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log every heartbeat
    #[arg(long)]
    log_beats: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and module graph, then exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) env (MODHOST__*) -> 4) CLI overrides
    let mut config = HostConfig::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.server.bind_addr = bind;
    }

    if cli.print_config {
        println!("{}", config.to_pretty_json()?);
        return Ok(());
    }

    modhost::telemetry::init_logging(&config.logging, cli.verbose)?;

    let config = Arc::new(config);
    let modules_token = CancellationToken::new();
    let registry = ModuleRegistry::from_config(Arc::clone(&config), modules_token.clone());
    modules::register_all(&registry, cli.log_beats)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Check => check(&registry),
        Commands::Run => run_server(&config, &registry, modules_token).await,
    }
}

fn check(registry: &ModuleRegistry) -> Result<()> {
    tracing::info!("Checking configuration...");
    let order = registry.load_order()?;
    println!("Configuration is valid");
    println!("Load order: {}", order.join(" -> "));
    Ok(())
}

async fn run_server(
    config: &HostConfig,
    registry: &ModuleRegistry,
    modules_token: CancellationToken,
) -> Result<()> {
    tracing::info!(instance_id = %registry.instance_id(), "modhost-server starting");

    if let Err(err) = registry.start().await {
        tracing::error!(error = %err, "Startup failed, tearing down started modules");
        registry.stop().await;
        modules_token.cancel();
        return Err(err.into());
    }

    let listener = match tokio::net::TcpListener::bind(&config.server.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            registry.stop().await;
            modules_token.cancel();
            return Err(err).with_context(|| format!("failed to bind {}", config.server.bind_addr));
        }
    };
    tracing::info!(addr = %config.server.bind_addr, "HTTP server listening");

    let shutdown_token = CancellationToken::new();
    shutdown::spawn_signal_watcher(shutdown_token.clone());

    let served = axum::serve(listener, registry.router())
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await;

    registry.stop().await;
    modules_token.cancel();
    tracing::info!("modhost-server stopped");

    served.context("HTTP server failed")
}
