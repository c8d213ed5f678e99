//! # Eventing Server
//!
//! Runs mutation-triggered functions against a key-value bucket.
//!
//! ## Overview
//!
//! - **Change handlers**: brewery indexing and credit scoring on every source mutation
//! - **Timers**: deferred audit records, driven by a periodic tick
//! - **HTTP bridge**: beer and travel routes over the same buckets
//! - **Ingest**: JSON-lines change events on `POST /feed/events`, or replayed from a file
//!
//! ## Architecture
//!
//! The server is built on Axum and uses:
//! - In-memory buckets and queues by default
//! - Redis for buckets and queues when a URL is configured

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use eventing_server::{
    infra::{
        app_state::AppState,
        config::{BackendConfig, Config, ConfigLoad, ConfigLoader, ConfigWarnings},
        startup::{ProdStartupHooks, StartupHooks, wire_app_resources},
    },
    routes,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "eventing-server")]
#[command(about = "Mutation-triggered functions over key-value buckets")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// JSON-lines change feed to replay at startup
    #[arg(long)]
    replay: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Load and validate configuration, print the effective values and exit
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(command) = cli.command {
        match command {
            Command::Config(ConfigCommand::Check) => {
                run_config_check(&cli.serve)?;
                return Ok(());
            }
        }
    }

    run_server(cli.serve).await
}

fn load_config(args: &ServeArgs) -> anyhow::Result<(Config, ConfigWarnings)> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = args.config.clone() {
        loader = loader.with_config_path(path);
    }
    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }
    if let Some(replay) = args.replay.clone() {
        config.feed.replay = Some(replay);
    }

    Ok((config, warnings))
}

fn run_config_check(args: &ServeArgs) -> anyhow::Result<()> {
    let (mut config, warnings) = load_config(args)?;

    if let BackendConfig::Redis { url } = &mut config.backend {
        *url = "<redacted>".to_string();
    }
    let rendered =
        toml::to_string_pretty(&config).context("failed to render effective configuration")?;

    match &config.metadata.config_path {
        Some(path) => println!("# loaded from {}", path.display()),
        None => println!("# no configuration file; environment and defaults only"),
    }
    println!("{rendered}");
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => println!("# warning: {} ({hint})", warning.message),
            None => println!("# warning: {}", warning.message),
        }
    }
    Ok(())
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let (config, warnings) = load_config(&args)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,eventing::dispatch=info,tower_http=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = config.metadata.config_path.as_ref() {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    info!(
        backend = %config.backend.kind(),
        source_bucket = %config.buckets.source,
        dispatcher.max_in_flight = config.dispatcher.max_in_flight,
        timers.tick_ms = config.timers.tick_ms,
        query.quoting = ?config.query.quoting,
        "runtime configuration in effect"
    );

    let addr: SocketAddr = config.server.listen_addr().with_context(|| {
        format!(
            "invalid listen host `{}` (expected an IP address or localhost)",
            config.server.host
        )
    })?;

    let state = wire_app_resources(Arc::new(config)).await?;
    ProdStartupHooks
        .run(&state)
        .await
        .context("startup hooks failed")?;

    let app = routes::create_app(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .context("server error")?;

    state.dispatcher.shutdown().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(state: AppState) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c; shutting down");
    }
    info!("Shutdown signal received");
    state.shutdown.cancel();
}
