//! fotad - FOTA Server Daemon
//!
//! Serves firmware updates to vehicles over the length-prefixed JSON protocol.
//!
//! Usage:
//!   fotad [OPTIONS]
//!
//! A catalog file (JSON, YAML or TOML) must be given either in the config
//! file's `[storage]` table or with `--catalog`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fota_server::{Listener, ServerConfig, ServerContext};
use fota_store::{FileCatalog, FsBlobStore, MemoryTelemetryStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fotad")]
#[command(about = "Firmware-over-the-air update server")]
struct Args {
    /// Server config file (TOML)
    #[arg(short, long, env = "FOTAD_CONFIG")]
    config: Option<PathBuf>,

    /// Vehicle catalog file (.json, .yaml or .toml)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Directory firmware locations are resolved against
    #[arg(long)]
    blob_root: Option<PathBuf>,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fotad=info,fota_server=info,fota_store=info".into()),
        )
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::info!("Starting fotad (FOTA Server Daemon)");

    let config = load_config(&args)?;
    let catalog_path = config
        .storage
        .catalog_path
        .clone()
        .context("No catalog configured; set storage.catalog_path or pass --catalog")?;

    tracing::info!("Loading catalog from: {}", catalog_path.display());
    let catalog = FileCatalog::new(&catalog_path)
        .with_context(|| format!("Invalid catalog {}", catalog_path.display()))?;
    tracing::info!(
        "Serving firmware from: {}",
        config.storage.blob_root.display()
    );
    let blobs = FsBlobStore::new(&config.storage.blob_root);

    let ctx = ServerContext::new(
        config,
        Arc::new(catalog),
        Arc::new(blobs),
        Arc::new(MemoryTelemetryStore::new()),
    );

    let listener = Listener::bind(Arc::clone(&ctx))
        .await
        .with_context(|| format!("Failed to bind {}", ctx.config.bind_addr()))?;

    listener
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    tracing::info!("fotad stopped");
    Ok(())
}

/// Config file (or defaults) with command-line overrides applied
fn load_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading config from: {}", path.display());
            ServerConfig::load(path)?
        }
        None => {
            tracing::info!("No config file provided, using defaults");
            ServerConfig::default()
        }
    };

    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(catalog) = &args.catalog {
        config.storage.catalog_path = Some(catalog.clone());
    }
    if let Some(blob_root) = &args.blob_root {
        config.storage.blob_root = blob_root.clone();
    }

    config.validate()?;
    Ok(config)
}
