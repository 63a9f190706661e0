//! AdPantry — low-latency ad creative cache and selection service.
//!
//! Main entry point that wires the inventory cache, refill scheduler, and
//! HTTP surface together and starts serving.

use clap::Parser;
use pantry_api::ApiServer;
use pantry_core::config::AppConfig;
use pantry_exchange::HttpExchangeClient;
use pantry_inventory::{AdSelector, InventoryCache, RefillScheduler, StatsReporter};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ad-pantry")]
#[command(about = "Low-latency ad creative cache and selection service")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "AD_PANTRY__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "AD_PANTRY__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Exchange endpoint URL (overrides config)
    #[arg(long, env = "AD_PANTRY__EXCHANGE__ENDPOINT")]
    exchange_endpoint: Option<String>,

    /// Serve from whatever is cached without background refill
    #[arg(long, default_value_t = false)]
    no_refill: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ad_pantry=info,pantry_inventory=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("AdPantry starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(endpoint) = cli.exchange_endpoint {
        config.exchange.endpoint = endpoint;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        exchange = %config.exchange.endpoint,
        categories = config.categories.len(),
        sizes = config.inventory.sizes.len(),
        "Configuration loaded"
    );

    // Build the inventory cache and its collaborators
    let cache = Arc::new(InventoryCache::new(&config.inventory, &config.categories));
    let client = Arc::new(HttpExchangeClient::new(&config.exchange)?);
    let scheduler = RefillScheduler::new(
        cache.clone(),
        client,
        &config.inventory,
        &config.exchange,
    );

    let mut selector = AdSelector::new(cache.clone());
    if cli.no_refill {
        info!("Background refill disabled (--no-refill)");
    } else {
        selector = selector.with_kick(scheduler.kick_handle());
        // First interval tick fires immediately, pre-filling the cache.
        let _refill_loop = scheduler.spawn();
    }
    let selector = Arc::new(selector);
    let stats = Arc::new(StatsReporter::new(cache));

    // Start API server
    let api_server = ApiServer::new(config, selector, stats);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("AdPantry is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
