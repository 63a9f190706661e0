//! API server — HTTP surface plus the Prometheus metrics listener.

use crate::rest::{self, AppState};
use axum::routing::get;
use axum::Router;
use pantry_core::config::AppConfig;
use pantry_inventory::{AdSelector, StatsReporter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct ApiServer {
    config: AppConfig,
    selector: Arc<AdSelector>,
    stats: Arc<StatsReporter>,
}

impl ApiServer {
    pub fn new(config: AppConfig, selector: Arc<AdSelector>, stats: Arc<StatsReporter>) -> Self {
        Self {
            config,
            selector,
            stats,
        }
    }

    /// Start the HTTP REST server (blocks until shutdown).
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState {
            selector: self.selector.clone(),
            stats: self.stats.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };

        let app = Router::new()
            // Creative replacement endpoint
            .route("/v1/replacement", get(rest::handle_replacement))
            // Inventory devops endpoints
            .route("/v1/inventory/categories", get(rest::handle_categories))
            .route(
                "/v1/inventory/categories/:category",
                get(rest::handle_category),
            )
            .route("/v1/inventory/statistics", get(rest::handle_statistics))
            // Operational endpoints
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            // Middleware
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install_recorder()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");

        // Keep the handle alive
        std::mem::forget(handle);
        Ok(())
    }
}
