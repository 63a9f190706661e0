//! REST API handlers for creative replacement and inventory devops endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use pantry_core::types::{AdUnit, CategoryId};
use pantry_inventory::{AdSelector, CategoryStats, StatsReporter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Largest accepted tile dimension, in pixels.
const MAX_DIMENSION: u32 = 4_096;

/// Maximum number of intent tokens considered per request.
const MAX_INTENTS: usize = 64;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub selector: Arc<AdSelector>,
    pub stats: Arc<StatsReporter>,
    pub node_id: String,
    pub start_time: Instant,
}

#[derive(Deserialize)]
pub struct ReplacementQuery {
    pub width: u32,
    pub height: u32,
    /// Comma-separated intent tokens accumulated by the session layer.
    #[serde(default)]
    pub intents: String,
}

#[derive(Serialize)]
pub struct ReplacementResponse {
    pub ad: Option<AdUnit>,
    /// True when the caller should render its default placeholder.
    pub placeholder: bool,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

fn bad_request(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    metrics::counter!("api.validation_errors").increment(1);
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "invalid_request".to_string(),
            message: message.to_string(),
        }),
    )
}

/// GET /v1/replacement — pick a cached creative for the caller's intents.
///
/// Never blocks on refill activity; a miss is a placeholder verdict, not an
/// error.
pub async fn handle_replacement(
    State(state): State<AppState>,
    Query(query): Query<ReplacementQuery>,
) -> Result<Json<ReplacementResponse>, (StatusCode, Json<ErrorResponse>)> {
    if query.width == 0 || query.height == 0 {
        return Err(bad_request("'width' and 'height' must be positive"));
    }
    if query.width > MAX_DIMENSION || query.height > MAX_DIMENSION {
        warn!(width = query.width, height = query.height, "Oversized tile requested");
        return Err(bad_request("tile dimensions exceed the maximum"));
    }

    let intents = parse_intents(&query.intents);

    let ad = state
        .selector
        .ad_unit_for_intents(&intents, query.width, query.height);
    let placeholder = ad.is_none();
    Ok(Json(ReplacementResponse { ad, placeholder }))
}

/// Normalize the comma-separated intent list from the query string.
fn parse_intents(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|token| token.trim().to_lowercase())
        .filter(|token| !token.is_empty())
        .take(MAX_INTENTS)
        .collect()
}

#[derive(Deserialize)]
pub struct CategoriesQuery {
    #[serde(default)]
    pub compress: bool,
}

/// GET /v1/inventory/categories — per-category inventory snapshot.
/// With `compress=true`, sizes without outstanding impressions are omitted.
pub async fn handle_categories(
    State(state): State<AppState>,
    Query(query): Query<CategoriesQuery>,
) -> Json<BTreeMap<CategoryId, CategoryStats>> {
    let mut categories = state.stats.categories();
    if query.compress {
        categories = categories
            .into_iter()
            .filter_map(|(id, mut stats)| {
                stats.sizes.retain(|_, pool| pool.outstanding_impressions > 0);
                if stats.sizes.is_empty() {
                    None
                } else {
                    Some((id, stats))
                }
            })
            .collect();
    }
    Json(categories)
}

/// GET /v1/inventory/categories/{category} — one category's snapshot.
pub async fn handle_category(
    State(state): State<AppState>,
    Path(category): Path<CategoryId>,
) -> Result<Json<CategoryStats>, (StatusCode, Json<ErrorResponse>)> {
    state.stats.category(category).map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "unknown_category".to_string(),
                message: format!("category {category} is not configured"),
            }),
        )
    })
}

/// GET /v1/inventory/statistics — cache-wide statistics.
pub async fn handle_statistics(State(state): State<AppState>) -> Json<pantry_inventory::CacheStats> {
    Json(state.stats.statistics())
}

/// GET /health — Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready — Readiness probe.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.start_time.elapsed().as_secs() > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live — Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}
