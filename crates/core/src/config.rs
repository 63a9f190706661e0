use serde::Deserialize;
use std::collections::HashMap;

use crate::types::CategoryId;

/// Root application configuration. Loaded from environment variables
/// with the prefix `AD_PANTRY__` and read once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    /// Exchange category code table: category id to display name.
    #[serde(default = "default_categories")]
    pub categories: HashMap<CategoryId, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_content_types")]
    pub content_types: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    /// Period of the outer refill timer.
    #[serde(default = "default_refill_interval_ms")]
    pub refill_interval_ms: u64,
    /// Backoff after a transport or parse failure.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Backoff after a well-formed response with zero usable creatives.
    #[serde(default = "default_empty_interval_ms")]
    pub empty_interval_ms: u64,
    /// Delay between sweeps while requests are still in flight.
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    /// Upper bound on concurrent refill requests.
    #[serde(default = "default_max_flights")]
    pub max_flights: usize,
    /// A pool is due for refill once outstanding impressions drop below this.
    #[serde(default = "default_low_watermark")]
    pub low_watermark: u32,
    /// Refill requests aim to bring a pool up to this many impressions.
    #[serde(default = "default_high_watermark")]
    pub high_watermark: u32,
    /// Supported creative sizes, one pool per (category, size).
    #[serde(default = "default_sizes")]
    pub sizes: Vec<String>,
}

// Default functions
fn default_node_id() -> String {
    "pantry-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_endpoint() -> String {
    "http://exchange.localdomain/oip.json".to_string()
}
fn default_content_types() -> Vec<String> {
    vec![
        "image/gif".to_string(),
        "image/png".to_string(),
        "image/jpeg".to_string(),
    ]
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_refill_interval_ms() -> u64 {
    2_000
}
fn default_retry_interval_ms() -> u64 {
    60_000
}
fn default_empty_interval_ms() -> u64 {
    60_000
}
fn default_drain_interval_ms() -> u64 {
    500
}
fn default_max_flights() -> usize {
    8
}
fn default_low_watermark() -> u32 {
    3
}
fn default_high_watermark() -> u32 {
    7
}
fn default_sizes() -> Vec<String> {
    vec![
        "728x90".to_string(),
        "320x50".to_string(),
        "300x250".to_string(),
        "160x600".to_string(),
    ]
}

fn default_categories() -> HashMap<CategoryId, String> {
    [
        (1, "Arts & Entertainment"),
        (2, "Automotive"),
        (3, "Business"),
        (4, "Careers"),
        (5, "Education"),
        (6, "Family & Parenting"),
        (7, "Health & Fitness"),
        (8, "Food & Drink"),
        (9, "Hobbies & Interests"),
        (10, "Home & Garden"),
        (12, "News"),
        (13, "Personal Finance"),
        (14, "Society"),
        (15, "Science"),
        (16, "Pets"),
        (17, "Sports"),
        (18, "Style & Fashion"),
        (19, "Technology & Computing"),
        (20, "Travel"),
        (21, "Real Estate"),
        (22, "Shopping"),
    ]
    .into_iter()
    .map(|(id, name)| (id, name.to_string()))
    .collect()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            content_types: default_content_types(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            refill_interval_ms: default_refill_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            empty_interval_ms: default_empty_interval_ms(),
            drain_interval_ms: default_drain_interval_ms(),
            max_flights: default_max_flights(),
            low_watermark: default_low_watermark(),
            high_watermark: default_high_watermark(),
            sizes: default_sizes(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            exchange: ExchangeConfig::default(),
            inventory: InventoryConfig::default(),
            categories: default_categories(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("AD_PANTRY")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
