//! Background refill scheduling for the inventory cache.
//!
//! An outer timer (and fire-and-forget kicks from the request path) invoke
//! `refill()`, which runs sweep passes over every category until all issued
//! requests have resolved. One combined request is built per category per
//! sweep; the global in-flight counter bounds concurrency. A category's
//! transport or parse failure is translated into backoff state and never
//! escapes the refill loop.

use crate::keywords;
use crate::pool::{CategoryPool, InventoryCache};
use chrono::{DateTime, Utc};
use pantry_core::config::{ExchangeConfig, InventoryConfig};
use pantry_core::types::{CategoryId, Creative};
use pantry_exchange::{fcap, ExchangeClient, OipRequest, OipResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Non-blocking nudge for the scheduler, handed to the request path.
///
/// Sends are dropped when a kick is already pending; serving a creative must
/// never wait on refill machinery.
#[derive(Clone)]
pub struct RefillKick {
    tx: mpsc::Sender<()>,
}

impl RefillKick {
    pub fn kick(&self) {
        let _ = self.tx.try_send(());
    }
}

struct SweepOptions {
    refill_interval: Duration,
    drain_interval: Duration,
    retry_interval: chrono::Duration,
    empty_interval: chrono::Duration,
    content_types: Vec<String>,
}

struct SweepContext {
    cache: Arc<InventoryCache>,
    client: Arc<dyn ExchangeClient>,
    options: SweepOptions,
}

pub struct RefillScheduler {
    ctx: Arc<SweepContext>,
    kick_tx: mpsc::Sender<()>,
    kick_rx: mpsc::Receiver<()>,
}

impl RefillScheduler {
    pub fn new(
        cache: Arc<InventoryCache>,
        client: Arc<dyn ExchangeClient>,
        inventory: &InventoryConfig,
        exchange: &ExchangeConfig,
    ) -> Self {
        let (kick_tx, kick_rx) = mpsc::channel(1);
        let options = SweepOptions {
            refill_interval: Duration::from_millis(inventory.refill_interval_ms),
            drain_interval: Duration::from_millis(inventory.drain_interval_ms),
            retry_interval: chrono::Duration::milliseconds(inventory.retry_interval_ms as i64),
            empty_interval: chrono::Duration::milliseconds(inventory.empty_interval_ms as i64),
            content_types: exchange.content_types.clone(),
        };
        Self {
            ctx: Arc::new(SweepContext {
                cache,
                client,
                options,
            }),
            kick_tx,
            kick_rx,
        }
    }

    pub fn kick_handle(&self) -> RefillKick {
        RefillKick {
            tx: self.kick_tx.clone(),
        }
    }

    /// Run one full refill cycle: sweep, then keep sweeping on the drain
    /// interval until every issued request has resolved. A no-op when a
    /// cycle is already draining.
    pub async fn refill(&self) {
        self.ctx.clone().refill().await;
    }

    /// Spawn the periodic refill loop as a Tokio task.
    pub fn spawn(self) -> JoinHandle<()> {
        let Self {
            ctx,
            kick_tx,
            kick_rx: mut kicks,
        } = self;

        tokio::spawn(async move {
            // Held so the kick channel outlives external handles.
            let _kick_tx = kick_tx;

            info!(
                interval_ms = ctx.options.refill_interval.as_millis() as u64,
                max_flights = ctx.cache.max_flights(),
                "Refill scheduler started"
            );

            let mut ticker = tokio::time::interval(ctx.options.refill_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    Some(()) = kicks.recv() => {}
                }
                ctx.clone().refill().await;
            }
        })
    }
}

impl SweepContext {
    async fn refill(self: Arc<Self>) {
        if self.cache.in_flight_refills() != 0 {
            return;
        }
        self.clone().reload().await;
        // Keep pressing until all outstanding requests resolve.
        while self.cache.in_flight_refills() > 0 {
            tokio::time::sleep(self.options.drain_interval).await;
            self.clone().reload().await;
        }
    }

    /// One sweep pass: collect due pools per category and issue one combined
    /// request for each, subject to the global flight bound.
    async fn reload(self: Arc<Self>) {
        let now = Utc::now();

        for category in self.cache.categories() {
            let mut due: Vec<(String, u32)> = Vec::new();
            for (size, pool) in category.size_pools() {
                let mut pool = pool.lock();
                pool.trim(now);
                if pool.needs_refill(now) {
                    due.push((size.to_string(), pool.requested_quantity()));
                }
            }
            if due.is_empty() {
                continue;
            }

            if !self.cache.try_begin_flight() {
                // Deferred pools stay due and are picked up by a later pass.
                debug!(
                    category = category.id(),
                    "Max refill flights in progress, deferring"
                );
                metrics::counter!("inventory.refill.deferred").increment(1);
                continue;
            }

            let mut request = OipRequest::new(category.id(), &self.options.content_types);
            let throttle_until = now + self.options.retry_interval;
            for (size, quantity) in &due {
                if let Some(pool) = category.size_pool(size) {
                    pool.lock().defer_retry(throttle_until);
                }
                request.push_size(size, *quantity);
            }

            let ctx = Arc::clone(&self);
            let category_id = category.id();
            let sizes: Vec<String> = due.into_iter().map(|(size, _)| size).collect();
            tokio::spawn(async move {
                ctx.execute_refill(category_id, sizes, request).await;
                ctx.cache.end_flight();
            });
        }
    }

    async fn execute_refill(&self, category_id: CategoryId, sizes: Vec<String>, request: OipRequest) {
        debug!(category = category_id, sizes = ?sizes, "Issuing refill request");
        metrics::counter!("inventory.refill.requests").increment(1);

        let outcome = self.client.fetch(&request).await;
        let now = Utc::now();
        let Some(category) = self.cache.category(category_id) else {
            return;
        };

        match outcome {
            Ok(response) => self.apply_response(category, &sizes, response, now),
            Err(e) => {
                warn!(category = category_id, error = %e, "Refill request failed");
                metrics::counter!("inventory.refill.errors").increment(1);
                category.record_error();
                let retry_at = now + self.options.retry_interval;
                for size in &sizes {
                    if let Some(pool) = category.size_pool(size) {
                        pool.lock().mark_error(retry_at);
                    }
                }
            }
        }
    }

    /// Enqueue a successful response's creatives; tile batches are
    /// positionally aligned with the sizes we requested.
    fn apply_response(
        &self,
        category: &CategoryPool,
        sizes: &[String],
        response: OipResponse,
        now: DateTime<Utc>,
    ) {
        let descriptor = response.elements.fcap.first();
        let expires_at =
            now + fcap::normalized_duration(descriptor.and_then(|f| f.time_frame.as_deref()));
        let impressions =
            fcap::normalized_limit(descriptor.and_then(|f| f.impression_limit.as_ref()));

        let mut merged = 0;
        for cap in &response.elements.fcap {
            if let Some(data) = &cap.intent_data {
                merged += category.merge_tokens(keywords::tokenize(data));
            }
        }
        if merged > 0 {
            debug!(
                category = category.id(),
                tokens = merged,
                "Merged intent vocabulary"
            );
        }

        let mut batches = response.elements.tiles.into_iter();
        for size in sizes {
            let batch = batches.next().unwrap_or_default();
            let Some(pool) = category.size_pool(size) else {
                continue;
            };
            let mut pool = pool.lock();
            let mut enqueued: u32 = 0;
            for ad in batch {
                let Some(url) = ad.url.filter(|u| !u.is_empty()) else {
                    continue;
                };
                pool.enqueue(Creative {
                    landing_page: ad.lp.unwrap_or_default(),
                    image_url: url,
                    expires_at,
                    impressions_remaining: impressions,
                });
                enqueued += 1;
            }

            if enqueued == 0 {
                // An empty batch is not a healthy pool even though the
                // request succeeded.
                pool.mark_empty(now + self.options.empty_interval);
                metrics::counter!("inventory.refill.empty").increment(1);
                debug!(category = category.id(), size = %size, "Empty refill batch");
            } else {
                pool.mark_fresh();
                metrics::counter!("inventory.refill.creatives").increment(enqueued as u64);
                debug!(
                    category = category.id(),
                    size = %size,
                    enqueued,
                    outstanding = pool.outstanding_impressions(),
                    "Refill batch enqueued"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pantry_core::PantryError;
    use pantry_core::PantryResult;
    use pantry_exchange::wire::{RawAd, ResponseElements};
    use pantry_exchange::FrequencyCap;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    type Responder = Box<dyn Fn(&OipRequest) -> PantryResult<OipResponse> + Send + Sync>;

    struct StubExchange {
        requests: parking_lot::Mutex<Vec<OipRequest>>,
        respond: Responder,
    }

    impl StubExchange {
        fn new(respond: Responder) -> Arc<Self> {
            Arc::new(Self {
                requests: parking_lot::Mutex::new(Vec::new()),
                respond,
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl ExchangeClient for StubExchange {
        async fn fetch(&self, request: &OipRequest) -> PantryResult<OipResponse> {
            self.requests.lock().push(request.clone());
            (self.respond)(request)
        }
    }

    /// One ad per requested slot, plus a frequency-cap descriptor.
    fn filled_response(request: &OipRequest, fcap: Vec<FrequencyCap>) -> OipResponse {
        let tiles = request
            .elements
            .tiles
            .iter()
            .enumerate()
            .map(|(batch, slots)| {
                slots
                    .iter()
                    .enumerate()
                    .map(|(slot, _)| RawAd {
                        url: Some(format!("https://cdn.example.com/{batch}/{slot}.png")),
                        lp: Some("https://example.com/lp".to_string()),
                    })
                    .collect()
            })
            .collect();
        OipResponse {
            elements: ResponseElements { tiles, fcap },
        }
    }

    fn test_config() -> InventoryConfig {
        InventoryConfig {
            drain_interval_ms: 10,
            ..InventoryConfig::default()
        }
    }

    fn make_cache(config: &InventoryConfig, categories: &[(CategoryId, &str)]) -> Arc<InventoryCache> {
        let map: HashMap<CategoryId, String> = categories
            .iter()
            .map(|(id, name)| (*id, name.to_string()))
            .collect();
        Arc::new(InventoryCache::new(config, &map))
    }

    fn make_scheduler(
        cache: Arc<InventoryCache>,
        client: Arc<dyn ExchangeClient>,
        config: &InventoryConfig,
    ) -> RefillScheduler {
        RefillScheduler::new(cache, client, config, &ExchangeConfig::default())
    }

    #[tokio::test]
    async fn test_refill_populates_due_pools() {
        let config = test_config();
        let cache = make_cache(&config, &[(2, "Automotive")]);
        let client = StubExchange::new(Box::new(|request| {
            Ok(filled_response(
                request,
                vec![FrequencyCap {
                    time_frame: Some("1 hour".to_string()),
                    impression_limit: Some(serde_json::json!(2)),
                    ..FrequencyCap::default()
                }],
            ))
        }));

        let scheduler = make_scheduler(cache.clone(), client.clone(), &config);
        scheduler.refill().await;

        assert_eq!(client.request_count(), 1);
        assert_eq!(cache.in_flight_refills(), 0);

        let category = cache.category(2).expect("configured category");
        for (_, pool) in category.size_pools() {
            let pool = pool.lock();
            // 7 slots requested, each creative carries 2 impressions.
            assert_eq!(pool.queue_depth(), 7);
            assert_eq!(pool.outstanding_impressions(), 14);
            assert_eq!(pool.consecutive_empty_refills(), 0);
        }
    }

    #[tokio::test]
    async fn test_request_covers_all_due_sizes_for_a_category() {
        let config = test_config();
        let cache = make_cache(&config, &[(20, "Travel")]);
        let client = StubExchange::new(Box::new(|request| Ok(filled_response(request, Vec::new()))));

        let scheduler = make_scheduler(cache.clone(), client.clone(), &config);
        scheduler.refill().await;

        let requests = client.requests.lock();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.cat.get("20").map(String::as_str), Some(""));
        assert_eq!(request.elements.tiles.len(), config.sizes.len());
        for slots in &request.elements.tiles {
            assert_eq!(slots.len(), config.high_watermark as usize);
        }
    }

    #[tokio::test]
    async fn test_empty_response_advances_backoff() {
        let config = test_config();
        let cache = make_cache(&config, &[(17, "Sports")]);
        let client = StubExchange::new(Box::new(|_| Ok(OipResponse::default())));

        let scheduler = make_scheduler(cache.clone(), client.clone(), &config);
        let before = Utc::now();
        scheduler.refill().await;

        let category = cache.category(17).expect("configured category");
        for (_, pool) in category.size_pools() {
            let pool = pool.lock();
            assert_eq!(pool.queue_depth(), 0);
            assert_eq!(pool.consecutive_empty_refills(), 1);
            let empty_backoff = chrono::Duration::milliseconds(config.empty_interval_ms as i64);
            assert!(pool.retry_at() >= before + empty_backoff);
        }
        assert_eq!(cache.total_errors(), 0);

        // The next sweep must skip the throttled pools entirely.
        scheduler.refill().await;
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_isolated_and_counted() {
        let config = test_config();
        let cache = make_cache(&config, &[(2, "Automotive")]);
        let client = StubExchange::new(Box::new(|_| {
            Err(PantryError::Transport("connection refused".to_string()))
        }));

        let scheduler = make_scheduler(cache.clone(), client.clone(), &config);
        let before = Utc::now();
        scheduler.refill().await;

        let category = cache.category(2).expect("configured category");
        assert_eq!(category.error_count(), 1);
        assert_eq!(cache.total_errors(), 1);
        assert_eq!(cache.in_flight_refills(), 0);
        for (_, pool) in category.size_pools() {
            let pool = pool.lock();
            let retry_backoff = chrono::Duration::milliseconds(config.retry_interval_ms as i64);
            assert!(pool.retry_at() >= before + retry_backoff);
        }
    }

    #[tokio::test]
    async fn test_vocabulary_merges_from_response_descriptor() {
        let config = test_config();
        let cache = make_cache(&config, &[(2, "Automotive")]);
        let client = StubExchange::new(Box::new(|request| {
            Ok(filled_response(
                request,
                vec![FrequencyCap {
                    intent_data: Some("BMW roadster".to_string()),
                    ..FrequencyCap::default()
                }],
            ))
        }));

        let scheduler = make_scheduler(cache.clone(), client.clone(), &config);
        scheduler.refill().await;

        let category = cache.category(2).expect("configured category");
        assert_eq!(category.intersection_score(&["bmw".to_string()]), 1);
        assert_eq!(category.intersection_score(&["roadster".to_string()]), 1);
    }

    struct GatedExchange {
        started: AtomicUsize,
        gate: tokio::sync::Semaphore,
    }

    #[async_trait]
    impl ExchangeClient for GatedExchange {
        async fn fetch(&self, request: &OipRequest) -> PantryResult<OipResponse> {
            self.started.fetch_add(1, AtomicOrdering::SeqCst);
            let permit = self.gate.acquire().await.expect("gate closed");
            permit.forget();
            Ok(filled_response(request, Vec::new()))
        }
    }

    #[tokio::test]
    async fn test_max_flights_bounds_a_sweep() {
        let config = InventoryConfig {
            max_flights: 1,
            drain_interval_ms: 10,
            ..InventoryConfig::default()
        };
        let cache = make_cache(&config, &[(2, "Automotive"), (20, "Travel")]);
        let client = Arc::new(GatedExchange {
            started: AtomicUsize::new(0),
            gate: tokio::sync::Semaphore::new(0),
        });

        let scheduler = make_scheduler(cache.clone(), client.clone(), &config);
        let cycle = tokio::spawn(async move { scheduler.refill().await });

        // Both categories are due, but only one request may be in flight.
        while client.started.load(AtomicOrdering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(client.started.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(cache.in_flight_refills(), 1);

        // Releasing the gate lets the drain passes issue the deferred one.
        client.gate.add_permits(2);
        cycle.await.expect("refill cycle");
        assert_eq!(client.started.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(cache.in_flight_refills(), 0);
    }

    #[tokio::test]
    async fn test_kick_handle_never_blocks() {
        let config = test_config();
        let cache = make_cache(&config, &[(2, "Automotive")]);
        let client = StubExchange::new(Box::new(|_| Ok(OipResponse::default())));
        let scheduler = make_scheduler(cache, client, &config);

        let kick = scheduler.kick_handle();
        // Nothing is draining the channel yet; repeated kicks must drop.
        for _ in 0..16 {
            kick.kick();
        }
    }
}
