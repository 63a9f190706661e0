//! Per-(category, size) creative pools and the top-level inventory cache.
//!
//! Each `SizePool` is a min-priority queue ordered by expiration, so lazy
//! eviction and earliest-expiring-first serving are both queue-front
//! operations. The selector (request path) and the refill scheduler
//! (background path) touch the same pools, serialized by one mutex per pool.

use crate::keywords::KeywordIndex;
use chrono::{DateTime, Utc};
use pantry_core::config::InventoryConfig;
use pantry_core::types::{CategoryId, Creative};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};

/// Heap entry ordering creatives earliest-expiration-first.
#[derive(Debug, Clone)]
struct QueuedCreative(Creative);

impl Ord for QueuedCreative {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, the earliest expiry must surface.
        other.0.expires_at.cmp(&self.0.expires_at)
    }
}

impl PartialOrd for QueuedCreative {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedCreative {
    fn eq(&self, other: &Self) -> bool {
        self.0.expires_at == other.0.expires_at
    }
}

impl Eq for QueuedCreative {}

/// Bounded queue of creatives for one (category, size) pair.
///
/// Invariant: `outstanding_impressions` equals the sum of
/// `impressions_remaining` over the queue; every mutation below maintains it.
#[derive(Debug)]
pub struct SizePool {
    queue: BinaryHeap<QueuedCreative>,
    outstanding_impressions: u32,
    low_watermark: u32,
    high_watermark: u32,
    retry_at: DateTime<Utc>,
    consecutive_empty_refills: u32,
}

impl SizePool {
    pub fn new(low_watermark: u32, high_watermark: u32) -> Self {
        Self {
            queue: BinaryHeap::new(),
            outstanding_impressions: 0,
            low_watermark,
            high_watermark,
            retry_at: DateTime::<Utc>::MIN_UTC,
            consecutive_empty_refills: 0,
        }
    }

    /// Evict expired creatives from the queue front.
    ///
    /// Called before any read of `outstanding_impressions` and before any
    /// dequeue, so no expired creative is ever returned to a caller.
    pub fn trim(&mut self, now: DateTime<Utc>) {
        while let Some(front) = self.queue.peek() {
            if front.0.expires_at >= now {
                break;
            }
            if let Some(expired) = self.queue.pop() {
                self.outstanding_impressions = self
                    .outstanding_impressions
                    .saturating_sub(expired.0.impressions_remaining);
            }
        }
    }

    pub fn enqueue(&mut self, creative: Creative) {
        self.outstanding_impressions += creative.impressions_remaining;
        self.queue.push(QueuedCreative(creative));
    }

    /// Dequeue the earliest-expiring creative and consume one impression.
    ///
    /// The creative is re-enqueued when budget remains; either way exactly
    /// one unit leaves `outstanding_impressions`. The returned copy carries
    /// the post-decrement budget.
    pub fn take_impression(&mut self) -> Option<Creative> {
        let mut creative = self.queue.pop()?.0;
        self.outstanding_impressions = self.outstanding_impressions.saturating_sub(1);
        creative.impressions_remaining = creative.impressions_remaining.saturating_sub(1);
        if creative.impressions_remaining > 0 {
            self.queue.push(QueuedCreative(creative.clone()));
        }
        Some(creative)
    }

    /// Due for refill: below the low watermark and past any backoff.
    pub fn needs_refill(&self, now: DateTime<Utc>) -> bool {
        self.outstanding_impressions < self.low_watermark && now >= self.retry_at
    }

    /// Creative slots to request to bring the pool back to the high watermark.
    pub fn requested_quantity(&self) -> u32 {
        self.high_watermark
            .saturating_sub(self.outstanding_impressions)
    }

    /// Throttle further refill attempts while a request is in flight.
    pub fn defer_retry(&mut self, until: DateTime<Utc>) {
        self.retry_at = until;
    }

    /// Transport or parse failure: back off until `until`.
    pub fn mark_error(&mut self, until: DateTime<Utc>) {
        self.retry_at = until;
    }

    /// Well-formed response with zero usable creatives: back off and count it.
    pub fn mark_empty(&mut self, until: DateTime<Utc>) {
        self.consecutive_empty_refills += 1;
        self.retry_at = until;
    }

    /// Usable creatives arrived; the empty streak is over.
    pub fn mark_fresh(&mut self) {
        self.consecutive_empty_refills = 0;
    }

    pub fn outstanding_impressions(&self) -> u32 {
        self.outstanding_impressions
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn consecutive_empty_refills(&self) -> u32 {
        self.consecutive_empty_refills
    }

    pub fn retry_at(&self) -> DateTime<Utc> {
        self.retry_at
    }

    pub fn earliest_expires_at(&self) -> Option<DateTime<Utc>> {
        self.queue.peek().map(|q| q.0.expires_at)
    }

    pub fn latest_expires_at(&self) -> Option<DateTime<Utc>> {
        self.queue.iter().map(|q| q.0.expires_at).max()
    }
}

/// All size pools, vocabulary, and error accounting for one category.
pub struct CategoryPool {
    id: CategoryId,
    display_name: String,
    keywords: RwLock<KeywordIndex>,
    size_pools: HashMap<String, Mutex<SizePool>>,
    error_count: AtomicU64,
}

impl CategoryPool {
    fn new(id: CategoryId, display_name: String, config: &InventoryConfig) -> Self {
        let keywords = RwLock::new(KeywordIndex::from_phrase(&display_name));
        let size_pools = config
            .sizes
            .iter()
            .map(|size| {
                (
                    size.clone(),
                    Mutex::new(SizePool::new(config.low_watermark, config.high_watermark)),
                )
            })
            .collect();
        Self {
            id,
            display_name,
            keywords,
            size_pools,
            error_count: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> CategoryId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn size_pool(&self, size: &str) -> Option<&Mutex<SizePool>> {
        self.size_pools.get(size)
    }

    pub fn size_pools(&self) -> impl Iterator<Item = (&str, &Mutex<SizePool>)> {
        self.size_pools
            .iter()
            .map(|(size, pool)| (size.as_str(), pool))
    }

    pub fn intersection_score(&self, intents: &[String]) -> usize {
        self.keywords.read().intersection_score(intents)
    }

    /// Merge new vocabulary tokens; returns how many were actually new.
    pub fn merge_tokens<I>(&self, tokens: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut keywords = self.keywords.write();
        tokens
            .into_iter()
            .filter(|token| keywords.insert(token))
            .count()
    }

    pub fn token_count(&self) -> usize {
        self.keywords.read().len()
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(AtomicOrdering::Relaxed)
    }
}

/// The process-wide creative inventory: one `CategoryPool` per configured
/// category plus the global in-flight refill counter.
///
/// Constructed once by the composition root and shared behind an `Arc`.
pub struct InventoryCache {
    categories: HashMap<CategoryId, CategoryPool>,
    in_flight_refills: AtomicUsize,
    max_flights: usize,
}

impl InventoryCache {
    pub fn new(config: &InventoryConfig, categories: &HashMap<CategoryId, String>) -> Self {
        let categories = categories
            .iter()
            .map(|(id, name)| (*id, CategoryPool::new(*id, name.clone(), config)))
            .collect();
        Self {
            categories,
            in_flight_refills: AtomicUsize::new(0),
            max_flights: config.max_flights,
        }
    }

    pub fn category(&self, id: CategoryId) -> Option<&CategoryPool> {
        self.categories.get(&id)
    }

    pub fn categories(&self) -> impl Iterator<Item = &CategoryPool> {
        self.categories.values()
    }

    pub fn category_ids(&self) -> Vec<CategoryId> {
        self.categories.keys().copied().collect()
    }

    pub fn total_category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn total_errors(&self) -> u64 {
        self.categories.values().map(CategoryPool::error_count).sum()
    }

    pub fn in_flight_refills(&self) -> usize {
        self.in_flight_refills.load(AtomicOrdering::Acquire)
    }

    pub fn max_flights(&self) -> usize {
        self.max_flights
    }

    /// Claim one refill flight slot. Fails once `max_flights` are in flight.
    pub fn try_begin_flight(&self) -> bool {
        self.in_flight_refills
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |n| {
                if n < self.max_flights {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    pub fn end_flight(&self) {
        self.in_flight_refills.fetch_sub(1, AtomicOrdering::AcqRel);
    }
}
