//! Read-only observability over the inventory cache.
//!
//! Snapshots trim each pool before reading so figures never include expired
//! creatives; that trim is the only mutation this module performs.

use crate::pool::{CategoryPool, InventoryCache};
use chrono::{DateTime, Utc};
use pantry_core::types::CategoryId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct SizePoolStats {
    pub outstanding_impressions: u32,
    pub queue_depth: usize,
    pub consecutive_empty_refills: u32,
    pub earliest_expires_at: Option<DateTime<Utc>>,
    pub latest_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryStats {
    pub id: CategoryId,
    pub display_name: String,
    pub token_count: usize,
    pub error_count: u64,
    pub sizes: BTreeMap<String, SizePoolStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Categories holding at least one unexpired creative.
    pub active_category_count: usize,
    pub total_category_count: usize,
    pub total_errors: u64,
    pub in_flight_refills: usize,
}

pub struct StatsReporter {
    cache: Arc<InventoryCache>,
}

impl StatsReporter {
    pub fn new(cache: Arc<InventoryCache>) -> Self {
        Self { cache }
    }

    pub fn category(&self, id: CategoryId) -> Option<CategoryStats> {
        let now = Utc::now();
        self.cache
            .category(id)
            .map(|category| Self::category_stats(category, now))
    }

    pub fn categories(&self) -> BTreeMap<CategoryId, CategoryStats> {
        let now = Utc::now();
        self.cache
            .categories()
            .map(|category| (category.id(), Self::category_stats(category, now)))
            .collect()
    }

    pub fn statistics(&self) -> CacheStats {
        let now = Utc::now();
        let mut active = 0;
        for category in self.cache.categories() {
            let stocked = category.size_pools().any(|(_, pool)| {
                let mut pool = pool.lock();
                pool.trim(now);
                !pool.is_empty()
            });
            if stocked {
                active += 1;
            }
        }
        CacheStats {
            active_category_count: active,
            total_category_count: self.cache.total_category_count(),
            total_errors: self.cache.total_errors(),
            in_flight_refills: self.cache.in_flight_refills(),
        }
    }

    fn category_stats(category: &CategoryPool, now: DateTime<Utc>) -> CategoryStats {
        let sizes = category
            .size_pools()
            .map(|(size, pool)| {
                let mut pool = pool.lock();
                pool.trim(now);
                (
                    size.to_string(),
                    SizePoolStats {
                        outstanding_impressions: pool.outstanding_impressions(),
                        queue_depth: pool.queue_depth(),
                        consecutive_empty_refills: pool.consecutive_empty_refills(),
                        earliest_expires_at: pool.earliest_expires_at(),
                        latest_expires_at: pool.latest_expires_at(),
                    },
                )
            })
            .collect();
        CategoryStats {
            id: category.id(),
            display_name: category.display_name().to_string(),
            token_count: category.token_count(),
            error_count: category.error_count(),
            sizes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pantry_core::config::InventoryConfig;
    use pantry_core::types::Creative;
    use std::collections::HashMap;

    fn make_cache() -> Arc<InventoryCache> {
        let categories: HashMap<u32, String> = [(2, "Automotive"), (20, "Travel")]
            .into_iter()
            .map(|(id, name)| (id, name.to_string()))
            .collect();
        Arc::new(InventoryCache::new(&InventoryConfig::default(), &categories))
    }

    fn seed(cache: &InventoryCache, category: u32, size: &str, expires_in_secs: i64, imps: u32) {
        cache
            .category(category)
            .expect("configured category")
            .size_pool(size)
            .expect("configured size")
            .lock()
            .enqueue(Creative {
                landing_page: String::new(),
                image_url: "https://cdn.example.com/ad.png".to_string(),
                expires_at: Utc::now() + Duration::seconds(expires_in_secs),
                impressions_remaining: imps,
            });
    }

    #[test]
    fn test_category_snapshot_reflects_pools() {
        let cache = make_cache();
        seed(&cache, 2, "300x250", 600, 2);
        seed(&cache, 2, "300x250", 7_200, 3);

        let reporter = StatsReporter::new(cache);
        let stats = reporter.category(2).expect("configured category");
        assert_eq!(stats.display_name, "Automotive");
        assert_eq!(stats.token_count, 1);

        let pool = &stats.sizes["300x250"];
        assert_eq!(pool.queue_depth, 2);
        assert_eq!(pool.outstanding_impressions, 5);
        assert!(pool.earliest_expires_at.expect("stocked") <= pool.latest_expires_at.expect("stocked"));

        assert!(reporter.category(99).is_none());
    }

    #[test]
    fn test_snapshot_trims_expired_entries() {
        let cache = make_cache();
        seed(&cache, 20, "728x90", -30, 4);

        let reporter = StatsReporter::new(cache);
        let stats = reporter.category(20).expect("configured category");
        let pool = &stats.sizes["728x90"];
        assert_eq!(pool.queue_depth, 0);
        assert_eq!(pool.outstanding_impressions, 0);
        assert!(pool.earliest_expires_at.is_none());
    }

    #[test]
    fn test_statistics_counts_active_categories() {
        let cache = make_cache();
        seed(&cache, 2, "300x250", 600, 1);
        seed(&cache, 20, "728x90", -30, 1);

        let reporter = StatsReporter::new(cache);
        let stats = reporter.statistics();
        assert_eq!(stats.total_category_count, 2);
        assert_eq!(stats.active_category_count, 1);
        assert_eq!(stats.total_errors, 0);
        assert_eq!(stats.in_flight_refills, 0);
    }
}
