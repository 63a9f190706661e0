//! Creative selection — the request path over the inventory cache.
//!
//! Selection never performs network I/O and never waits on refill activity;
//! it serves whatever is currently cached. Categories are visited in a
//! shuffled order so equally-scored categories share load across requests.

use crate::pool::{CategoryPool, InventoryCache};
use crate::scheduler::RefillKick;
use chrono::{DateTime, Utc};
use pantry_core::types::{size_key, AdUnit};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use tracing::debug;

pub struct AdSelector {
    cache: Arc<InventoryCache>,
    kick: Option<RefillKick>,
}

impl AdSelector {
    pub fn new(cache: Arc<InventoryCache>) -> Self {
        Self { cache, kick: None }
    }

    /// Nudge the refill scheduler after each selection attempt.
    pub fn with_kick(mut self, kick: RefillKick) -> Self {
        self.kick = Some(kick);
        self
    }

    /// Pick a creative for the caller's intent tokens and tile size.
    ///
    /// Returns `None` when no category has a usable creative of that size;
    /// the caller is expected to fall back to a placeholder.
    pub fn ad_unit_for_intents(&self, intents: &[String], width: u32, height: u32) -> Option<AdUnit> {
        let unit =
            self.select_with_rng(intents, width, height, Utc::now(), &mut rand::thread_rng());
        if let Some(kick) = &self.kick {
            kick.kick();
        }
        if unit.is_some() {
            metrics::counter!("inventory.selection.served").increment(1);
        } else {
            metrics::counter!("inventory.selection.no_match").increment(1);
        }
        unit
    }

    /// Selection with an injected clock and RNG, so tests can pin both.
    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        intents: &[String],
        width: u32,
        height: u32,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Option<AdUnit> {
        let size = size_key(width, height);

        let mut ids = self.cache.category_ids();
        ids.shuffle(rng);

        // First strictly-greater score wins; under the shuffled order this
        // is the randomized tie-break between equally-scored categories.
        let mut best: Option<(&CategoryPool, usize)> = None;
        for id in ids {
            let Some(category) = self.cache.category(id) else {
                continue;
            };
            let Some(pool) = category.size_pool(&size) else {
                continue;
            };
            {
                let mut pool = pool.lock();
                pool.trim(now);
                if pool.is_empty() {
                    continue;
                }
            }
            let score = category.intersection_score(intents);
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((category, score)),
            }
        }

        let (category, score) = best?;
        let creative = category.size_pool(&size)?.lock().take_impression()?;

        debug!(
            category = category.id(),
            name = category.display_name(),
            size = %size,
            score,
            remaining = creative.impressions_remaining,
            "Serving creative"
        );

        Some(AdUnit::from_creative(
            creative,
            category.id(),
            category.display_name(),
            &size,
        ))
    }
}
