//! Per-domain extraction pattern learning and stability tracking (C4).
//!
//! Reads are served from a bounded in-process cache with 5-minute staleness;
//! writes go through the persistence queue (C9) so concurrent updates for
//! the same domain serialize there rather than racing in memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::ExtractionPattern;
use crate::persistence::queue::PersistenceQueue;

const CACHE_TTL: Duration = Duration::from_secs(300);
const STABILITY_SUCCESS_RATE: f64 = 0.8;
const STABILITY_STREAK: i64 = 5;
const FAILURE_THRESHOLD: i64 = 3;
const AI_COOLDOWN: Duration = Duration::from_secs(6 * 3600);

struct CacheEntry {
    patterns: Vec<ExtractionPattern>,
    fetched_at: Instant,
}

pub struct ExtractionMemory {
    queue: Arc<PersistenceQueue>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    daily_ai_budget: u32,
}

impl ExtractionMemory {
    pub fn new(queue: Arc<PersistenceQueue>, daily_ai_budget: u32) -> Self {
        Self {
            queue,
            cache: Mutex::new(HashMap::new()),
            daily_ai_budget,
        }
    }

    /// Best known pattern for a domain, ordered `is_stable DESC, success_rate DESC`.
    pub async fn best_pattern(&self, domain: &str) -> Option<ExtractionPattern> {
        self.patterns_for(domain).await.into_iter().next()
    }

    async fn patterns_for(&self, domain: &str) -> Vec<ExtractionPattern> {
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(domain)
                && entry.fetched_at.elapsed() < CACHE_TTL
            {
                return entry.patterns.clone();
            }
        }

        let mut patterns = self.queue.extraction_patterns_for_domain(domain).await.unwrap_or_default();
        patterns.sort_by(|a, b| {
            b.is_stable
                .cmp(&a.is_stable)
                .then(b.success_rate().partial_cmp(&a.success_rate()).unwrap_or(std::cmp::Ordering::Equal))
        });

        let mut cache = self.cache.lock().await;
        cache.insert(
            domain.to_string(),
            CacheEntry {
                patterns: patterns.clone(),
                fetched_at: Instant::now(),
            },
        );
        patterns
    }

    /// Record an attempt; updates counts, streaks, and rolling success
    /// rates, then invalidates the domain's cache entry.
    pub async fn record_attempt(
        &self,
        domain: &str,
        strategy: &str,
        selector: Option<&str>,
        success: bool,
        quality: f64,
        duration_ms: u64,
    ) {
        if let Err(e) = self
            .queue
            .record_extraction_attempt(domain, strategy, selector, success, quality, duration_ms)
            .await
        {
            debug!(domain, error = %e, "failed to record extraction attempt");
        }
        if let Err(e) = self.queue.update_domain_stability(domain, success).await {
            debug!(domain, error = %e, "failed to update domain stability");
        }
        self.cache.lock().await.remove(domain);

        if success && selector.is_some() {
            let stability = self.queue.domain_stability(domain).await.ok().flatten();
            let is_stable = stability
                .as_ref()
                .map(|s| s.success_rate_7d >= STABILITY_SUCCESS_RATE && s.consecutive_successes >= STABILITY_STREAK)
                .unwrap_or(false);
            if is_stable {
                let _ = self.queue.mark_pattern_stable(domain, selector.unwrap(), strategy).await;
            }
        }
    }

    /// True iff the domain is unstable, has failed enough consecutive
    /// times, AI analysis hasn't run recently, and the daily budget remains.
    pub async fn should_invoke_ai(&self, domain: &str) -> bool {
        let Ok(Some(stability)) = self.queue.domain_stability(domain).await else {
            return true;
        };
        if stability.is_stable {
            return false;
        }
        if stability.consecutive_failures < FAILURE_THRESHOLD {
            return false;
        }
        if let Some(last) = stability.last_ai_analysis
            && Utc::now().signed_duration_since(last).num_seconds() < AI_COOLDOWN.as_secs() as i64
        {
            return false;
        }
        let used_today = self.queue.ai_selector_discovery_calls_today().await.unwrap_or(0);
        used_today < self.daily_ai_budget
    }

    /// Whether the domain is worth trying to render with a headless
    /// browser — not yet stable, or prior strategies failed and the
    /// domain's render budget hasn't been recently exhausted.
    pub async fn should_render(&self, domain: &str) -> bool {
        let Ok(Some(stability)) = self.queue.domain_stability(domain).await else {
            return true;
        };
        !stability.is_stable
    }

    /// A learned-selector hit on a stable domain is an extraction that
    /// would otherwise have needed an AI selector-discovery call.
    pub async fn credit_ai_savings(&self, domain: &str) {
        if let Err(e) = self.queue.credit_ai_savings(domain).await {
            debug!(domain, error = %e, "failed to credit AI savings");
        }
    }

    /// Records that AI selector discovery was attempted for `domain`,
    /// regardless of outcome, so the cooldown in `should_invoke_ai` applies.
    pub async fn record_ai_discovery_attempt(&self, domain: &str) {
        if let Err(e) = self.queue.stamp_ai_analysis(domain).await {
            debug!(domain, error = %e, "failed to stamp last AI analysis time");
        }
        self.cache.lock().await.remove(domain);
    }

    pub async fn record_ai_usage(&self, call_kind: &str, cache_hit: bool, input_hash: &str, model: &str) {
        if let Err(e) = self.queue.record_ai_usage(call_kind, cache_hit, input_hash, model, 0, 0).await {
            debug!(call_kind, error = %e, "failed to record ai usage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stability_thresholds_match_spec_defaults() {
        assert_eq!(STABILITY_SUCCESS_RATE, 0.8);
        assert_eq!(STABILITY_STREAK, 5);
    }
}
