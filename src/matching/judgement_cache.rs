use ahash::AHasher;
use chrono::Utc;
use lru::LruCache;
use std::hash::{Hash, Hasher};
use std::num::{NonZero, NonZeroUsize};
use std::time::Duration;

/// Configuration for NotRelevant-pair suppression.
#[derive(Debug, Clone)]
pub struct JudgementCacheConfig {
    pub capacity: NonZeroUsize,
    pub ttl: Duration,
}

impl Default for JudgementCacheConfig {
    fn default() -> Self {
        Self {
            capacity: NonZero::new(10_000).expect("judgement cache can't be of size 0"),
            ttl: Duration::from_secs(6 * 3600),
        }
    }
}

/// Remembers (market, news) pairs judged NotRelevant so the matcher can skip
/// re-judging them within the recency window. NotRelevant verdicts are never
/// persisted; this cache is their only trace.
pub struct JudgementCache {
    cache: LruCache<u64, i64>,
    ttl_secs: i64,
}

impl JudgementCache {
    pub fn new(config: JudgementCacheConfig) -> Self {
        Self {
            cache: LruCache::new(config.capacity),
            ttl_secs: config.ttl.as_secs() as i64,
        }
    }

    fn key(market_id: &str, news_id: &str) -> u64 {
        let mut hasher = AHasher::default();
        market_id.hash(&mut hasher);
        news_id.hash(&mut hasher);
        hasher.finish()
    }

    pub fn mark_not_relevant(&mut self, market_id: &str, news_id: &str) {
        self.cache
            .put(Self::key(market_id, news_id), Utc::now().timestamp());
    }

    // Expired keys are not swept eagerly; a stale entry just fails the TTL
    // check and gets overwritten on the next mark.
    pub fn is_suppressed(&mut self, market_id: &str, news_id: &str) -> bool {
        let now = Utc::now().timestamp();
        match self.cache.get(&Self::key(market_id, news_id)) {
            Some(&ts) => now - ts <= self.ttl_secs,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_marked_pairs() {
        let mut cache = JudgementCache::new(JudgementCacheConfig::default());

        assert!(!cache.is_suppressed("m1", "n1"));
        cache.mark_not_relevant("m1", "n1");
        assert!(cache.is_suppressed("m1", "n1"));
        // Other pairings of the same ids are unaffected
        assert!(!cache.is_suppressed("m1", "n2"));
        assert!(!cache.is_suppressed("m2", "n1"));
    }

    #[test]
    fn expired_entries_stop_suppressing() {
        let mut cache = JudgementCache::new(JudgementCacheConfig {
            capacity: NonZero::new(16).unwrap(),
            ttl: Duration::from_secs(0),
        });

        cache.mark_not_relevant("m1", "n1");
        // ttl of zero: anything older than "now" second-resolution may pass,
        // so force the stored timestamp into the past.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(!cache.is_suppressed("m1", "n1"));
    }
}
