// ── Pilot Engine: Intent Cache ─────────────────────────────────────────────
//
// Maps a normalized input string to a previously computed classification so
// identical requests skip remote classification entirely.
//
// The key is the case-folded text with whitespace runs collapsed. It is NOT scoped by conversation
// id: the same words typed in two conversations share one entry.
// Bounded LRU with an optional time-to-live.

use crate::atoms::types::Classification;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

struct CacheEntry {
    classification: Classification,
    stored_at: Instant,
}

pub struct IntentCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Option<Duration>,
}

/// Cache key for a raw operator request.
pub fn normalize_key(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

impl IntentCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, input: &str) -> Option<Classification> {
        let key = normalize_key(input);
        let mut entries = self.entries.lock();
        let expired = match entries.get(&key) {
            Some(entry) => self.ttl.is_some_and(|ttl| entry.stored_at.elapsed() > ttl),
            None => return None,
        };
        if expired {
            entries.pop(&key);
            return None;
        }
        entries.get(&key).map(|e| e.classification.clone())
    }

    pub fn put(&self, input: &str, classification: Classification) {
        let key = normalize_key(input);
        if key.is_empty() {
            return;
        }
        self.entries.lock().put(
            key,
            CacheEntry { classification, stored_at: Instant::now() },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{ActionType, Intent, IntentSource};

    fn classification(tag: &str) -> Classification {
        Classification::single(
            Intent::new(ActionType::SendMessage).with("message", tag),
            IntentSource::Model,
        )
    }

    #[test]
    fn key_is_trimmed_and_case_folded() {
        let cache = IntentCache::new(8, None);
        cache.put("  Send HELLO ", classification("hello"));
        assert!(cache.get("send hello").is_some());
        assert!(cache.get("SEND HELLO").is_some());
        assert!(cache.get("send hello!").is_none());
    }

    #[test]
    fn inner_whitespace_runs_share_a_key() {
        assert_eq!(normalize_key("send\t hello   #general"), "send hello #general");
        let cache = IntentCache::new(8, None);
        cache.put("react  👍\n to the last one", classification("r"));
        assert!(cache.get("react 👍 to the last one").is_some());
    }

    #[test]
    fn lru_bound_evicts_least_recent() {
        let cache = IntentCache::new(2, None);
        cache.put("a", classification("a"));
        cache.put("b", classification("b"));
        let _ = cache.get("a");
        cache.put("c", classification("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn ttl_expires_entries() {
        let cache = IntentCache::new(8, Some(Duration::from_millis(0)));
        cache.put("a", classification("a"));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn empty_input_not_cached() {
        let cache = IntentCache::new(8, None);
        cache.put("   ", classification("x"));
        assert!(cache.is_empty());
    }
}
