//! Transparent AI response cache. Keyed by `(call_kind, sha256(prompt))` so
//! two identical calls within the TTL window cost nothing. Guarded by a
//! single `std::sync::Mutex` — lookups are short, synchronous, and never
//! held across an `.await`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

const MAX_ENTRIES: usize = 512;

struct Entry {
    value: String,
    inserted_at: Instant,
}

struct State {
    entries: HashMap<String, Entry>,
    order: VecDeque<String>,
}

pub struct AiCache {
    ttl: Duration,
    state: Mutex<State>,
}

impl AiCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(State { entries: HashMap::new(), order: VecDeque::new() }),
        }
    }

    pub fn key(call_kind: &str, prompt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(call_kind);
        hasher.update("|");
        hasher.update(prompt);
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        let expired = match state.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            state.entries.remove(key);
            state.order.retain(|k| k != key);
            return None;
        }
        state.order.retain(|k| k != key);
        state.order.push_back(key.to_string());
        state.entries.get(key).map(|e| e.value.clone())
    }

    pub fn put(&self, key: String, value: String) {
        let mut state = self.state.lock().unwrap();
        state.order.retain(|k| k != &key);
        state.order.push_back(key.clone());
        state.entries.insert(key, Entry { value, inserted_at: Instant::now() });
        while state.order.len() > MAX_ENTRIES {
            if let Some(oldest) = state.order.pop_front() {
                state.entries.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hits_on_repeat_key_within_ttl() {
        let cache = AiCache::new(Duration::from_secs(60));
        let key = AiCache::key("analysis", "prompt text");
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), "response".to_string());
        assert_eq!(cache.get(&key), Some("response".to_string()));
    }

    #[test]
    fn misses_once_ttl_has_elapsed() {
        let cache = AiCache::new(Duration::from_millis(1));
        let key = AiCache::key("analysis", "prompt text");
        cache.put(key.clone(), "response".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn evicts_oldest_entry_once_bounded() {
        let cache = AiCache::new(Duration::from_secs(60));
        for i in 0..(MAX_ENTRIES + 1) {
            cache.put(format!("key-{i}"), format!("value-{i}"));
        }
        assert!(cache.get("key-0").is_none());
        assert_eq!(cache.get(&format!("key-{MAX_ENTRIES}")), Some(format!("value-{MAX_ENTRIES}")));
    }
}
