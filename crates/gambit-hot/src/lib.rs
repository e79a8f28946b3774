//! Hot key/value store.
//!
//! In-process store with the shape of an external KV: string, hash, list,
//! set, sorted-set, and counter values, per-key TTLs with lazy expiry, and
//! cursored prefix scans. Mutations run through [`HotStore::atomically`],
//! which executes a closure under the store lock — the in-process analogue
//! of a server-side atomic script. Closures must not block or perform I/O.
//!
//! Time never comes from the wall clock in here; every time-dependent
//! operation takes `now_ms` so tests control it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

mod txn;

pub use txn::Txn;

pub(crate) struct Entry {
    pub value: Value,
    pub expires_at: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    List(Vec<String>),
    Set(std::collections::HashSet<String>),
    Zset(HashMap<String, i64>),
    Counter(i64),
}

pub(crate) struct Inner {
    pub entries: HashMap<String, Entry>,
}

/// Cheap-to-clone handle; all clones share one store.
#[derive(Clone)]
pub struct HotStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for HotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HotStore {
    pub fn new() -> HotStore {
        HotStore {
            inner: Arc::new(Mutex::new(Inner { entries: HashMap::new() })),
        }
    }

    /// Run `f` atomically against the store. Everything the closure does is
    /// a single indivisible unit with respect to every other caller.
    pub fn atomically<R>(&self, now_ms: u64, f: impl FnOnce(&mut Txn<'_>) -> R) -> R {
        let mut inner = self.inner.lock();
        let mut txn = Txn::new(&mut inner, now_ms);
        f(&mut txn)
    }

    /// Cursored scan over live keys with the given prefix. Returns the next
    /// cursor (0 when exhausted) and a page of keys. Expired keys are
    /// dropped, not returned.
    pub fn scan(&self, cursor: u64, prefix: &str, count: usize, now_ms: u64) -> (u64, Vec<String>) {
        let mut inner = self.inner.lock();
        inner
            .entries
            .retain(|_, e| e.expires_at.map_or(true, |at| at > now_ms));

        let mut keys: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();

        let start = cursor as usize;
        if start >= keys.len() {
            return (0, Vec::new());
        }
        let end = (start + count).min(keys.len());
        let page = keys[start..end].to_vec();
        let next = if end == keys.len() { 0 } else { end as u64 };
        (next, page)
    }

    /// Number of live keys; test and health-probe helper.
    pub fn len(&self, now_ms: u64) -> usize {
        let mut inner = self.inner.lock();
        inner
            .entries
            .retain(|_, e| e.expires_at.map_or(true, |at| at > now_ms));
        inner.entries.len()
    }

    pub fn is_empty(&self, now_ms: u64) -> bool {
        self.len(now_ms) == 0
    }
}

/// Verdict of the fixed-window rate-limit script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    pub retry_after_ms: u64,
}

impl HotStore {
    /// Fixed-window rate limit: at most `max` hits per `window_ms` per key.
    /// The window starts at the first hit and the key expires with it.
    pub fn rate_limit(
        &self,
        key: &str,
        max: u64,
        window_ms: u64,
        now_ms: u64,
    ) -> RateLimitDecision {
        self.atomically(now_ms, |txn| {
            let count = txn.incr(key, 1);
            if count == 1 {
                txn.expire_at(key, now_ms + window_ms);
            }
            let count = count as u64;
            if count > max {
                let retry_after_ms = txn
                    .expires_at(key)
                    .map(|at| at.saturating_sub(now_ms))
                    .unwrap_or(window_ms);
                RateLimitDecision { allowed: false, remaining: 0, retry_after_ms }
            } else {
                RateLimitDecision { allowed: true, remaining: max - count, retry_after_ms: 0 }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_and_ttl_expiry() {
        let store = HotStore::new();
        store.atomically(1_000, |txn| {
            txn.set("k", "v");
            txn.expire_at("k", 2_000);
        });
        assert_eq!(store.atomically(1_500, |txn| txn.get("k")), Some("v".into()));
        assert_eq!(store.atomically(2_000, |txn| txn.get("k")), None);
        // Expired key is actually gone, not shadowed.
        assert!(store.is_empty(2_000));
    }

    #[test]
    fn hash_fields() {
        let store = HotStore::new();
        store.atomically(0, |txn| {
            txn.hset("h", "a", "1");
            txn.hset("h", "b", "2");
        });
        let all = store.atomically(0, |txn| txn.hgetall("h")).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.atomically(0, |txn| txn.hget("h", "a")), Some("1".into()));
        assert_eq!(store.atomically(0, |txn| txn.hget("h", "c")), None);
    }

    #[test]
    fn list_append_preserves_order() {
        let store = HotStore::new();
        store.atomically(0, |txn| {
            for i in 0..5 {
                txn.rpush("l", &i.to_string());
            }
        });
        let items = store.atomically(0, |txn| txn.lrange("l"));
        assert_eq!(items, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn zset_orders_by_score_then_member() {
        let store = HotStore::new();
        store.atomically(0, |txn| {
            txn.zadd("z", "c", 30);
            txn.zadd("z", "a", 10);
            txn.zadd("z", "b", 20);
            txn.zadd("z", "a2", 10);
        });
        let members: Vec<String> = store
            .atomically(0, |txn| txn.zrange("z"))
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(members, vec!["a", "a2", "b", "c"]);
        store.atomically(0, |txn| txn.zrem("z", "b"));
        assert_eq!(store.atomically(0, |txn| txn.zscore("z", "b")), None);
    }

    #[test]
    fn scan_pages_through_prefix() {
        let store = HotStore::new();
        store.atomically(0, |txn| {
            for i in 0..7 {
                txn.set(&format!("game:{i}"), "x");
            }
            txn.set("other:1", "x");
        });
        let mut seen = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, page) = store.scan(cursor, "game:", 3, 0);
            seen.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 7);
        assert!(seen.iter().all(|k| k.starts_with("game:")));
    }

    #[test]
    fn rate_limit_window() {
        let store = HotStore::new();
        for i in 0..3 {
            let d = store.rate_limit("rl:x", 3, 60_000, 1_000);
            assert!(d.allowed, "hit {i} should pass");
        }
        let denied = store.rate_limit("rl:x", 3, 60_000, 2_000);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_ms, 59_000);
        // Window expires, counter resets.
        let fresh = store.rate_limit("rl:x", 3, 60_000, 61_001);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
    }

    #[test]
    fn atomic_closure_sees_consistent_state() {
        let store = HotStore::new();
        let taken = store.atomically(0, |txn| {
            if txn.get("seat").is_none() {
                txn.set("seat", "me");
                true
            } else {
                false
            }
        });
        assert!(taken);
        let taken_again = store.atomically(0, |txn| {
            if txn.get("seat").is_none() {
                txn.set("seat", "you");
                true
            } else {
                false
            }
        });
        assert!(!taken_again);
        assert_eq!(store.atomically(0, |txn| txn.get("seat")), Some("me".into()));
    }

    #[test]
    fn type_mismatch_overwrites_like_a_fresh_key() {
        let store = HotStore::new();
        store.atomically(0, |txn| txn.set("k", "v"));
        store.atomically(0, |txn| txn.hset("k", "f", "1"));
        assert_eq!(store.atomically(0, |txn| txn.hget("k", "f")), Some("1".into()));
        assert_eq!(store.atomically(0, |txn| txn.get("k")), None);
    }
}
