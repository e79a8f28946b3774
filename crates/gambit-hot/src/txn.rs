//! Typed operations available inside an atomic transaction.

use std::collections::{HashMap, HashSet};

use crate::{Entry, Inner, Value};

/// Handle passed to [`crate::HotStore::atomically`] closures. Wrong-typed
/// access treats the key as absent and a write replaces the old value, the
/// way an external KV would after a DEL.
pub struct Txn<'a> {
    inner: &'a mut Inner,
    now_ms: u64,
}

impl<'a> Txn<'a> {
    pub(crate) fn new(inner: &'a mut Inner, now_ms: u64) -> Txn<'a> {
        Txn { inner, now_ms }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = match self.inner.entries.get(key) {
            Some(e) => e.expires_at.map_or(false, |at| at <= self.now_ms),
            None => return None,
        };
        if expired {
            self.inner.entries.remove(key);
            return None;
        }
        self.inner.entries.get_mut(key)
    }

    /// Insert or replace `key`. A replace that changes the value kind drops
    /// any existing TTL (it is a fresh key); a same-kind replace keeps it.
    fn write(&mut self, key: &str, value: Value) {
        let expires_at = match self.live(key) {
            Some(e) if std::mem::discriminant(&e.value) == std::mem::discriminant(&value) => {
                e.expires_at
            }
            _ => None,
        };
        self.inner
            .entries
            .insert(key.to_string(), Entry { value, expires_at });
    }

    fn hash_mut(&mut self, key: &str) -> Option<&mut HashMap<String, String>> {
        match self.live(key).map(|e| &mut e.value) {
            Some(Value::Hash(h)) => Some(h),
            _ => None,
        }
    }

    fn hash_entry(&mut self, key: &str) -> &mut HashMap<String, String> {
        if self.hash_mut(key).is_none() {
            self.write(key, Value::Hash(HashMap::new()));
        }
        match self.inner.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Hash(h)) => h,
            _ => unreachable!("hash entry was just written"),
        }
    }

    fn list_mut(&mut self, key: &str) -> Option<&mut Vec<String>> {
        match self.live(key).map(|e| &mut e.value) {
            Some(Value::List(l)) => Some(l),
            _ => None,
        }
    }

    fn set_mut(&mut self, key: &str) -> Option<&mut HashSet<String>> {
        match self.live(key).map(|e| &mut e.value) {
            Some(Value::Set(s)) => Some(s),
            _ => None,
        }
    }

    fn zset_mut(&mut self, key: &str) -> Option<&mut HashMap<String, i64>> {
        match self.live(key).map(|e| &mut e.value) {
            Some(Value::Zset(z)) => Some(z),
            _ => None,
        }
    }

    // ── strings ─────────────────────────────────────────────────────────

    pub fn set(&mut self, key: &str, value: &str) {
        self.write(key, Value::Str(value.to_string()));
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        match self.live(key).map(|e| &e.value) {
            Some(Value::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    // ── hashes ──────────────────────────────────────────────────────────

    pub fn hset(&mut self, key: &str, field: &str, value: &str) {
        self.hash_entry(key).insert(field.to_string(), value.to_string());
    }

    pub fn hset_many(&mut self, key: &str, pairs: &[(&str, String)]) {
        let hash = self.hash_entry(key);
        for (field, value) in pairs {
            hash.insert(field.to_string(), value.clone());
        }
    }

    pub fn hget(&mut self, key: &str, field: &str) -> Option<String> {
        self.hash_mut(key).and_then(|h| h.get(field).cloned())
    }

    pub fn hgetall(&mut self, key: &str) -> Option<HashMap<String, String>> {
        self.hash_mut(key).map(|h| h.clone())
    }

    pub fn hdel(&mut self, key: &str, field: &str) -> bool {
        self.hash_mut(key)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false)
    }

    // ── lists ───────────────────────────────────────────────────────────

    pub fn rpush(&mut self, key: &str, value: &str) -> usize {
        if self.list_mut(key).is_none() {
            self.write(key, Value::List(Vec::new()));
        }
        let list = self.list_mut(key).expect("list entry was just written");
        list.push(value.to_string());
        list.len()
    }

    pub fn lrange(&mut self, key: &str) -> Vec<String> {
        self.list_mut(key).map(|l| l.clone()).unwrap_or_default()
    }

    pub fn llen(&mut self, key: &str) -> usize {
        self.list_mut(key).map(|l| l.len()).unwrap_or(0)
    }

    // ── sets ────────────────────────────────────────────────────────────

    pub fn sadd(&mut self, key: &str, member: &str) -> bool {
        if self.set_mut(key).is_none() {
            self.write(key, Value::Set(HashSet::new()));
        }
        self.set_mut(key)
            .expect("set entry was just written")
            .insert(member.to_string())
    }

    pub fn srem(&mut self, key: &str, member: &str) -> bool {
        let removed = self.set_mut(key).map(|s| s.remove(member)).unwrap_or(false);
        self.drop_if_empty(key);
        removed
    }

    pub fn smembers(&mut self, key: &str) -> Vec<String> {
        match self.set_mut(key) {
            Some(s) => {
                let mut v: Vec<String> = s.iter().cloned().collect();
                v.sort();
                v
            }
            None => Vec::new(),
        }
    }

    pub fn scard(&mut self, key: &str) -> usize {
        self.set_mut(key).map(|s| s.len()).unwrap_or(0)
    }

    // ── sorted sets ─────────────────────────────────────────────────────

    pub fn zadd(&mut self, key: &str, member: &str, score: i64) {
        if self.zset_mut(key).is_none() {
            self.write(key, Value::Zset(HashMap::new()));
        }
        self.zset_mut(key)
            .expect("zset entry was just written")
            .insert(member.to_string(), score);
    }

    pub fn zrem(&mut self, key: &str, member: &str) -> bool {
        let removed = self
            .zset_mut(key)
            .map(|z| z.remove(member).is_some())
            .unwrap_or(false);
        self.drop_if_empty(key);
        removed
    }

    pub fn zscore(&mut self, key: &str, member: &str) -> Option<i64> {
        self.zset_mut(key).and_then(|z| z.get(member).copied())
    }

    /// All members ordered by (score, member).
    pub fn zrange(&mut self, key: &str) -> Vec<(String, i64)> {
        match self.zset_mut(key) {
            Some(z) => {
                let mut v: Vec<(String, i64)> =
                    z.iter().map(|(m, s)| (m.clone(), *s)).collect();
                v.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                v
            }
            None => Vec::new(),
        }
    }

    // ── counters ────────────────────────────────────────────────────────

    fn counter_mut(&mut self, key: &str) -> &mut i64 {
        let is_counter = matches!(
            self.live(key).map(|e| &e.value),
            Some(Value::Counter(_))
        );
        if !is_counter {
            self.write(key, Value::Counter(0));
        }
        match self.inner.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Counter(c)) => c,
            _ => unreachable!("counter entry was just written"),
        }
    }

    pub fn incr(&mut self, key: &str, by: i64) -> i64 {
        let c = self.counter_mut(key);
        *c += by;
        *c
    }

    /// Decrement that saturates at zero; spectator counts never go negative.
    pub fn decr_floor(&mut self, key: &str) -> i64 {
        let c = self.counter_mut(key);
        *c = (*c - 1).max(0);
        *c
    }

    pub fn counter(&mut self, key: &str) -> i64 {
        match self.live(key).map(|e| &e.value) {
            Some(Value::Counter(c)) => *c,
            _ => 0,
        }
    }

    // ── keys ────────────────────────────────────────────────────────────

    pub fn del(&mut self, key: &str) -> bool {
        self.inner.entries.remove(key).is_some()
    }

    pub fn exists(&mut self, key: &str) -> bool {
        self.live(key).is_some()
    }

    /// Absolute expiry deadline in epoch ms. No-op when the key is absent.
    pub fn expire_at(&mut self, key: &str, deadline_ms: u64) {
        if let Some(e) = self.live(key) {
            e.expires_at = Some(deadline_ms);
        }
    }

    pub fn expires_at(&mut self, key: &str) -> Option<u64> {
        self.live(key).and_then(|e| e.expires_at)
    }

    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.live(key).map(|e| &e.value) {
            Some(Value::Set(s)) => s.is_empty(),
            Some(Value::Zset(z)) => z.is_empty(),
            Some(Value::Hash(h)) => h.is_empty(),
            Some(Value::List(l)) => l.is_empty(),
            _ => false,
        };
        if empty {
            self.inner.entries.remove(key);
        }
    }
}
