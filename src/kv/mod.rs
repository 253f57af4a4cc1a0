//! The sliding-window / set / TTL-key primitive the pipeline is built on.
//!
//! This is the seam where a real shared store (Redis or similar) would
//! plug in; `MemoryKvStore` is a process-local, DashMap-backed
//! implementation so the crate is runnable stand-alone.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

/// Ordered-set + TTL-key operations the pipeline consumes.
///
/// Implementations that talk to an unreachable backing store should treat
/// rate-limit and block *checks* as fail-open (callers of `sorted_window`
/// interpret an error as "allow"); explicit block operations are fail-closed
/// no-ops on error.
pub trait KvStore: Send + Sync {
    /// Run the four-step sliding-window primitive as a single batch:
    /// trim members with score <= `window_start`, add `member` at `score`,
    /// return the resulting cardinality, and (re)set the key's TTL.
    fn sorted_window(
        &self,
        key: &str,
        window_start: f64,
        member: &str,
        score: f64,
        ttl: Duration,
    ) -> Result<u64, crate::errors::KvError>;

    fn set_add(&self, key: &str, member: &str);
    fn set_remove(&self, key: &str, member: &str);
    fn set_contains(&self, key: &str, member: &str) -> bool;
    fn set_members(&self, key: &str) -> Vec<String>;

    /// Set a string value at `key` with an expiry.
    fn ttl_set(&self, key: &str, value: &str, ttl: Duration);
    fn ttl_exists(&self, key: &str) -> bool;
    fn ttl_get(&self, key: &str) -> Option<String>;
    fn ttl_delete(&self, key: &str);
}

struct TtlEntry {
    value: String,
    expires_at: SystemTime,
}

impl Default for TtlEntry {
    fn default() -> Self {
        Self {
            value: String::default(),
            expires_at: UNIX_EPOCH,
        }
    }
}

/// In-process `KvStore`. Sliding-window members are stored as `(member,
/// score)` pairs sorted by score; a lazily-run sweep drops expired TTL
/// keys on read.
#[derive(Default, Clone)]
pub struct MemoryKvStore {
    sorted_sets: Arc<DashMap<String, Vec<(String, f64)>>>,
    sets: Arc<DashMap<String, Vec<String>>>,
    ttl_keys: Arc<DashMap<String, TtlEntry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn now() -> SystemTime {
        SystemTime::now()
    }
}

impl KvStore for MemoryKvStore {
    fn sorted_window(
        &self,
        key: &str,
        window_start: f64,
        member: &str,
        score: f64,
        ttl: Duration,
    ) -> Result<u64, crate::errors::KvError> {
        let _ = ttl; // a real store would set the key's expiry here
        let mut entry = self.sorted_sets.entry(key.to_owned()).or_default();
        entry.retain(|(_, s)| *s > window_start);
        entry.push((member.to_owned(), score));
        Ok(entry.len() as u64)
    }

    fn set_add(&self, key: &str, member: &str) {
        let mut entry = self.sets.entry(key.to_owned()).or_default();
        if !entry.iter().any(|m| m == member) {
            entry.push(member.to_owned());
        }
    }

    fn set_remove(&self, key: &str, member: &str) {
        if let Some(mut entry) = self.sets.get_mut(key) {
            entry.retain(|m| m != member);
        }
    }

    fn set_contains(&self, key: &str, member: &str) -> bool {
        self.sets
            .get(key)
            .map(|entry| entry.iter().any(|m| m == member))
            .unwrap_or(false)
    }

    fn set_members(&self, key: &str) -> Vec<String> {
        self.sets.get(key).map(|entry| entry.clone()).unwrap_or_default()
    }

    fn ttl_set(&self, key: &str, value: &str, ttl: Duration) {
        self.ttl_keys.insert(
            key.to_owned(),
            TtlEntry {
                value: value.to_owned(),
                expires_at: Self::now() + ttl,
            },
        );
    }

    fn ttl_exists(&self, key: &str) -> bool {
        match self.ttl_keys.get(key) {
            Some(entry) if entry.expires_at > Self::now() => true,
            Some(_) => {
                self.ttl_keys.remove(key);
                false
            }
            None => false,
        }
    }

    fn ttl_get(&self, key: &str) -> Option<String> {
        if self.ttl_exists(key) {
            self.ttl_keys.get(key).map(|e| e.value.clone())
        } else {
            None
        }
    }

    fn ttl_delete(&self, key: &str) {
        self.ttl_keys.remove(key);
    }
}

/// A unique, monotone-ordered member for sliding-window inserts: the
/// current timestamp plus 8 random hex chars, so two inserts at an
/// identical instant never collide and are both counted.
pub fn unique_member(now_secs: f64) -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let suffix: String = (0..8)
        .map(|_| std::char::from_digit(rng.random_range(0..16), 16).unwrap())
        .collect();
    format!("{now_secs}:{suffix}")
}

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
