//! Sliding-window rate limiting over the shared [`KvStore`].
//!
//! Window = 60s. Each check pipelines trim+add+cardinality+expire against a
//! single key; the returned cardinality includes the request being checked.
//! Allow iff `count <= limit`.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::kv::{self, KvStore};

const WINDOW_SECS: f64 = 60.0;

pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    per_ip_limit: u64,
    per_subnet_limit: u64,
    global_limit: u64,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, per_ip_limit: u64, per_subnet_limit: u64, global_limit: u64) -> Self {
        Self {
            kv,
            per_ip_limit,
            per_subnet_limit,
            global_limit,
        }
    }

    /// Per-IP, then per-/24-subnet, then global; short-circuits on the
    /// first rejected layer.
    pub fn allow(&self, ip: &str) -> bool {
        self.allow_with_count(ip).0
    }

    /// Like [`Self::allow`], but on rejection at any layer still returns
    /// the current per-IP count (used by the scorer's rate ratio).
    pub fn allow_with_count(&self, ip: &str) -> (bool, u64) {
        let (ip_allowed, ip_count) = self.check_key(&format!("rl:ip:{ip}"), self.per_ip_limit, WINDOW_SECS);
        if !ip_allowed {
            return (false, ip_count);
        }

        let subnet = Self::ip_to_subnet(ip);
        let (subnet_allowed, _) =
            self.check_key(&format!("rl:sub:{subnet}"), self.per_subnet_limit, WINDOW_SECS);
        if !subnet_allowed {
            return (false, ip_count);
        }

        let (global_allowed, _) = self.check_key("rl:global", self.global_limit, WINDOW_SECS);
        (global_allowed, ip_count)
    }

    /// Independent per-rule window with an arbitrary span.
    pub fn check_rule_limit(&self, ip: &str, rule_name: &str, limit: u64, window_secs: u64) -> (bool, u64) {
        self.check_key(&format!("rl:rule:{rule_name}:{ip}"), limit, window_secs as f64)
    }

    fn check_key(&self, key: &str, limit: u64, window_secs: f64) -> (bool, u64) {
        let now = kv::now_secs();
        let window_start = now - window_secs;
        let member = kv::unique_member(now);
        let ttl = Duration::from_secs(window_secs as u64 + 10);

        match self.kv.sorted_window(key, window_start, &member, now, ttl) {
            Ok(count) => (count <= limit, count),
            // KV unreachable: fail-open, count unknown.
            Err(_) => (true, 0),
        }
    }

    /// IPv4 -> "A.B.C.0/24" string; non-IPv4 or malformed -> the raw
    /// string (no subnet aggregation).
    pub fn ip_to_subnet(ip: &str) -> String {
        match ip.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => {
                let o = v4.octets();
                format!("{}.{}.{}.0/24", o[0], o[1], o[2])
            }
            _ => ip.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    fn limiter(per_ip: u64) -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryKvStore::new()), per_ip, 10_000, 100_000)
    }

    #[test]
    fn allows_exactly_limit_then_rejects() {
        let rl = limiter(3);
        let mut allowed_count = 0;
        for _ in 0..5 {
            if rl.allow("203.0.113.5") {
                allowed_count += 1;
            }
        }
        assert_eq!(allowed_count, 3);
    }

    #[test]
    fn allow_with_count_reports_count_on_rejection() {
        let rl = limiter(2);
        assert!(rl.allow("203.0.113.6"));
        assert!(rl.allow("203.0.113.6"));
        let (allowed, count) = rl.allow_with_count("203.0.113.6");
        assert!(!allowed);
        assert_eq!(count, 3);
    }

    #[test]
    fn subnet_derivation_ipv4() {
        assert_eq!(RateLimiter::ip_to_subnet("192.168.1.42"), "192.168.1.0/24");
    }

    #[test]
    fn subnet_derivation_non_ipv4_passthrough() {
        assert_eq!(RateLimiter::ip_to_subnet("not-an-ip"), "not-an-ip");
        assert_eq!(RateLimiter::ip_to_subnet("::1"), "::1");
    }

    #[test]
    fn rule_limit_is_independent_of_global_window() {
        let rl = limiter(1000);
        let (allowed, count) = rl.check_rule_limit("198.51.100.2", "login", 2, 60);
        assert!(allowed);
        assert_eq!(count, 1);
    }
}
