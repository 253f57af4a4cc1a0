//! Application state shared across the pipeline, background tasks, and the
//! admin/status surface.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

use crate::config::Config;
use crate::detection::{DetectionEngine, MlModelConfig};
use crate::kv::{KvStore, MemoryKvStore};
use crate::mitigation::{Blocker, ChallengeManager, RateLimiter};
use crate::rules::RulesEngine;

const RECENT_EVENTS_CAP: usize = 200;
const RPS_WINDOW_SECS: f64 = 10.0;

/// A single entry in the bounded traffic-event ring.
#[derive(Debug, Clone, Serialize)]
pub struct TrafficEvent {
    pub time: f64,
    pub ip: String,
    pub action: String,
    pub path: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attack_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

/// Process-local, in-memory operability counters. Pure bookkeeping — never
/// consulted by the pipeline's admission decisions.
#[derive(Default)]
pub struct TrafficCounters {
    total_requests: AtomicU64,
    blocked_requests: AtomicU64,
    rate_limited_requests: AtomicU64,
    forwarded_requests: AtomicU64,
    challenged_requests: AtomicU64,
    active_ips: DashMap<String, ()>,
    recent_events: Mutex<VecDeque<TrafficEvent>>,
    request_times: Mutex<VecDeque<f64>>,
}

impl TrafficCounters {
    pub fn record_request(&self, ip: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.active_ips.insert(ip.to_owned(), ());
        let now = crate::kv::now_secs();
        let mut times = self.request_times.lock().unwrap();
        times.push_back(now);
        while times.len() > 10_000 {
            times.pop_front();
        }
    }

    pub fn record_event(&self, event: TrafficEvent, action_counter: Option<ActionCounter>) {
        if let Some(counter) = action_counter {
            match counter {
                ActionCounter::Blocked => self.blocked_requests.fetch_add(1, Ordering::Relaxed),
                ActionCounter::RateLimited => self.rate_limited_requests.fetch_add(1, Ordering::Relaxed),
                ActionCounter::Forwarded => self.forwarded_requests.fetch_add(1, Ordering::Relaxed),
                ActionCounter::Challenged => self.challenged_requests.fetch_add(1, Ordering::Relaxed),
            };
        }
        let mut events = self.recent_events.lock().unwrap();
        events.push_back(event);
        while events.len() > RECENT_EVENTS_CAP {
            events.pop_front();
        }
    }

    /// Instantaneous requests-per-second over the last 10 seconds.
    pub fn requests_per_second(&self) -> f64 {
        let now = crate::kv::now_secs();
        let cutoff = now - RPS_WINDOW_SECS;
        let times = self.request_times.lock().unwrap();
        let count = times.iter().filter(|t| **t > cutoff).count();
        count as f64 / RPS_WINDOW_SECS
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            rate_limited_requests: self.rate_limited_requests.load(Ordering::Relaxed),
            forwarded_requests: self.forwarded_requests.load(Ordering::Relaxed),
            challenged_requests: self.challenged_requests.load(Ordering::Relaxed),
            active_ip_count: self.active_ips.len(),
            requests_per_second: self.requests_per_second(),
            recent_events: self.recent_events.lock().unwrap().iter().cloned().collect(),
        }
    }
}

pub enum ActionCounter {
    Blocked,
    RateLimited,
    Forwarded,
    Challenged,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrafficSnapshot {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub rate_limited_requests: u64,
    pub forwarded_requests: u64,
    pub challenged_requests: u64,
    pub active_ip_count: usize,
    pub requests_per_second: f64,
    pub recent_events: Vec<TrafficEvent>,
}

/// Explicit dependency bag, built once at startup and shared behind an
/// `Arc` with every request handler and background task.
pub struct ServerContext {
    pub config: Config,
    pub kv: Arc<dyn KvStore>,
    pub rate_limiter: RateLimiter,
    pub blocker: Blocker,
    pub detection: DetectionEngine,
    pub rules: RulesEngine,
    pub challenge: ChallengeManager,
    pub http_client: reqwest::Client,
    pub traffic: TrafficCounters,
    pub started_at: Instant,
}

impl ServerContext {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());

        let rate_limiter = RateLimiter::new(
            kv.clone(),
            config.rate_limit_per_ip,
            config.rate_limit_per_subnet,
            config.rate_limit_global,
        );
        let blocker = Blocker::new(kv.clone());
        let challenge = ChallengeManager::new(config.jwt_secret.as_bytes().to_vec());

        let ml_config = MlModelConfig {
            model_dir: std::path::PathBuf::from(&config.model_dir),
            ..Default::default()
        };
        let detection = DetectionEngine::new(config.baseline_window_secs, ml_config);

        let mut rules = RulesEngine::new();
        rules.load_from_directory(&config.rules_dir);

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.proxy_timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build upstream HTTP client: {e}"))?;

        Ok(Self {
            config,
            kv,
            rate_limiter,
            blocker,
            detection,
            rules,
            challenge,
            http_client,
            traffic: TrafficCounters::default(),
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Background maintenance tick: baseline recompute + ML maybe-train.
    /// Intended to run every 60s on an owned task until cancellation.
    pub async fn run_maintenance_tick(&self) {
        self.detection.run_maintenance().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traffic_counters_track_totals_and_recent_events() {
        let counters = TrafficCounters::default();
        counters.record_request("198.51.100.1");
        counters.record_event(
            TrafficEvent {
                time: 0.0,
                ip: "198.51.100.1".into(),
                action: "blocked".into(),
                path: "/".into(),
                method: "GET".into(),
                score: None,
                attack_type: None,
                rule: None,
            },
            Some(ActionCounter::Blocked),
        );
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.blocked_requests, 1);
        assert_eq!(snapshot.recent_events.len(), 1);
    }

    #[test]
    fn recent_events_ring_is_bounded() {
        let counters = TrafficCounters::default();
        for i in 0..250 {
            counters.record_event(
                TrafficEvent {
                    time: i as f64,
                    ip: "198.51.100.2".into(),
                    action: "monitored".into(),
                    path: "/".into(),
                    method: "GET".into(),
                    score: None,
                    attack_type: None,
                    rule: None,
                },
                None,
            );
        }
        assert_eq!(counters.snapshot().recent_events.len(), RECENT_EVENTS_CAP);
    }
}
