//! Rolling-window statistical baseline of traffic (RPS, header counts,
//! content lengths), used by the heuristic scorer's z-score signals.

use std::collections::VecDeque;

use super::RequestFeatures;

const MIN_OBSERVATIONS: usize = 100;

struct Observation {
    timestamp: f64,
    header_count: usize,
    content_length: u64,
}

pub struct BaselineModel {
    window_secs: f64,
    observations: VecDeque<Observation>,
    pub is_ready: bool,
    pub mean_rps: f64,
    pub std_rps: f64,
    pub mean_header_count: f64,
    pub std_header_count: f64,
    pub mean_content_length: f64,
    pub std_content_length: f64,
}

impl BaselineModel {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs: window_secs as f64,
            observations: VecDeque::new(),
            is_ready: false,
            mean_rps: 0.0,
            std_rps: 1.0,
            mean_header_count: 0.0,
            std_header_count: 1.0,
            mean_content_length: 0.0,
            std_content_length: 1.0,
        }
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    pub fn record_observation(&mut self, features: &RequestFeatures) {
        self.observations.push_back(Observation {
            timestamp: features.timestamp,
            header_count: features.header_count,
            content_length: features.content_length,
        });
        self.evict_old(features.timestamp);
    }

    fn evict_old(&mut self, now: f64) {
        let cutoff = now - self.window_secs;
        while let Some(front) = self.observations.front() {
            if front.timestamp < cutoff {
                self.observations.pop_front();
            } else {
                break;
            }
        }
    }

    /// Recompute RPS/header-count/content-length statistics. Requires at
    /// least [`MIN_OBSERVATIONS`] observations; safe against empty buckets.
    pub fn update_model(&mut self) {
        if self.observations.len() < MIN_OBSERVATIONS {
            return;
        }

        let timestamps: Vec<f64> = self.observations.iter().map(|o| o.timestamp).collect();
        let min_ts = timestamps.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_ts = timestamps.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let span = (max_ts - min_ts).max(0.0);
        let n_buckets = ((span / 60.0).floor() as usize).max(1);

        let mut bucket_counts = vec![0u64; n_buckets];
        for ts in &timestamps {
            let offset = ((ts - min_ts) / 60.0).floor() as usize;
            let idx = offset.min(n_buckets - 1);
            bucket_counts[idx] += 1;
        }
        let rps_values: Vec<f64> = bucket_counts.iter().map(|c| *c as f64 / 60.0).collect();
        let (mean_rps, std_rps) = mean_std(&rps_values);

        let header_counts: Vec<f64> = self.observations.iter().map(|o| o.header_count as f64).collect();
        let (mean_header_count, std_header_count) = mean_std(&header_counts);

        let content_lengths: Vec<f64> = self.observations.iter().map(|o| o.content_length as f64).collect();
        let (mean_content_length, std_content_length) = mean_std(&content_lengths);

        self.mean_rps = mean_rps;
        self.std_rps = zero_clamp(std_rps);
        self.mean_header_count = mean_header_count;
        self.std_header_count = zero_clamp(std_header_count);
        self.mean_content_length = mean_content_length;
        self.std_content_length = zero_clamp(std_content_length);
        self.is_ready = true;
    }
}

fn zero_clamp(std: f64) -> f64 {
    if std == 0.0 { 1.0 } else { std }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature_at(ts: f64) -> RequestFeatures {
        RequestFeatures {
            timestamp: ts,
            client_ip: "198.51.100.1".into(),
            method: "GET".into(),
            path: "/".into(),
            query: String::new(),
            user_agent: "test".into(),
            content_length: 0,
            header_count: 6,
            accept_language: "en".into(),
            has_cookie: true,
            has_referer: true,
        }
    }

    #[test]
    fn not_ready_below_min_observations() {
        let mut b = BaselineModel::new(86_400);
        for i in 0..50 {
            b.record_observation(&feature_at(i as f64));
        }
        b.update_model();
        assert!(!b.is_ready);
    }

    #[test]
    fn ready_after_min_observations() {
        let mut b = BaselineModel::new(86_400);
        for i in 0..150 {
            b.record_observation(&feature_at(i as f64));
        }
        b.update_model();
        assert!(b.is_ready);
        assert!(b.std_rps > 0.0);
    }

    #[test]
    fn evicts_observations_outside_window() {
        let mut b = BaselineModel::new(10);
        b.record_observation(&feature_at(0.0));
        b.record_observation(&feature_at(20.0));
        assert_eq!(b.observation_count(), 1);
    }
}
