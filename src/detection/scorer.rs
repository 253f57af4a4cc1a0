//! Weighted composite anomaly score from baseline z-scores, rate, and
//! behavior signals.

use super::baseline::BaselineModel;
use super::RequestFeatures;

const SUSPICIOUS_UA_TOKENS: &[&str] = &[
    "python-requests",
    "curl",
    "wget",
    "go-http-client",
    "httpclient",
    "java/",
    "libwww",
    "okhttp",
];

pub struct HeuristicScorer;

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicScorer {
    pub fn new() -> Self {
        Self
    }

    pub fn score(
        &self,
        features: &RequestFeatures,
        baseline: &BaselineModel,
        rate_ratio: f64,
        behavior_score: f64,
    ) -> f64 {
        if !baseline.is_ready {
            return 0.0;
        }

        let header_count = z_to_score(
            features.header_count as f64,
            baseline.mean_header_count,
            baseline.std_header_count,
        );
        let content_length = z_to_score(
            features.content_length as f64,
            baseline.mean_content_length,
            baseline.std_content_length,
        );
        let user_agent = score_user_agent(&features.user_agent);
        let path_entropy = score_path(&features.path);
        let rate = rate_ratio.clamp(0.0, 1.0);
        let behavior = behavior_score.clamp(0.0, 1.0);

        let composite = header_count * 0.15
            + content_length * 0.10
            + user_agent * 0.20
            + path_entropy * 0.10
            + rate * 0.20
            + behavior * 0.25;

        composite.clamp(0.0, 1.0)
    }
}

/// Piecewise-linear z-score-to-threat-score mapping: 0 below z=1.5, 1 at
/// or above z=3.0, linear ramp between.
pub fn z_to_score(value: f64, mean: f64, std: f64) -> f64 {
    if std == 0.0 {
        return 0.0;
    }
    let z = (value - mean).abs() / std;
    if z < 1.5 {
        0.0
    } else if z < 3.0 {
        (z - 1.5) / 1.5
    } else {
        1.0
    }
}

/// Suspicious-token UA score shared with the ML feature extractor: empty
/// UA is the strongest signal, a known HTTP-library token is weaker,
/// anything else is unremarkable.
pub(crate) fn score_user_agent(ua: &str) -> f64 {
    if ua.is_empty() {
        return 0.9;
    }
    let lower = ua.to_lowercase();
    if SUSPICIOUS_UA_TOKENS.iter().any(|token| lower.contains(token)) {
        0.5
    } else {
        0.0
    }
}

fn score_path(path: &str) -> f64 {
    if path.len() > 512 {
        return 0.8;
    }
    let unique_chars: std::collections::HashSet<char> = path.chars().collect();
    if unique_chars.len() > 40 {
        0.5
    } else {
        0.0
    }
}
