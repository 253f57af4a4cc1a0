//! Orchestrates the baseline, heuristic scorer, ML model, and behavior
//! analyzer into a single blended threat score per request.

use std::sync::Mutex;

use super::baseline::BaselineModel;
use super::behavior::BehaviorAnalyzer;
use super::ml_model::{MlAnomalyModel, MlModelConfig};
use super::scorer::HeuristicScorer;
use super::RequestFeatures;

/// Header-order hash, referer, and cookie are folded into behavior scoring
/// alongside the flat [`RequestFeatures`] record.
pub struct RequestContext<'a> {
    pub features: &'a RequestFeatures,
    pub header_order_hash: &'a str,
    pub referer: Option<&'a str>,
    pub cookie: Option<&'a str>,
}

struct Inner {
    baseline: BaselineModel,
    behavior: BehaviorAnalyzer,
}

pub struct ScoreResult {
    pub threat: f64,
    pub behavior_score: f64,
}

pub struct DetectionEngine {
    inner: Mutex<Inner>,
    scorer: HeuristicScorer,
    ml: MlAnomalyModel,
}

impl DetectionEngine {
    pub fn new(baseline_window_secs: u64, ml_config: MlModelConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                baseline: BaselineModel::new(baseline_window_secs),
                behavior: BehaviorAnalyzer::new(),
            }),
            scorer: HeuristicScorer::new(),
            ml: MlAnomalyModel::new(ml_config),
        }
    }

    /// Blended `[0, 1]` threat score for one request, plus the behavior
    /// score computed along the way — callers (e.g. the classifier) reuse
    /// it rather than recomputing it. Also feeds the baseline and ML
    /// training buffers for later background training.
    pub fn score(&self, ctx: &RequestContext<'_>, rate_count: u64, rate_limit: u64) -> ScoreResult {
        let rate_ratio = if rate_limit > 0 { rate_count as f64 / rate_limit as f64 } else { 0.0 };

        let mut guard = self.inner.lock().unwrap();
        let behavior_score = guard.behavior.record_and_score(
            ctx.features.timestamp,
            &ctx.features.client_ip,
            &ctx.features.path,
            &ctx.features.method,
            &ctx.features.user_agent,
            &ctx.features.accept_language,
            ctx.referer,
            ctx.cookie,
            ctx.header_order_hash,
        );

        let heuristic = self.scorer.score(ctx.features, &guard.baseline, rate_ratio, behavior_score);
        guard.baseline.record_observation(ctx.features);
        drop(guard);

        let threat = if self.ml.is_ready() {
            let ml_score = self.ml.score(ctx.features, rate_ratio, behavior_score);
            0.6 * heuristic + 0.4 * ml_score
        } else {
            heuristic
        };

        self.ml.record_sample(ctx.features, rate_ratio, behavior_score);
        ScoreResult { threat: threat.clamp(0.0, 1.0), behavior_score }
    }

    pub fn is_baseline_ready(&self) -> bool {
        self.inner.lock().unwrap().baseline.is_ready
    }

    pub fn is_ml_ready(&self) -> bool {
        self.ml.is_ready()
    }

    /// Background maintenance: recompute the baseline then attempt an ML
    /// (re)train. Intended to run on a periodic task, off the request path.
    pub async fn run_maintenance(&self) {
        {
            let mut guard = self.inner.lock().unwrap();
            guard.baseline.update_model();
        }
        self.ml.maybe_train().await;
    }
}
