//! IsolationForest-family anomaly model: warm-up -> first train -> ready ->
//! periodic retrain, scored off a fixed-length feature vector.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;

use serde::{Deserialize, Serialize};

use super::RequestFeatures;
use super::isolation_forest::IsolationForest;
use super::scorer::score_user_agent;

pub const VECTOR_LEN: usize = 11;

#[derive(Debug, Clone)]
pub struct MlModelConfig {
    pub min_train_samples: usize,
    pub retrain_interval_sec: u64,
    pub model_dir: PathBuf,
    pub contamination: f64,
    pub n_estimators: usize,
    pub max_samples: usize,
}

impl Default for MlModelConfig {
    fn default() -> Self {
        Self {
            min_train_samples: 500,
            retrain_interval_sec: 300,
            model_dir: PathBuf::from("models"),
            contamination: 0.05,
            n_estimators: 200,
            max_samples: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Scaler {
    mean: [f64; VECTOR_LEN],
    std: [f64; VECTOR_LEN],
}

impl Scaler {
    fn fit(rows: &[Vec<f64>]) -> Self {
        let n = rows.len() as f64;
        let mut mean = [0.0; VECTOR_LEN];
        for row in rows {
            for i in 0..VECTOR_LEN {
                mean[i] += row[i];
            }
        }
        for m in &mut mean {
            *m /= n;
        }
        let mut variance = [0.0; VECTOR_LEN];
        for row in rows {
            for i in 0..VECTOR_LEN {
                variance[i] += (row[i] - mean[i]).powi(2);
            }
        }
        let mut std = [0.0; VECTOR_LEN];
        for i in 0..VECTOR_LEN {
            let s = (variance[i] / n).sqrt();
            std[i] = if s == 0.0 { 1.0 } else { s };
        }
        Self { mean, std }
    }

    fn transform(&self, row: &[f64; VECTOR_LEN]) -> Vec<f64> {
        (0..VECTOR_LEN).map(|i| (row[i] - self.mean[i]) / self.std[i]).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrainedState {
    forest: IsolationForest,
    scaler: Scaler,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedModel {
    state: TrainedState,
    train_count: u64,
    timestamp: f64,
}

/// Extract the normative 11-field feature vector for a request.
pub fn extract_vector(
    features: &RequestFeatures,
    rate_ratio: f64,
    behavior_score: f64,
) -> [f64; VECTOR_LEN] {
    let unique_chars: std::collections::HashSet<char> = features.path.chars().collect();
    [
        features.header_count as f64,
        features.content_length as f64,
        score_user_agent(&features.user_agent),
        features.path.chars().count() as f64,
        unique_chars.len() as f64,
        if features.method == "POST" { 1.0 } else { 0.0 },
        if features.has_cookie { 1.0 } else { 0.0 },
        if features.has_referer { 1.0 } else { 0.0 },
        if features.accept_language.is_empty() { 0.0 } else { 1.0 },
        rate_ratio,
        behavior_score,
    ]
}

pub struct MlAnomalyModel {
    config: MlModelConfig,
    state: RwLock<Option<TrainedState>>,
    training_lock: AsyncMutex<()>,
    buffer: Mutex<VecDeque<[f64; VECTOR_LEN]>>,
    train_count: AtomicU64,
    last_train_time: AtomicU64,
}

impl MlAnomalyModel {
    pub fn new(config: MlModelConfig) -> Self {
        let model = Self {
            config,
            state: RwLock::new(None),
            training_lock: AsyncMutex::new(()),
            buffer: Mutex::new(VecDeque::new()),
            train_count: AtomicU64::new(0),
            last_train_time: AtomicU64::new(0),
        };
        model.try_load();
        model
    }

    pub fn is_ready(&self) -> bool {
        self.state.read().unwrap().is_some()
    }

    pub fn sample_count(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    pub fn train_count(&self) -> u64 {
        self.train_count.load(Ordering::Relaxed)
    }

    /// Append a sample to the bounded training buffer (capacity = 4x the
    /// configured training batch).
    pub fn record_sample(&self, features: &RequestFeatures, rate_ratio: f64, behavior_score: f64) {
        let vec = extract_vector(features, rate_ratio, behavior_score);
        let cap = self.config.max_samples * 4;
        let mut buf = self.buffer.lock().unwrap();
        buf.push_back(vec);
        while buf.len() > cap {
            buf.pop_front();
        }
    }

    /// Score one sample; `0.0`/not-ready if the model hasn't trained yet.
    pub fn score(&self, features: &RequestFeatures, rate_ratio: f64, behavior_score: f64) -> f64 {
        let guard = self.state.read().unwrap();
        let Some(state) = guard.as_ref() else {
            return 0.0;
        };
        let vec = extract_vector(features, rate_ratio, behavior_score);
        let scaled = state.scaler.transform(&vec);
        let d = state.forest.decision_function(&scaled);
        (1.0 - (d + 0.5)).clamp(0.0, 1.0)
    }

    /// `1` = normal, `-1` = anomaly; `1` if the model isn't ready.
    pub fn predict_label(&self, features: &RequestFeatures, rate_ratio: f64, behavior_score: f64) -> i32 {
        let guard = self.state.read().unwrap();
        let Some(state) = guard.as_ref() else {
            return 1;
        };
        let vec = extract_vector(features, rate_ratio, behavior_score);
        let scaled = state.scaler.transform(&vec);
        if state.forest.decision_function(&scaled) < 0.0 { -1 } else { 1 }
    }

    /// Train (or retrain) if conditions are met. CPU-bound work is pushed
    /// onto a blocking worker thread so the request path never stalls.
    /// Returns `true` if a training pass actually ran.
    pub async fn maybe_train(&self) -> bool {
        let now = crate::kv::now_secs();
        let is_trained = self.is_ready();
        let sample_count = self.sample_count();

        if !is_trained {
            if sample_count < self.config.min_train_samples {
                return false;
            }
        } else {
            let elapsed = now - self.last_train_time.load(Ordering::Relaxed) as f64;
            if elapsed < self.config.retrain_interval_sec as f64 || sample_count < 100 {
                return false;
            }
        }

        let Ok(_guard) = self.training_lock.try_lock() else {
            return false;
        };

        let snapshot: Vec<[f64; VECTOR_LEN]> = self.buffer.lock().unwrap().iter().cloned().collect();
        if snapshot.is_empty() {
            return false;
        }

        let config = self.config.clone();
        let trained = tokio::task::spawn_blocking(move || train_sync(snapshot, &config)).await;

        match trained {
            Ok(state) => {
                *self.state.write().unwrap() = Some(state);
                let count = self.train_count.fetch_add(1, Ordering::Relaxed) + 1;
                self.last_train_time.store(now as u64, Ordering::Relaxed);
                self.save(count, now);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "ML training task panicked");
                false
            }
        }
    }

    fn model_path(&self) -> PathBuf {
        self.config.model_dir.join("isolation_forest.json")
    }

    fn save(&self, train_count: u64, now: f64) {
        let state = match self.state.read().unwrap().clone() {
            Some(s) => s,
            None => return,
        };
        if let Err(e) = std::fs::create_dir_all(&self.config.model_dir) {
            tracing::warn!(error = %e, "failed to create model directory");
            return;
        }
        let persisted = PersistedModel { state, train_count, timestamp: now };
        match serde_json::to_vec(&persisted) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(self.model_path(), bytes) {
                    tracing::warn!(error = %e, "failed to persist ML model");
                } else {
                    tracing::info!(path = %self.model_path().display(), "ML model saved");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize ML model"),
        }
    }

    fn try_load(&self) {
        let path = self.model_path();
        if !path.exists() {
            return;
        }
        match std::fs::read(&path).ok().and_then(|b| serde_json::from_slice::<PersistedModel>(&b).ok()) {
            Some(persisted) => {
                *self.state.write().unwrap() = Some(persisted.state);
                self.train_count.store(persisted.train_count, Ordering::Relaxed);
                self.last_train_time.store(persisted.timestamp as u64, Ordering::Relaxed);
                tracing::info!(train_count = persisted.train_count, "ML model loaded from disk");
            }
            None => tracing::warn!(path = %path.display(), "failed to load persisted ML model, starting fresh"),
        }
    }
}

fn train_sync(snapshot: Vec<[f64; VECTOR_LEN]>, config: &MlModelConfig) -> TrainedState {
    use rand::seq::SliceRandom;

    let rows: Vec<Vec<f64>> = if snapshot.len() > config.max_samples {
        let mut rng = rand::rng();
        let mut indices: Vec<usize> = (0..snapshot.len()).collect();
        indices.shuffle(&mut rng);
        indices.into_iter().take(config.max_samples).map(|i| snapshot[i].to_vec()).collect()
    } else {
        snapshot.iter().map(|r| r.to_vec()).collect()
    };

    let scaler = Scaler::fit(&rows);
    let scaled_rows: Vec<Vec<f64>> = rows
        .iter()
        .map(|r| {
            let mut arr = [0.0; VECTOR_LEN];
            arr.copy_from_slice(r);
            scaler.transform(&arr)
        })
        .collect();

    let forest = IsolationForest::fit(&scaled_rows, config.n_estimators, config.max_samples, 42);
    TrainedState { forest, scaler }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(ua: &str) -> RequestFeatures {
        RequestFeatures {
            timestamp: 0.0,
            client_ip: "198.51.100.1".into(),
            method: "GET".into(),
            path: "/abc".into(),
            query: String::new(),
            user_agent: ua.into(),
            content_length: 0,
            header_count: 6,
            accept_language: "en".into(),
            has_cookie: true,
            has_referer: true,
        }
    }

    fn tmp_dir() -> PathBuf {
        use rand::Rng;
        let mut rng = rand::rng();
        let suffix: String = (0..8).map(|_| std::char::from_digit(rng.random_range(0..16), 16).unwrap()).collect();
        std::env::temp_dir().join(format!("sentinel-ml-test-{suffix}"))
    }

    #[test]
    fn vector_has_fixed_length_and_is_finite() {
        let v = extract_vector(&features("Mozilla/5.0"), 0.5, 0.3);
        assert_eq!(v.len(), VECTOR_LEN);
        assert!(v.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn ua_score_values() {
        assert_eq!(extract_vector(&features(""), 0.0, 0.0)[2], 0.9);
        assert_eq!(extract_vector(&features("curl/8.0"), 0.0, 0.0)[2], 0.5);
        assert_eq!(extract_vector(&features("Mozilla/5.0"), 0.0, 0.0)[2], 0.0);
    }

    #[test]
    fn score_is_zero_before_training() {
        let model = MlAnomalyModel::new(MlModelConfig { model_dir: tmp_dir(), ..Default::default() });
        assert_eq!(model.score(&features("Mozilla/5.0"), 0.1, 0.1), 0.0);
        assert_eq!(model.predict_label(&features("Mozilla/5.0"), 0.1, 0.1), 1);
    }

    #[tokio::test]
    async fn trains_after_min_samples_and_scores_afterward() {
        let dir = tmp_dir();
        let config = MlModelConfig {
            model_dir: dir.clone(),
            min_train_samples: 50,
            n_estimators: 10,
            max_samples: 64,
            ..Default::default()
        };
        let model = MlAnomalyModel::new(config);
        for i in 0..60 {
            model.record_sample(&features("Mozilla/5.0"), 0.1, (i % 3) as f64 / 10.0);
        }
        assert!(!model.is_ready());
        let trained = model.maybe_train().await;
        assert!(trained);
        assert!(model.is_ready());
        let score = model.score(&features("Mozilla/5.0"), 0.1, 0.1);
        assert!((0.0..=1.0).contains(&score));

        std::fs::remove_dir_all(dir).ok();
    }
}
