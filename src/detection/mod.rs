pub mod baseline;
pub mod behavior;
pub mod classifier;
pub mod engine;
pub mod isolation_forest;
pub mod ml_model;
pub mod scorer;

pub use baseline::BaselineModel;
pub use behavior::BehaviorAnalyzer;
pub use classifier::{AttackClassifier, AttackType};
pub use engine::{DetectionEngine, RequestContext, ScoreResult};
pub use ml_model::{MlAnomalyModel, MlModelConfig};
pub use scorer::HeuristicScorer;

/// Flat, typed feature record for a single request — replaces the
/// original's dynamic `features` dict with fixed fields.
#[derive(Debug, Clone)]
pub struct RequestFeatures {
    pub timestamp: f64,
    pub client_ip: String,
    pub method: String,
    pub path: String,
    pub query: String,
    pub user_agent: String,
    pub content_length: u64,
    pub header_count: usize,
    pub accept_language: String,
    pub has_cookie: bool,
    pub has_referer: bool,
}
