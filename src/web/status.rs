//! Operability endpoints the admission pipeline exposes about itself:
//! liveness, current protection posture, and traffic counters. Not a
//! dashboard — just enough introspection to run this thing in production.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::{ServerContext, TrafficSnapshot};

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
pub struct StatusResponse {
    protection_level: crate::config::ProtectionLevel,
    under_attack_mode: bool,
    baseline_ready: bool,
    ml_ready: bool,
    uptime_secs: u64,
    rule_count: usize,
    commit: &'static str,
}

pub async fn status(State(ctx): State<Arc<ServerContext>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        protection_level: ctx.config.protection_level,
        under_attack_mode: ctx.config.under_attack_mode,
        baseline_ready: ctx.detection.is_baseline_ready(),
        ml_ready: ctx.detection.is_ml_ready(),
        uptime_secs: ctx.uptime_secs(),
        rule_count: ctx.rules.rules().len(),
        commit: env!("GIT_COMMIT_SHORT"),
    })
}

pub async fn metrics(State(ctx): State<Arc<ServerContext>>) -> Json<TrafficSnapshot> {
    Json(ctx.traffic.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(body) = health().await;
        assert_eq!(body.status, "ok");
    }
}
