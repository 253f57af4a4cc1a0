//! The admission state machine: one async function implementing the nine
//! normative pipeline steps in order, because each step is
//! sequentially data-dependent on the last (the rate count feeds scoring,
//! the score feeds classification and mitigation).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};

use crate::config::ProtectionLevel;
use crate::detection::{AttackClassifier, AttackType, RequestContext, RequestFeatures};
use crate::errors::ProxyError;
use crate::mitigation::challenge::CHALLENGE_COOKIE;
use crate::rules::{EscalationAction, RulesEngine, parse_rate_string};
use crate::state::{ActionCounter, ServerContext, TrafficEvent};

use super::fingerprint::{RequestFingerprint, compute_header_order_hash};

const RESERVED_PREFIXES: &[&str] = &["/api/", "/ws/"];
const RESERVED_EXACT: &[&str] = &["/openapi.json"];
const HOP_BY_HOP_RESPONSE_HEADERS: &[&str] = &["transfer-encoding", "connection", "keep-alive"];
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Axum handler mounted as the catch-all fallback: every request not
/// matched by the admin/status routes flows through here.
pub async fn handle_request(
    State(ctx): State<Arc<ServerContext>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let path = request.uri().path().to_owned();

    // Step 1: management/dashboard paths never reach the proxy.
    if RESERVED_PREFIXES.iter().any(|p| path.starts_with(p)) || RESERVED_EXACT.contains(&path.as_str()) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let method = request.method().clone();
    let headers = request.headers().clone();
    let query = request.uri().query().unwrap_or("").to_owned();

    // Step 2: client IP.
    let client_ip = extract_client_ip(&headers, peer);
    ctx.traffic.record_request(&client_ip);

    // Step 3: blocklist.
    if ctx.blocker.is_blocked(&client_ip) {
        tracing::warn!(ip = %client_ip, path = %path, "blocked ip denied");
        record_event(&ctx, &client_ip, "blocked", &path, method.as_str(), None, None, None, Some(ActionCounter::Blocked));
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }

    // Step 4: per-rule rate limits.
    for rule in ctx.rules.match_request(&path, method.as_str()) {
        let Some(per_ip) = &rule.per_ip else { continue };
        let Some((limit, window)) = parse_rate_string(per_ip) else { continue };

        let (allowed, count) = ctx.rate_limiter.check_rule_limit(&client_ip, &rule.name, limit, window);
        if allowed {
            continue;
        }

        let usage_pct = if limit > 0 { count as f64 / limit as f64 * 100.0 } else { 0.0 };
        tracing::info!(ip = %client_ip, rule = %rule.name, count, limit, "rule rate limit exceeded");

        match RulesEngine::resolve_escalation(&rule.escalation, usage_pct) {
            EscalationAction::Block => {
                let ttl = RulesEngine::block_duration(&rule.escalation);
                ctx.blocker.block(&client_ip, &format!("rule escalation: {}", rule.name), ttl);
                tracing::warn!(ip = %client_ip, rule = %rule.name, "blocked via rule escalation");
                record_event(
                    &ctx, &client_ip, "blocked", &path, method.as_str(), None, None,
                    Some(rule.name.clone()), Some(ActionCounter::Blocked),
                );
                return (StatusCode::FORBIDDEN, "Forbidden").into_response();
            }
            EscalationAction::JsChallenge => {
                let cookie = extract_cookie(&headers, CHALLENGE_COOKIE);
                if let Some(html) = ctx.challenge.maybe_challenge(cookie.as_deref(), &client_ip) {
                    record_event(
                        &ctx, &client_ip, "challenged", &path, method.as_str(), None, None,
                        Some(rule.name.clone()), Some(ActionCounter::Challenged),
                    );
                    return challenge_response(html);
                }
                // Cookie already verifies: pass through this rule.
            }
            EscalationAction::Monitor | EscalationAction::RateLimit => {
                record_event(
                    &ctx, &client_ip, "rate_limited", &path, method.as_str(), None, None,
                    Some(rule.name.clone()), Some(ActionCounter::RateLimited),
                );
                return (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
            }
        }
    }

    // Step 5: global rate limit.
    let (rate_allowed, rate_count) = ctx.rate_limiter.allow_with_count(&client_ip);
    if !rate_allowed {
        tracing::info!(ip = %client_ip, rate_count, "global rate limit exceeded");
        record_event(&ctx, &client_ip, "rate_limited", &path, method.as_str(), None, None, None, Some(ActionCounter::RateLimited));
        return (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
    }

    // Step 6: detection scoring.
    let features = build_features(&headers, &client_ip, method.as_str(), &path, &query);
    let header_order_hash = compute_header_order_hash(headers.keys().map(|k| k.as_str()));
    let referer = header_str(&headers, "referer");
    let cookie = header_str(&headers, "cookie");
    let score_ctx = RequestContext {
        features: &features,
        header_order_hash: &header_order_hash,
        referer: non_empty(referer),
        cookie: non_empty(cookie),
    };
    let result = ctx.detection.score(&score_ctx, rate_count, ctx.config.rate_limit_per_ip);
    let threat = result.threat;

    // Step 7: graduated mitigation.
    if threat >= ctx.config.anomaly_threshold {
        let classifier = AttackClassifier::new();
        let attack_type =
            classifier.classify(&features, rate_count, ctx.config.rate_limit_per_ip, result.behavior_score);

        let effective_level =
            if ctx.config.under_attack_mode { ProtectionLevel::Block } else { ctx.config.protection_level };

        let fingerprint = RequestFingerprint {
            client_ip: client_ip.clone(),
            header_order_hash: header_order_hash.clone(),
            user_agent: features.user_agent.clone(),
            accept_language: features.accept_language.clone(),
            accept_encoding: header_str(&headers, "accept-encoding").to_owned(),
        };

        tracing::info!(
            ip = %client_ip, path = %path, score = threat, attack_type = ?attack_type,
            level = ?effective_level, fingerprint = %fingerprint.composite_id(),
            "threat score above anomaly threshold"
        );

        match effective_level {
            ProtectionLevel::Monitor => {
                record_event(
                    &ctx, &client_ip, "monitored", &path, method.as_str(), Some(threat),
                    attack_type.map(attack_type_name), None, None,
                );
            }
            ProtectionLevel::JsChallenge => {
                let cookie = extract_cookie(&headers, CHALLENGE_COOKIE);
                if let Some(html) = ctx.challenge.maybe_challenge(cookie.as_deref(), &client_ip) {
                    record_event(
                        &ctx, &client_ip, "challenged", &path, method.as_str(), Some(threat),
                        attack_type.map(attack_type_name), None, Some(ActionCounter::Challenged),
                    );
                    return challenge_response(html);
                }
            }
            ProtectionLevel::RateLimit => {
                record_event(
                    &ctx, &client_ip, "rate_limited", &path, method.as_str(), Some(threat),
                    attack_type.map(attack_type_name), None, Some(ActionCounter::RateLimited),
                );
                return (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
            }
            ProtectionLevel::Block | ProtectionLevel::Blackhole => {
                ctx.blocker.block(&client_ip, &format!("threat score {threat:.2}"), None);
                tracing::warn!(
                    ip = %client_ip, score = threat, attack_type = ?attack_type,
                    fingerprint = %fingerprint.composite_id(), "auto-blocked"
                );
                record_event(
                    &ctx, &client_ip, "auto_blocked", &path, method.as_str(), Some(threat),
                    attack_type.map(attack_type_name), None, Some(ActionCounter::Blocked),
                );
                return (StatusCode::FORBIDDEN, "Forbidden").into_response();
            }
        }
    }

    // Step 8: forward upstream.
    let body_bytes = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::BAD_REQUEST, "Request body too large").into_response(),
    };

    let response =
        forward_upstream(&ctx, &method, &path, &query, &headers, body_bytes, &client_ip, threat).await;

    match response {
        Ok(response) => {
            tracing::debug!(ip = %client_ip, path = %path, score = threat, status = %response.status(), "forwarded upstream");
            record_event(&ctx, &client_ip, "forwarded", &path, method.as_str(), Some(threat), None, None, Some(ActionCounter::Forwarded));
            response
        }
        Err(e) => {
            tracing::error!(ip = %client_ip, path = %path, error = %e, "upstream request failed");
            (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
        }
    }
}

async fn forward_upstream(
    ctx: &ServerContext,
    method: &axum::http::Method,
    path: &str,
    query: &str,
    headers: &HeaderMap,
    body: Bytes,
    client_ip: &str,
    threat: f64,
) -> Result<Response, ProxyError> {
    let base = ctx.config.target_url.trim_end_matches('/');
    let url = if query.is_empty() { format!("{base}{path}") } else { format!("{base}{path}?{query}") };

    let mut outbound = headers.clone();
    outbound.remove("host");
    outbound.insert("x-forwarded-for", HeaderValue::from_str(client_ip).unwrap_or(HeaderValue::from_static("")));
    outbound.insert(
        "x-sentinel-score",
        HeaderValue::from_str(&format!("{threat:.4}")).unwrap_or(HeaderValue::from_static("0.0000")),
    );

    let start = std::time::Instant::now();
    let upstream_response =
        ctx.http_client.request(method.clone(), url).headers(outbound).body(body).send().await?;
    crate::utils::log_if_slow(start, std::time::Duration::from_secs(2), "upstream forward");

    let status = StatusCode::from_u16(upstream_response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream_response.headers() {
        if HOP_BY_HOP_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        response_headers.insert(name.clone(), value.clone());
    }
    let response_body = upstream_response.bytes().await?;

    let mut response = (status, response_body).into_response();
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn build_features(headers: &HeaderMap, client_ip: &str, method: &str, path: &str, query: &str) -> RequestFeatures {
    RequestFeatures {
        timestamp: crate::kv::now_secs(),
        client_ip: client_ip.to_owned(),
        method: method.to_owned(),
        path: path.to_owned(),
        query: query.to_owned(),
        user_agent: header_str(headers, "user-agent").to_owned(),
        content_length: header_str(headers, "content-length").parse().unwrap_or(0),
        header_count: headers.len(),
        accept_language: header_str(headers, "accept-language").to_owned(),
        has_cookie: headers.contains_key("cookie"),
        has_referer: headers.contains_key("referer"),
    }
}

fn extract_client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(xff) = header_str_opt(headers, "x-forwarded-for") {
        if let Some(first) = xff.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_owned();
            }
        }
    }
    peer.ip().to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

fn header_str_opt<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() { None } else { Some(s) }
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = header_str_opt(headers, "cookie")?;
    cookie::Cookie::split_parse(raw)
        .filter_map(|c| c.ok())
        .find(|c| c.name() == name)
        .map(|c| c.value().to_owned())
}

fn attack_type_name(attack_type: AttackType) -> String {
    match attack_type {
        AttackType::HttpFlood => "http_flood",
        AttackType::Slowloris => "slowloris",
        AttackType::CredentialStuffing => "credential_stuffing",
        AttackType::ApiAbuse => "api_abuse",
        AttackType::Scraping => "scraping",
    }
    .to_owned()
}

fn challenge_response(html: String) -> Response {
    let mut response = (StatusCode::SERVICE_UNAVAILABLE, Html(html)).into_response();
    response.headers_mut().insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'; script-src 'unsafe-inline'; style-src 'unsafe-inline'"),
    );
    response
}

#[allow(clippy::too_many_arguments)]
fn record_event(
    ctx: &ServerContext,
    ip: &str,
    action: &str,
    path: &str,
    method: &str,
    score: Option<f64>,
    attack_type: Option<String>,
    rule: Option<String>,
    counter: Option<ActionCounter>,
) {
    ctx.traffic.record_event(
        TrafficEvent {
            time: crate::kv::now_secs(),
            ip: ip.to_owned(),
            action: action.to_owned(),
            path: path.to_owned(),
            method: method.to_owned(),
            score,
            attack_type,
            rule,
        },
        counter,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderName;

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.insert(HeaderName::from_bytes(k.as_bytes()).unwrap(), HeaderValue::from_str(v).unwrap());
        }
        headers
    }

    #[test]
    fn client_ip_prefers_forwarded_for_first_token() {
        let headers = headers_with(&[("x-forwarded-for", "203.0.113.1, 10.0.0.1")]);
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(extract_client_ip(&headers, peer), "203.0.113.1");
    }

    #[test]
    fn client_ip_falls_back_to_peer() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "198.51.100.9:9000".parse().unwrap();
        assert_eq!(extract_client_ip(&headers, peer), "198.51.100.9");
    }

    #[test]
    fn reserved_prefixes_are_recognized() {
        assert!(RESERVED_PREFIXES.iter().any(|p| "/api/status".starts_with(p)));
        assert!(RESERVED_PREFIXES.iter().any(|p| "/ws/live".starts_with(p)));
        assert!(RESERVED_EXACT.contains(&"/openapi.json"));
        assert!(!RESERVED_PREFIXES.iter().any(|p| "/apiary".starts_with(p)));
    }

    #[test]
    fn extracts_named_cookie_from_header() {
        let headers = headers_with(&[("cookie", "a=1; sentinel_challenge=abc:def; other=2")]);
        assert_eq!(extract_cookie(&headers, "sentinel_challenge"), Some("abc:def".to_owned()));
    }

    #[test]
    fn builds_features_from_headers() {
        let headers = headers_with(&[
            ("user-agent", "Mozilla/5.0"),
            ("content-length", "42"),
            ("accept-language", "en-US"),
        ]);
        let features = build_features(&headers, "203.0.113.5", "POST", "/login", "");
        assert_eq!(features.user_agent, "Mozilla/5.0");
        assert_eq!(features.content_length, 42);
        assert_eq!(features.header_count, 3);
    }
}
