//! Heuristic attack taxonomy from features + rate + behavior context.

use serde::Serialize;

use super::RequestFeatures;

const LOGIN_PATHS: &[&str] = &["/login", "/auth", "/api/login", "/api/auth", "/signin", "/api/signin"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackType {
    HttpFlood,
    Slowloris,
    CredentialStuffing,
    ApiAbuse,
    Scraping,
}

#[derive(Default)]
pub struct AttackClassifier;

impl AttackClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Emit at most one label; first matching rule wins.
    pub fn classify(
        &self,
        features: &RequestFeatures,
        rate_count: u64,
        rate_limit: u64,
        behavior_score: f64,
    ) -> Option<AttackType> {
        let r = if rate_limit > 0 {
            rate_count as f64 / rate_limit as f64
        } else {
            0.0
        };

        if r > 0.6 && (features.user_agent.is_empty() || behavior_score > 0.5) {
            return Some(AttackType::HttpFlood);
        }
        if r > 0.85 {
            return Some(AttackType::HttpFlood);
        }
        if features.content_length == 0 && features.method == "POST" && behavior_score > 0.3 {
            return Some(AttackType::Slowloris);
        }
        let path_lower = features.path.to_lowercase();
        if LOGIN_PATHS.contains(&path_lower.as_str()) && features.method == "POST" && r > 0.3 {
            return Some(AttackType::CredentialStuffing);
        }
        if features.path.contains("/api/")
            && matches!(features.method.as_str(), "POST" | "PUT" | "DELETE")
            && (r > 0.5 || behavior_score > 0.6)
        {
            return Some(AttackType::ApiAbuse);
        }
        if features.method == "GET" && behavior_score > 0.6 && r > 0.4 {
            return Some(AttackType::Scraping);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(method: &str, path: &str, ua: &str, content_length: u64) -> RequestFeatures {
        RequestFeatures {
            timestamp: 0.0,
            client_ip: "198.51.100.1".into(),
            method: method.into(),
            path: path.into(),
            query: String::new(),
            user_agent: ua.into(),
            content_length,
            header_count: 5,
            accept_language: "en".into(),
            has_cookie: false,
            has_referer: false,
        }
    }

    #[test]
    fn high_rate_no_ua_is_http_flood() {
        let c = AttackClassifier::new();
        let f = features("GET", "/", "", 0);
        assert_eq!(c.classify(&f, 70, 100, 0.1), Some(AttackType::HttpFlood));
    }

    #[test]
    fn very_high_rate_alone_is_http_flood() {
        let c = AttackClassifier::new();
        let f = features("GET", "/", "Mozilla/5.0", 0);
        assert_eq!(c.classify(&f, 90, 100, 0.0), Some(AttackType::HttpFlood));
    }

    #[test]
    fn empty_post_body_with_behavior_is_slowloris() {
        let c = AttackClassifier::new();
        let f = features("POST", "/", "Mozilla/5.0", 0);
        assert_eq!(c.classify(&f, 10, 100, 0.4), Some(AttackType::Slowloris));
    }

    #[test]
    fn post_to_login_path_is_credential_stuffing() {
        let c = AttackClassifier::new();
        let f = features("POST", "/api/login", "Mozilla/5.0", 20);
        assert_eq!(c.classify(&f, 40, 100, 0.0), Some(AttackType::CredentialStuffing));
    }

    #[test]
    fn login_path_match_is_case_insensitive() {
        let c = AttackClassifier::new();
        let f = features("POST", "/API/LOGIN".to_lowercase().as_str(), "Mozilla/5.0", 20);
        assert_eq!(c.classify(&f, 40, 100, 0.0), Some(AttackType::CredentialStuffing));
    }

    #[test]
    fn api_mutation_with_bot_behavior_is_api_abuse() {
        let c = AttackClassifier::new();
        let f = features("POST", "/api/widgets", "Mozilla/5.0", 20);
        assert_eq!(c.classify(&f, 10, 100, 0.7), Some(AttackType::ApiAbuse));
    }

    #[test]
    fn bot_like_get_is_scraping() {
        let c = AttackClassifier::new();
        let f = features("GET", "/products", "python-requests/2.31", 0);
        assert_eq!(c.classify(&f, 45, 100, 0.7), Some(AttackType::Scraping));
    }

    #[test]
    fn benign_traffic_is_unclassified() {
        let c = AttackClassifier::new();
        let f = features("GET", "/", "Mozilla/5.0", 0);
        assert_eq!(c.classify(&f, 5, 100, 0.1), None);
    }

    #[test]
    fn classification_is_deterministic() {
        let c = AttackClassifier::new();
        let f = features("GET", "/", "", 0);
        let a = c.classify(&f, 70, 100, 0.1);
        let b = c.classify(&f, 70, 100, 0.1);
        assert_eq!(a, b);
    }
}
