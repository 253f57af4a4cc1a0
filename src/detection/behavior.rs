//! Per-IP session aggregation and bot-likelihood scoring.

use std::collections::{HashMap, HashSet, VecDeque};

const SESSION_TTL_SECS: f64 = 600.0;
const MAX_TRACKED: usize = 50_000;
const CLEANUP_INTERVAL_SECS: f64 = 60.0;

#[derive(Default)]
pub struct IpSession {
    pub first_seen: f64,
    pub last_seen: f64,
    pub request_count: u64,
    inter_arrival_times: VecDeque<f64>,
    paths_visited: VecDeque<String>,
    methods_used: HashSet<String>,
    user_agents: HashSet<String>,
    accept_languages: HashSet<String>,
    header_order_hashes: HashSet<String>,
    has_referer: bool,
    has_cookies: bool,
}

#[allow(clippy::too_many_arguments)]
impl IpSession {
    fn record(
        &mut self,
        now: f64,
        path: &str,
        method: &str,
        user_agent: &str,
        accept_language: &str,
        referer: Option<&str>,
        cookie: Option<&str>,
        header_order_hash: &str,
    ) {
        if self.first_seen == 0.0 {
            self.first_seen = now;
        }
        if self.last_seen > 0.0 {
            self.inter_arrival_times.push_back(now - self.last_seen);
            if self.inter_arrival_times.len() > 200 {
                self.inter_arrival_times.pop_front();
            }
        }
        self.last_seen = now;
        self.request_count += 1;

        self.paths_visited.push_back(path.to_owned());
        if self.paths_visited.len() > 100 {
            self.paths_visited.pop_front();
        }
        self.methods_used.insert(method.to_owned());
        if !user_agent.is_empty() {
            self.user_agents.insert(user_agent.to_owned());
        }
        if !accept_language.is_empty() {
            self.accept_languages.insert(accept_language.to_owned());
        }
        self.header_order_hashes.insert(header_order_hash.to_owned());
        if referer.is_some() {
            self.has_referer = true;
        }
        if cookie.is_some() {
            self.has_cookies = true;
        }
    }
}

pub struct BehaviorAnalyzer {
    sessions: HashMap<String, IpSession>,
    last_cleanup: f64,
}

impl Default for BehaviorAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::too_many_arguments)]
impl BehaviorAnalyzer {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            last_cleanup: 0.0,
        }
    }

    /// Record the request against the IP's session and return its current
    /// bot-likelihood score in `[0, 1]`.
    pub fn record_and_score(
        &mut self,
        now: f64,
        client_ip: &str,
        path: &str,
        method: &str,
        user_agent: &str,
        accept_language: &str,
        referer: Option<&str>,
        cookie: Option<&str>,
        header_order_hash: &str,
    ) -> f64 {
        self.maybe_cleanup(now);

        if !self.sessions.contains_key(client_ip) && self.sessions.len() >= MAX_TRACKED {
            if let Some(oldest_ip) = self
                .sessions
                .iter()
                .min_by(|a, b| a.1.last_seen.partial_cmp(&b.1.last_seen).unwrap())
                .map(|(ip, _)| ip.clone())
            {
                self.sessions.remove(&oldest_ip);
            }
        }

        let session = self.sessions.entry(client_ip.to_owned()).or_default();
        session.record(now, path, method, user_agent, accept_language, referer, cookie, header_order_hash);
        Self::compute_score(session)
    }

    pub fn session(&self, client_ip: &str) -> Option<&IpSession> {
        self.sessions.get(client_ip)
    }

    fn compute_score(s: &IpSession) -> f64 {
        if s.request_count < 3 {
            return 0.0;
        }

        let timing = Self::timing_regularity(s);
        let path_div = Self::path_diversity(s);
        let header = Self::header_consistency(s);
        let rate = Self::rate_score(s);
        let browser = Self::browser_indicators(s);

        let composite =
            timing * 0.30 + (1.0 - path_div) * 0.15 + header * 0.15 + rate * 0.20 + browser * 0.20;
        composite.clamp(0.0, 1.0)
    }

    fn timing_regularity(s: &IpSession) -> f64 {
        let intervals = &s.inter_arrival_times;
        if intervals.len() < 5 {
            return 0.0;
        }
        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        if mean == 0.0 {
            return 1.0;
        }
        let variance = intervals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
        let cv = variance.sqrt() / mean;
        if cv < 0.05 {
            1.0
        } else if cv < 0.15 {
            0.7
        } else if cv < 0.3 {
            0.3
        } else {
            0.0
        }
    }

    fn path_diversity(s: &IpSession) -> f64 {
        if s.paths_visited.is_empty() {
            return 0.0;
        }
        let unique: HashSet<&String> = s.paths_visited.iter().collect();
        unique.len() as f64 / s.paths_visited.len() as f64
    }

    fn header_consistency(s: &IpSession) -> f64 {
        let mut score: f64 = 0.0;
        if s.user_agents.len() > 1 {
            score += 0.5;
        }
        if s.accept_languages.len() > 2 {
            score += 0.3;
        }
        if s.header_order_hashes.len() > 2 {
            score += 0.2;
        }
        score.min(1.0)
    }

    fn rate_score(s: &IpSession) -> f64 {
        let duration = s.last_seen - s.first_seen;
        if duration < 1.0 {
            return 0.0;
        }
        let rps = s.request_count as f64 / duration;
        if rps > 20.0 {
            1.0
        } else if rps > 10.0 {
            0.7
        } else if rps > 5.0 {
            0.3
        } else {
            0.0
        }
    }

    fn browser_indicators(s: &IpSession) -> f64 {
        let mut score: f64 = 0.0;
        if !s.has_referer && s.request_count > 5 {
            score += 0.4;
        }
        if !s.has_cookies && s.request_count > 3 {
            score += 0.3;
        }
        if s.accept_languages.is_empty() {
            score += 0.3;
        }
        score.min(1.0)
    }

    fn maybe_cleanup(&mut self, now: f64) {
        if now - self.last_cleanup < CLEANUP_INTERVAL_SECS {
            return;
        }
        self.last_cleanup = now;
        let cutoff = now - SESSION_TTL_SECS;
        self.sessions.retain(|_, s| s.last_seen >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_zero_below_three_requests() {
        let mut b = BehaviorAnalyzer::new();
        let s1 = b.record_and_score(0.0, "1.1.1.1", "/", "GET", "UA", "en", None, None, "h");
        let s2 = b.record_and_score(1.0, "1.1.1.1", "/", "GET", "UA", "en", None, None, "h");
        assert_eq!(s1, 0.0);
        assert_eq!(s2, 0.0);
    }

    #[test]
    fn score_is_bounded() {
        let mut b = BehaviorAnalyzer::new();
        let mut last = 0.0;
        for i in 0..20 {
            last = b.record_and_score(i as f64, "2.2.2.2", "/", "GET", "", "", None, None, "h");
        }
        assert!((0.0..=1.0).contains(&last));
    }

    #[test]
    fn regular_timing_and_no_browser_headers_scores_high() {
        let mut b = BehaviorAnalyzer::new();
        let mut last = 0.0;
        for i in 0..30 {
            last = b.record_and_score(i as f64, "3.3.3.3", "/api/data", "GET", "", "", None, None, "h");
        }
        assert!(last > 0.6, "expected bot-like score, got {last}");
    }

    #[test]
    fn diverse_human_like_traffic_scores_low() {
        let mut b = BehaviorAnalyzer::new();
        let paths = ["/", "/about", "/contact", "/blog", "/faq"];
        let mut last = 0.0;
        for (i, p) in paths.iter().enumerate() {
            last = b.record_and_score(
                i as f64 * 3.3,
                "4.4.4.4",
                p,
                "GET",
                "Mozilla/5.0 Chrome/120",
                "en-US",
                Some("https://example.com/"),
                Some("session=x"),
                "h",
            );
        }
        assert!(last < 0.3, "expected human-like score, got {last}");
    }

    #[test]
    fn request_count_matches_total_records() {
        let mut b = BehaviorAnalyzer::new();
        for i in 0..7 {
            b.record_and_score(i as f64, "5.5.5.5", "/", "GET", "UA", "en", None, None, "h");
        }
        assert_eq!(b.session("5.5.5.5").unwrap().request_count, 7);
    }
}
