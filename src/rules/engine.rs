//! YAML-defined protection rules: path/method matchers, per-IP/per-subnet
//! rate limits, and escalation ladders.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::RulesError;

/// A single escalation step's action, ordered by severity to mirror the
/// configured [`crate::config::ProtectionLevel`] ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    Monitor,
    JsChallenge,
    RateLimit,
    Block,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EscalationStep {
    pub threshold: f64,
    pub action: EscalationAction,
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawMatch {
    path: Option<String>,
    method: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawLimits {
    per_ip: Option<String>,
    per_subnet: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRule {
    name: String,
    #[serde(default)]
    #[serde(rename = "match")]
    match_: RawMatch,
    #[serde(default)]
    limits: RawLimits,
    #[serde(default)]
    escalation: Vec<EscalationStep>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RawRule>,
}

/// A loaded protection rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub match_path: Option<String>,
    pub match_method: Option<String>,
    pub per_ip: Option<String>,
    pub per_subnet: Option<String>,
    pub escalation: Vec<EscalationStep>,
    pub enabled: bool,
}

impl From<RawRule> for Rule {
    fn from(raw: RawRule) -> Self {
        Self {
            name: raw.name,
            match_path: raw.match_.path,
            match_method: raw.match_.method,
            per_ip: raw.limits.per_ip,
            per_subnet: raw.limits.per_subnet,
            escalation: raw.escalation,
            enabled: raw.enabled,
        }
    }
}

#[derive(Debug, Default)]
pub struct RulesEngine {
    rules: Vec<Rule>,
}

impl RulesEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Load every `*.yml`/`*.yaml` file from `dir`, lexicographically.
    /// A missing directory or a malformed file is logged and skipped;
    /// loading continues with whatever did parse.
    pub fn load_from_directory(&mut self, dir: &str) -> usize {
        let directory = Path::new(dir);
        if !directory.exists() {
            tracing::warn!(dir, "rules directory not found");
            return 0;
        }

        let mut paths: Vec<_> = match std::fs::read_dir(directory) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yml") | Some("yaml")))
                .collect(),
            Err(e) => {
                tracing::warn!(dir, error = %e, "failed to read rules directory");
                return 0;
            }
        };
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            match self.load_file(&path) {
                Ok(n) => loaded += n,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to load rule file, skipping"),
            }
        }
        tracing::info!(loaded, dir, "rule files loaded");
        loaded
    }

    fn load_file(&mut self, path: &Path) -> Result<usize, RulesError> {
        let contents = std::fs::read_to_string(path).map_err(|source| RulesError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let deserializer = serde_yaml::Deserializer::from_str(&contents);
        let parsed: RuleFile =
            serde_path_to_error::deserialize(deserializer).map_err(|source| RulesError::Parse {
                path: path.display().to_string(),
                detail: format!("{source} (at {})", source.path()),
            })?;
        let count = parsed.rules.len();
        self.rules.extend(parsed.rules.into_iter().map(Rule::from));
        Ok(count)
    }

    /// All enabled rules matching `path`/`method`. Path matching: exact
    /// equality, or `prefix*` matches anything starting with `prefix`
    /// (case-sensitive). Method matching is case-insensitive.
    pub fn match_request(&self, path: &str, method: &str) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|rule| rule.enabled)
            .filter(|rule| match &rule.match_path {
                Some(pattern) => Self::path_matches(path, pattern),
                None => true,
            })
            .filter(|rule| match &rule.match_method {
                Some(m) => m.eq_ignore_ascii_case(method),
                None => true,
            })
            .collect()
    }

    fn path_matches(request_path: &str, pattern: &str) -> bool {
        match pattern.strip_suffix('*') {
            Some(prefix) => request_path.starts_with(prefix),
            None => request_path == pattern,
        }
    }

    /// Given usage percentage, return the action of the highest-threshold
    /// step satisfied, defaulting to [`EscalationAction::RateLimit`].
    pub fn resolve_escalation(steps: &[EscalationStep], usage_pct: f64) -> EscalationAction {
        let mut sorted: Vec<&EscalationStep> = steps.iter().collect();
        sorted.sort_by(|a, b| a.threshold.partial_cmp(&b.threshold).unwrap());

        let mut action = EscalationAction::RateLimit;
        for step in sorted {
            if usage_pct >= step.threshold {
                action = step.action;
            }
        }
        action
    }

    /// The duration of the highest-threshold step that carries one.
    pub fn block_duration(steps: &[EscalationStep]) -> Option<Duration> {
        let mut sorted: Vec<&EscalationStep> = steps.iter().collect();
        sorted.sort_by(|a, b| b.threshold.partial_cmp(&a.threshold).unwrap());
        sorted.iter().find_map(|step| step.duration.as_deref().and_then(parse_duration))
    }
}

/// Parse `"N/second"`, `"N/minute"`, `"N/hour"`, `"N/day"` into
/// `(count, window_secs)`.
pub fn parse_rate_string(rate_str: &str) -> Option<(u64, u64)> {
    let (count_str, unit) = rate_str.split_once('/')?;
    let count: u64 = count_str.parse().ok()?;
    let window = match unit {
        "second" => 1,
        "minute" => 60,
        "hour" => 3600,
        "day" => 86_400,
        _ => return None,
    };
    Some((count, window))
}

/// Parse `"Ns"`, `"Nm"`, `"Nh"`, `"Nd"`, or a bare integer (seconds).
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (digits, unit) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&s[..s.len() - 1], c.to_ascii_lowercase()),
        _ => (s, 's'),
    };
    let n: u64 = digits.parse().ok()?;
    let secs = match unit {
        's' => n,
        'm' => n * 60,
        'h' => n * 3600,
        'd' => n * 86_400,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
rules:
  - name: "Login Protection"
    match: { path: "/api/login*", method: "POST" }
    limits: { per_ip: "5/minute", per_subnet: "50/minute" }
    escalation:
      - { threshold: 80, action: js_challenge }
      - { threshold: 95, action: block, duration: "1h" }
    enabled: true
"#
    }

    #[test]
    fn parses_rate_strings() {
        assert_eq!(parse_rate_string("5/minute"), Some((5, 60)));
        assert_eq!(parse_rate_string("100/hour"), Some((100, 3600)));
        assert_eq!(parse_rate_string("nonsense"), None);
    }

    #[test]
    fn parses_duration_strings() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("2d"), Some(Duration::from_secs(172_800)));
    }

    #[test]
    fn prefix_match_is_case_sensitive() {
        assert!(RulesEngine::path_matches("/api/login/foo", "/api/login*"));
        assert!(RulesEngine::path_matches("/api/login", "/api/login*"));
        assert!(!RulesEngine::path_matches("/api/LOGIN", "/api/login*"));
    }

    #[test]
    fn load_from_yaml_str_and_match() {
        let dir = tempdir_with_file("rule.yml", sample_yaml());
        let mut engine = RulesEngine::new();
        let loaded = engine.load_from_directory(dir.to_str().unwrap());
        assert_eq!(loaded, 1);

        let matched = engine.match_request("/api/login", "POST");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "Login Protection");

        let matched_wrong_method = engine.match_request("/api/login", "GET");
        assert!(matched_wrong_method.is_empty());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn escalation_resolves_highest_satisfied_threshold() {
        let steps = vec![
            EscalationStep { threshold: 80.0, action: EscalationAction::JsChallenge, duration: None },
            EscalationStep {
                threshold: 95.0,
                action: EscalationAction::Block,
                duration: Some("1h".into()),
            },
        ];
        assert_eq!(RulesEngine::resolve_escalation(&steps, 50.0), EscalationAction::RateLimit);
        assert_eq!(RulesEngine::resolve_escalation(&steps, 85.0), EscalationAction::JsChallenge);
        assert_eq!(RulesEngine::resolve_escalation(&steps, 99.0), EscalationAction::Block);
        assert_eq!(RulesEngine::block_duration(&steps), Some(Duration::from_secs(3600)));
    }

    fn tempdir_with_file(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("sentinel-rules-test-{}", rand_suffix()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), contents).unwrap();
        dir
    }

    fn rand_suffix() -> String {
        use rand::Rng;
        let mut rng = rand::rng();
        (0..8).map(|_| std::char::from_digit(rng.random_range(0..16), 16).unwrap()).collect()
    }
}
