//! Per-subsystem error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),
}

#[derive(Debug, Error)]
pub enum KvError {
    #[error("backing store unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("rules directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("failed to read rule file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse rule file {path}: {detail}")]
    Parse { path: String, detail: String },
}

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("malformed challenge token")]
    Malformed,
    #[error("challenge token ip mismatch")]
    IpMismatch,
    #[error("challenge token expired")]
    Expired,
    #[error("challenge signature invalid")]
    BadSignature,
    #[error("proof-of-work not satisfied")]
    PowUnsatisfied,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}
