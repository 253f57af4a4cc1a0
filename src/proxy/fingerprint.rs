//! Request fingerprinting beyond the raw client IP: header order hash and
//! a composite client identifier.

use md5::Md5;
use sha2::{Digest, Sha256};

/// Composite fingerprint for a single request.
#[derive(Debug, Clone)]
pub struct RequestFingerprint {
    pub client_ip: String,
    pub header_order_hash: String,
    pub user_agent: String,
    pub accept_language: String,
    pub accept_encoding: String,
}

impl RequestFingerprint {
    /// Deterministic composite identifier for the client, combining the IP
    /// with a short hash of header-order/UA/language signals. The leading
    /// empty segment stands in for a JA3 hash (TLS fingerprinting is out of
    /// scope here), matching the field order of the scheme this guards.
    pub fn composite_id(&self) -> String {
        let joined =
            format!("|{}|{}|{}", self.header_order_hash, self.user_agent, self.accept_language);
        let digest = Sha256::digest(joined.as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        format!("{}:{}", self.client_ip, hex)
    }
}

/// Hash of header keys in received order (lowercased), matching the
/// `hashlib.md5(json.dumps(keys))` scheme of the system this crate guards.
pub fn compute_header_order_hash<'a>(header_names: impl Iterator<Item = &'a str>) -> String {
    let keys: Vec<String> = header_names.map(|n| n.to_lowercase()).collect();
    let json = serde_json::to_string(&keys).unwrap_or_else(|_| "[]".to_owned());
    let digest = Md5::digest(json.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_order_hash_is_deterministic_and_order_sensitive() {
        let a = compute_header_order_hash(["Host", "User-Agent", "Accept"].into_iter());
        let b = compute_header_order_hash(["host", "user-agent", "accept"].into_iter());
        let c = compute_header_order_hash(["Accept", "Host", "User-Agent"].into_iter());
        assert_eq!(a, b, "case should be normalized before hashing");
        assert_ne!(a, c, "order must affect the hash");
    }

    #[test]
    fn composite_id_includes_client_ip_prefix() {
        let fp = RequestFingerprint {
            client_ip: "198.51.100.4".into(),
            header_order_hash: "deadbeef".into(),
            user_agent: "Mozilla/5.0".into(),
            accept_language: "en-US".into(),
            accept_encoding: "gzip".into(),
        };
        assert!(fp.composite_id().starts_with("198.51.100.4:"));
    }
}
