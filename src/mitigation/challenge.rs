//! HMAC-signed, proof-of-work-gated browser challenge.
//!
//! Token issued to the client: `ip:nonce:ts:hmac_sha256(secret, ip:nonce:ts)`.
//! Token returned by the client (as a cookie): the issued token with a
//! `:pow_nonce` suffix, where `sha256(full_token)` hex begins with `"00"`.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::errors::ChallengeError;

pub const CHALLENGE_COOKIE: &str = "sentinel_challenge";
const CHALLENGE_TTL_SECS: u64 = 3600;
const POW_PREFIX: &str = "00";

type HmacSha256 = Hmac<Sha256>;

pub struct ChallengeManager {
    secret: Vec<u8>,
}

impl ChallengeManager {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    /// `Some(html)` to serve a fresh 503 challenge page, `None` to pass
    /// the request through (the supplied cookie already verifies).
    pub fn maybe_challenge(&self, cookie: Option<&str>, client_ip: &str) -> Option<String> {
        if let Some(cookie) = cookie
            && self.verify_token(cookie, client_ip).is_ok()
        {
            return None;
        }
        let token = self.generate_challenge(client_ip);
        Some(render_challenge_page(&token))
    }

    fn generate_challenge(&self, client_ip: &str) -> String {
        let nonce = random_hex(16);
        let ts = crate::kv::now_secs() as u64;
        let data = format!("{client_ip}:{nonce}:{ts}");
        let sig = self.hmac_hex(&data);
        format!("{data}:{sig}")
    }

    fn hmac_hex(&self, data: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(data.as_bytes());
        hex_encode(&mac.finalize().into_bytes())
    }

    /// Verify a solved challenge token: `ip:nonce:ts:sig:pow_nonce`.
    pub fn verify_token(&self, token: &str, client_ip: &str) -> Result<(), ChallengeError> {
        let parts: Vec<&str> = token.split(':').collect();
        let [ip, nonce, ts, sig, pow_nonce] = parts.as_slice() else {
            return Err(ChallengeError::Malformed);
        };

        if *ip != client_ip {
            return Err(ChallengeError::IpMismatch);
        }

        let ts_val: u64 = ts.parse().map_err(|_| ChallengeError::Malformed)?;
        let now = crate::kv::now_secs() as u64;
        if now.saturating_sub(ts_val) > CHALLENGE_TTL_SECS {
            return Err(ChallengeError::Expired);
        }

        let original = format!("{ip}:{nonce}:{ts}");
        let expected = self.hmac_hex(&original);
        if !constant_time_eq(sig.as_bytes(), expected.as_bytes()) {
            return Err(ChallengeError::BadSignature);
        }

        let full_token = format!("{original}:{sig}");
        let pow_input = format!("{full_token}:{pow_nonce}");
        let pow_hash = hex_encode(&Sha256::digest(pow_input.as_bytes()));
        if pow_hash.starts_with(POW_PREFIX) {
            Ok(())
        } else {
            Err(ChallengeError::PowUnsatisfied)
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn random_hex(len_bytes: usize) -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..len_bytes).map(|_| format!("{:02x}", rng.random::<u8>())).collect()
}

fn render_challenge_page(token: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Checking your browser</title>
<style>
body {{ background:#0d1117; color:#c9d1d9; font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',sans-serif;
       display:flex; align-items:center; justify-content:center; height:100vh; margin:0; }}
.container {{ text-align:center; }}
.spinner {{ border:4px solid #30363d; border-top:4px solid #58a6ff; border-radius:50%;
            width:48px; height:48px; animation:spin 1s linear infinite; margin:20px auto; }}
@keyframes spin {{ 100% {{ transform:rotate(360deg); }} }}
</style>
</head>
<body>
<div class="container">
<h1>Verifying your browser</h1>
<div class="spinner"></div>
<p id="status">Solving challenge…</p>
</div>
<script>
(async function() {{
  const token = "{token}";
  let nonce = 0;
  while (true) {{
    const data = token + ":" + nonce;
    const hash = await crypto.subtle.digest("SHA-256", new TextEncoder().encode(data));
    const hex = Array.from(new Uint8Array(hash)).map(b => b.toString(16).padStart(2, '0')).join('');
    if (hex.startsWith("{prefix}")) {{
      document.cookie = "{cookie}=" + token + ":" + nonce + "; path=/; max-age={ttl}; SameSite=Lax";
      document.getElementById("status").textContent = "Verified, reloading…";
      setTimeout(() => location.reload(), 300);
      return;
    }}
    nonce++;
    if (nonce % 10000 === 0) {{ await new Promise(r => setTimeout(r, 0)); }}
  }}
}})();
</script>
</body>
</html>"#,
        token = token,
        prefix = POW_PREFIX,
        cookie = CHALLENGE_COOKIE,
        ttl = CHALLENGE_TTL_SECS,
    )
}
