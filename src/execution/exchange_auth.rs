use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Exchange API request signing.
///
/// Every private request carries:
///   - `FTX-KEY`: the API key
///   - `FTX-TS`: wall-clock milliseconds since epoch at signing time
///   - `FTX-SIGN`: hex HMAC-SHA256 of `ts + METHOD + path + body` under the API secret
///   - `FTX-SUBACCOUNT`: optional account routing
///
/// The exchange rejects stale timestamps, so headers are produced right before
/// each attempt and never reused across retries.
#[derive(Clone)]
pub struct ExchangeAuth {
    api_key: String,
    api_secret: String,
    subaccount: Option<String>,
}

/// Headers for one signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeaders {
    pub api_key: String,
    pub timestamp: String,
    pub signature: String,
    pub subaccount: Option<String>,
}

impl ExchangeAuth {
    pub fn new(api_key: &str, api_secret: &str, subaccount: Option<String>) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            subaccount,
        }
    }

    /// Signature for a request; pure in its inputs.
    pub fn sign(&self, timestamp_ms: i64, method: &str, path: &str, body: &str) -> String {
        let payload = format!("{}{}{}{}", timestamp_ms, method.to_uppercase(), path, body);
        hmac_sha256_hex(self.api_secret.as_bytes(), payload.as_bytes())
    }

    /// Sign with the current wall-clock time.
    pub fn headers(&self, method: &str, path: &str, body: &str) -> AuthHeaders {
        self.headers_at(Utc::now().timestamp_millis(), method, path, body)
    }

    pub fn headers_at(&self, timestamp_ms: i64, method: &str, path: &str, body: &str) -> AuthHeaders {
        AuthHeaders {
            api_key: self.api_key.clone(),
            timestamp: timestamp_ms.to_string(),
            signature: self.sign(timestamp_ms, method, path, body),
            subaccount: self.subaccount.clone(),
        }
    }
}

impl std::fmt::Debug for ExchangeAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeAuth")
            .field("api_key", &self.api_key)
            .field("subaccount", &self.subaccount)
            .finish_non_exhaustive()
    }
}

impl AuthHeaders {
    /// Apply auth headers to a reqwest RequestBuilder.
    pub fn apply(self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut r = req
            .header("FTX-KEY", &self.api_key)
            .header("FTX-TS", &self.timestamp)
            .header("FTX-SIGN", &self.signature);

        if let Some(sub) = &self.subaccount {
            r = r.header("FTX-SUBACCOUNT", sub);
        }

        r
    }
}

fn hmac_sha256_hex(key: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_known_vector() {
        assert_eq!(
            hmac_sha256_hex(b"key", b"The quick brown fox jumps over the lazy dog"),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_sign_covers_all_parts() {
        let auth = ExchangeAuth::new("k", "secret", None);
        let body = r#"{"market":"BTC-PERP","side":"buy","size":0.01,"type":"market","price":0}"#;
        let sig = auth.sign(1_588_591_511_721, "POST", "/api/orders", body);

        let expected = hmac_sha256_hex(
            b"secret",
            format!("1588591511721POST/api/orders{body}").as_bytes(),
        );
        assert_eq!(sig, expected);
        assert_eq!(sig.len(), 64);

        assert_ne!(sig, auth.sign(1_588_591_511_722, "POST", "/api/orders", body));
        assert_ne!(sig, auth.sign(1_588_591_511_721, "POST", "/api/order", body));
        assert_eq!(sig, auth.sign(1_588_591_511_721, "post", "/api/orders", body));
    }

    #[test]
    fn test_headers_carry_timestamp_and_subaccount() {
        let auth = ExchangeAuth::new("k", "secret", Some("macro".into()));
        let h = auth.headers_at(42, "GET", "/api/markets", "");
        assert_eq!(h.timestamp, "42");
        assert_eq!(h.api_key, "k");
        assert_eq!(h.subaccount.as_deref(), Some("macro"));
        assert_eq!(h.signature, auth.sign(42, "GET", "/api/markets", ""));
    }

    #[test]
    fn test_debug_hides_secret() {
        let auth = ExchangeAuth::new("k", "super-secret", None);
        assert!(!format!("{auth:?}").contains("super-secret"));
    }
}
