//! Gateway webhook authentication.
//!
//! The gateway signs `"{timestamp}.{raw body}"` with HMAC-SHA256 using the
//! shared webhook secret and sends
//! `X-Webhook-Signature: sha256=<hex>` plus `X-Webhook-Timestamp: <unix secs>`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature headers")]
    Missing,

    #[error("malformed signature headers")]
    Malformed,

    #[error("timestamp outside the accepted window")]
    Stale,

    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Paid,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub reference: String,
    pub status: WebhookStatus,
    pub transaction_id: Option<String>,
    pub amount_cents: i64,
}

fn mac(secret: &str, timestamp: &str, body: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    mac
}

/// Header value for `body` signed at `timestamp`.
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let digest = mac(secret, &timestamp.to_string(), body).finalize().into_bytes();
    format!("{SIGNATURE_PREFIX}{}", hex::encode(digest))
}

/// Checks freshness first, then the MAC in constant time.
pub fn verify(
    secret: &str,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    now: DateTime<Utc>,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let (timestamp, signature) = match (timestamp, signature) {
        (Some(t), Some(s)) => (t.trim(), s.trim()),
        _ => return Err(SignatureError::Missing),
    };

    let sent_at: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
    let tolerance = u64::try_from(tolerance_secs).unwrap_or(0);
    let skew = now.timestamp().checked_sub(sent_at).map(i64::unsigned_abs);
    if skew.map_or(true, |skew| skew > tolerance) {
        return Err(SignatureError::Stale);
    }

    let expected = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .and_then(|h| hex::decode(h).ok())
        .ok_or(SignatureError::Malformed)?;

    mac(secret, timestamp, body)
        .verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SECRET: &str = "whsec_test";

    #[test]
    fn test_valid_signature_verifies() {
        let now = Utc::now();
        let body = br#"{"reference":"GYM-1","status":"paid","amount_cents":100}"#;
        let ts = now.timestamp();
        let sig = sign(SECRET, ts, body);
        assert!(sig.starts_with("sha256="));
        assert_eq!(
            verify(SECRET, Some(&ts.to_string()), Some(&sig), body, now, 300),
            Ok(())
        );
    }

    #[test]
    fn test_tampered_body_fails() {
        let now = Utc::now();
        let ts = now.timestamp();
        let sig = sign(SECRET, ts, b"{\"amount_cents\":100}");
        assert_eq!(
            verify(SECRET, Some(&ts.to_string()), Some(&sig), b"{\"amount_cents\":1}", now, 300),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret_fails() {
        let now = Utc::now();
        let ts = now.timestamp();
        let sig = sign("other", ts, b"{}");
        assert_eq!(
            verify(SECRET, Some(&ts.to_string()), Some(&sig), b"{}", now, 300),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stale_timestamp_fails() {
        let now = Utc::now();
        let ts = (now - Duration::seconds(301)).timestamp();
        let sig = sign(SECRET, ts, b"{}");
        assert_eq!(
            verify(SECRET, Some(&ts.to_string()), Some(&sig), b"{}", now, 300),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn test_extreme_timestamps_are_stale() {
        let now = Utc::now();
        for ts in [i64::MIN, i64::MAX, i64::MIN + 1] {
            assert_eq!(
                verify(SECRET, Some(&ts.to_string()), Some("sha256=00"), b"{}", now, 300),
                Err(SignatureError::Stale)
            );
        }
    }

    #[test]
    fn test_missing_and_malformed_headers() {
        let now = Utc::now();
        assert_eq!(
            verify(SECRET, None, Some("sha256=00"), b"{}", now, 300),
            Err(SignatureError::Missing)
        );
        let ts = now.timestamp().to_string();
        assert_eq!(
            verify(SECRET, Some(&ts), Some("md5=abc"), b"{}", now, 300),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify(SECRET, Some("yesterday"), Some("sha256=00"), b"{}", now, 300),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn test_event_parses() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"reference":"GYM-abc","status":"failed","transaction_id":null,"amount_cents":2500}"#,
        )
        .unwrap();
        assert_eq!(event.status, WebhookStatus::Failed);
        assert_eq!(event.amount_cents, 2500);
    }
}
