//! Slack request signature verification (v0 HMAC-SHA256 scheme).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Requests whose timestamp is further than this many seconds from now are
/// rejected outright, which bounds replay of captured requests.
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 300;

/// Compute the `v0=<hex>` signature for a request body.
pub fn sign(signing_secret: &str, timestamp: &str, body: &str) -> String {
    let base = format!("v0:{timestamp}:{body}");
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(base.as_bytes());
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a request signature against the signing secret. `now` is unix
/// seconds, injected so the freshness check is testable.
pub fn verify(signing_secret: &str, timestamp: &str, body: &str, provided: &str, now: i64) -> bool {
    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now - ts).abs() > MAX_TIMESTAMP_SKEW_SECS {
        return false;
    }
    sign(signing_secret, timestamp, body) == provided
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";
    const NOW: i64 = 1_717_000_000;

    fn ts() -> String {
        NOW.to_string()
    }

    #[test]
    fn accepts_a_signature_it_produced() {
        let body = r#"{"type":"event_callback"}"#;
        let provided = sign(SECRET, &ts(), body);
        assert!(verify(SECRET, &ts(), body, &provided, NOW));
    }

    #[test]
    fn rejects_a_tampered_body() {
        let provided = sign(SECRET, &ts(), "original");
        assert!(!verify(SECRET, &ts(), "tampered", &provided, NOW));
    }

    #[test]
    fn rejects_the_wrong_secret() {
        let provided = sign("other-secret", &ts(), "body");
        assert!(!verify(SECRET, &ts(), "body", &provided, NOW));
    }

    #[test]
    fn rejects_stale_timestamps() {
        let stale = (NOW - MAX_TIMESTAMP_SKEW_SECS - 1).to_string();
        let provided = sign(SECRET, &stale, "body");
        assert!(!verify(SECRET, &stale, "body", &provided, NOW));
    }

    #[test]
    fn rejects_timestamps_from_the_future() {
        let future = (NOW + MAX_TIMESTAMP_SKEW_SECS + 1).to_string();
        let provided = sign(SECRET, &future, "body");
        assert!(!verify(SECRET, &future, "body", &provided, NOW));
    }

    #[test]
    fn rejects_unparseable_timestamps() {
        let provided = sign(SECRET, "yesterday", "body");
        assert!(!verify(SECRET, "yesterday", "body", &provided, NOW));
    }

    #[test]
    fn signature_carries_the_version_prefix() {
        assert!(sign(SECRET, &ts(), "body").starts_with("v0="));
    }
}
