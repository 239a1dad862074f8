//! Slack request signature verification.
//!
//! Reference: <https://api.slack.com/authentication/verifying-requests-from-slack>

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Requests older (or newer) than this are rejected as replays.
pub const MAX_AGE_SECS: i64 = 5 * 60;

/// Verify an `X-Slack-Signature` header (`v0=<hex>`) over `v0:{timestamp}:{body}`.
#[must_use]
pub fn verify_slack_signature(body: &[u8], timestamp: &str, signature: &str, secret: &str) -> bool {
    let Some(hex_sig) = signature.strip_prefix("v0=") else {
        return false;
    };
    let Ok(signature_bytes) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    computed.as_slice().ct_eq(&signature_bytes).into()
}

/// Whether `timestamp` (epoch seconds) is within [`MAX_AGE_SECS`] of now.
#[must_use]
pub fn validate_timestamp(timestamp: &str) -> bool {
    let Ok(ts) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    (chrono::Utc::now().timestamp() - ts).abs() <= MAX_AGE_SECS
}

/// Compute the header value Slack would send. Used by tests and tooling.
#[must_use]
pub fn sign(body: &[u8], timestamp: &str, secret: &str) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}
