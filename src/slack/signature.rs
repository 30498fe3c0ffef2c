//! Slack request signature verification.
//!
//! Slack signs every request with `v0=hex(HMAC-SHA256(secret, "v0:{ts}:{body}"))`
//! and sends it in `X-Slack-Signature`, with the timestamp in
//! `X-Slack-Request-Timestamp`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";

/// Requests older (or newer) than this are treated as replays.
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("invalid request timestamp")]
    InvalidTimestamp,

    #[error("request timestamp outside the {MAX_CLOCK_SKEW_SECS}s window")]
    Stale,

    #[error("signature mismatch")]
    Mismatch,

    #[error("signing secret is not configured")]
    NoSecret,
}

/// Compute the `v0=` signature Slack would send for `body`.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
    Ok(format!("v0={}", hex::encode(mac(secret, timestamp, body)?)))
}

fn mac(secret: &str, timestamp: &str, body: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::NoSecret)?;
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Check a request's signature headers against `body`.
///
/// `now` is the current epoch time in seconds.
pub fn verify(
    secret: Option<&str>,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    now: i64,
) -> Result<(), SignatureError> {
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::NoSecret)?;
    let timestamp = timestamp.ok_or(SignatureError::MissingHeader(TIMESTAMP_HEADER))?;
    let signature = signature.ok_or(SignatureError::MissingHeader(SIGNATURE_HEADER))?;

    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp)?;
    if now.abs_diff(ts) > MAX_CLOCK_SKEW_SECS.unsigned_abs() {
        return Err(SignatureError::Stale);
    }

    let provided = signature
        .strip_prefix("v0=")
        .and_then(|h| hex::decode(h).ok())
        .ok_or(SignatureError::Mismatch)?;
    let expected = mac(secret, timestamp, body)?;
    if provided.len() != expected.len() || !bool::from(provided.ct_eq(&expected)) {
        return Err(SignatureError::Mismatch);
    }
    Ok(())
}
