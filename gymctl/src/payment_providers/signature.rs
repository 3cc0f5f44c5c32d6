//! HMAC-SHA256 verification of Stripe webhook signatures.
//!
//! Stripe signs each delivery with the endpoint secret and sends
//! `Stripe-Signature: t={unix},v1={hex},v1={hex}...`:
//! - the signature is computed over `{t}.{raw_body}`
//! - the whole `whsec_...` string is the HMAC key
//! - several `v1` entries appear while a secret is being rolled, and any one may match
//!
//! See: <https://docs.stripe.com/webhooks#verify-manually>

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{PaymentError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Compute the hex `v1` signature for a payload at a timestamp
pub fn sign_payload(timestamp: i64, payload: &str, secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Build a full header value, as Stripe would send it
pub fn signature_header(timestamp: i64, payload: &str, secret: &str) -> Option<String> {
    Some(format!("t={},v1={}", timestamp, sign_payload(timestamp, payload, secret)?))
}

/// Verify a `Stripe-Signature` header against the raw body.
///
/// `now` is unix seconds. Timestamps further than `tolerance_secs` from it in either direction are
/// rejected.
pub fn verify_signature(header: &str, payload: &str, secret: &str, tolerance_secs: i64, now: i64) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(
                    value
                        .parse()
                        .map_err(|_| PaymentError::InvalidSignature("timestamp is not a number".to_string()))?,
                )
            }
            "v1" => candidates.push(value),
            // v0 and future schemes are ignored
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| PaymentError::InvalidSignature("missing timestamp".to_string()))?;
    if candidates.is_empty() {
        return Err(PaymentError::InvalidSignature("no v1 signature".to_string()));
    }
    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return Err(PaymentError::InvalidSignature("timestamp outside tolerance".to_string()));
    }

    let expected = sign_payload(timestamp, payload, secret)
        .ok_or_else(|| PaymentError::InvalidSignature("unusable signing secret".to_string()))?;

    let matched = candidates
        .iter()
        .any(|candidate| bool::from(candidate.as_bytes().ct_eq(expected.as_bytes())));

    if matched {
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature("signature mismatch".to_string()))
    }
}
