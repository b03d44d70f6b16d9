use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::SignatureCheck;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-appmax-signature";
/// Optional and outside the HMAC: it bounds clock skew for senders that set
/// it, but a replay with the header stripped is still accepted. Duplicate
/// deliveries are absorbed by the idempotent upsert instead.
pub const TIMESTAMP_HEADER: &str = "x-appmax-timestamp";

/// Verify an Appmax webhook signature.
///
/// * `raw_body` - exact request bytes, before any parsing
/// * `signature` - `x-appmax-signature` value, `sha256=<hex>` or bare hex
/// * `timestamp` - `x-appmax-timestamp` value in unix seconds, if sent
/// * `secret` - shared secret; `None` puts ingestion in permissive mode
/// * `tolerance` - maximum clock skew in seconds
///
/// A configured secret with a missing header is `Invalid`, never `Skipped`.
pub fn verify_signature(
    raw_body: &[u8],
    signature: Option<&str>,
    timestamp: Option<&str>,
    secret: Option<&str>,
    tolerance: i64,
) -> SignatureCheck {
    let Some(secret) = secret else {
        return SignatureCheck::Skipped;
    };

    let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
        return SignatureCheck::Invalid;
    };

    if let Some(timestamp) = timestamp {
        if !timestamp_within_tolerance(timestamp, tolerance) {
            return SignatureCheck::Invalid;
        }
    }

    let received = strip_algorithm_prefix(signature);
    let Ok(received_bytes) = hex::decode(received) else {
        return SignatureCheck::Invalid;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return SignatureCheck::Invalid;
    };
    mac.update(raw_body);

    // verify_slice compares in constant time
    match mac.verify_slice(&received_bytes) {
        Ok(()) => SignatureCheck::Valid,
        Err(_) => SignatureCheck::Invalid,
    }
}

/// Hex HMAC-SHA256 of `raw_body`, formatted the way the gateway sends it.
pub fn sign(raw_body: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(raw_body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

fn strip_algorithm_prefix(signature: &str) -> &str {
    match signature.split_once('=') {
        Some((algo, value)) if algo.eq_ignore_ascii_case("sha256") => value,
        _ => signature,
    }
}

fn timestamp_within_tolerance(timestamp: &str, tolerance: i64) -> bool {
    let Ok(sent) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return false;
    };
    let Ok(now) = i64::try_from(now.as_secs()) else {
        return false;
    };
    now.checked_sub(sent)
        .and_then(i64::checked_abs)
        .is_some_and(|skew| skew <= tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"event":"order.approved","order_id":"TEST-1"}"#;

    fn now() -> String {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            .to_string()
    }

    #[test]
    fn test_valid_signature_with_prefix() {
        let signature = sign(BODY, SECRET).unwrap();
        assert!(signature.starts_with("sha256="));
        let result = verify_signature(BODY, Some(&signature), None, Some(SECRET), 300);
        assert_eq!(result, SignatureCheck::Valid);
    }

    #[test]
    fn test_valid_signature_without_prefix() {
        let signature = sign(BODY, SECRET).unwrap();
        let bare = signature.trim_start_matches("sha256=");
        let result = verify_signature(BODY, Some(bare), Some(&now()), Some(SECRET), 300);
        assert_eq!(result, SignatureCheck::Valid);
    }

    #[test]
    fn test_tampered_body_is_invalid() {
        let signature = sign(BODY, SECRET).unwrap();
        let tampered = br#"{"event":"order.approved","order_id":"TEST-2"}"#;
        let result = verify_signature(tampered, Some(&signature), None, Some(SECRET), 300);
        assert_eq!(result, SignatureCheck::Invalid);
    }

    #[test]
    fn test_missing_header_with_secret_is_invalid() {
        let result = verify_signature(BODY, None, None, Some(SECRET), 300);
        assert_eq!(result, SignatureCheck::Invalid);
    }

    #[test]
    fn test_no_secret_is_skipped_even_with_garbage_header() {
        assert_eq!(verify_signature(BODY, None, None, None, 300), SignatureCheck::Skipped);
        assert_eq!(
            verify_signature(BODY, Some("sha256=zz"), None, None, 300),
            SignatureCheck::Skipped
        );
    }

    #[test]
    fn test_non_hex_signature_is_invalid() {
        let result = verify_signature(BODY, Some("sha256=not-hex"), None, Some(SECRET), 300);
        assert_eq!(result, SignatureCheck::Invalid);
    }

    #[test]
    fn test_stale_timestamp_is_invalid() {
        let signature = sign(BODY, SECRET).unwrap();
        let result = verify_signature(BODY, Some(&signature), Some("1000000"), Some(SECRET), 300);
        assert_eq!(result, SignatureCheck::Invalid);
    }

    #[test]
    fn test_unparseable_timestamp_is_invalid() {
        let signature = sign(BODY, SECRET).unwrap();
        let result = verify_signature(BODY, Some(&signature), Some("yesterday"), Some(SECRET), 300);
        assert_eq!(result, SignatureCheck::Invalid);
    }

    #[test]
    fn test_extreme_timestamps_are_invalid() {
        let signature = sign(BODY, SECRET).unwrap();
        for ts in ["-9223372036854775808", "9223372036854775807"] {
            let result = verify_signature(BODY, Some(&signature), Some(ts), Some(SECRET), 300);
            assert_eq!(result, SignatureCheck::Invalid, "timestamp {ts}");
        }
    }

    #[test]
    fn test_absent_timestamp_is_not_enforced() {
        let signature = sign(BODY, SECRET).unwrap();
        let result = verify_signature(BODY, Some(&signature), None, Some(SECRET), 0);
        assert_eq!(result, SignatureCheck::Valid);
    }
}
