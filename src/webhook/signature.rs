//! Webhook signature (HMAC-SHA512, hex encoded, over the raw body)

use hmac::{Hmac, Mac};
use sha2::Sha512;

use super::WebhookError;

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the signature
pub const SIGNATURE_HEADER: &str = "X-Signature";

fn mac(secret: &str) -> Result<HmacSha512, WebhookError> {
    HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::Misconfigured(format!("invalid webhook secret: {}", e)))
}

/// Hex HMAC-SHA512 of `body`
pub fn sign(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = mac(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify `signature` (hex, case-insensitive) against `body` in constant time
pub fn verify(secret: &str, body: &[u8], signature: Option<&str>) -> Result<(), WebhookError> {
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(WebhookError::MissingSignature)?;
    let expected = hex::decode(signature).map_err(|_| WebhookError::BadSignature)?;

    let mut mac = mac(secret)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk_test_secret";

    #[test]
    fn test_valid_signature() {
        let body = br#"{"event":"charge.success"}"#;
        let sig = sign(SECRET, body).unwrap();
        assert_eq!(sig.len(), 128);
        assert!(verify(SECRET, body, Some(&sig)).is_ok());
        assert!(verify(SECRET, body, Some(&sig.to_uppercase())).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let sig = sign(SECRET, br#"{"amount":100}"#).unwrap();
        assert_eq!(
            verify(SECRET, br#"{"amount":999}"#, Some(&sig)),
            Err(WebhookError::BadSignature)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = b"{}";
        let sig = sign("other", body).unwrap();
        assert_eq!(verify(SECRET, body, Some(&sig)), Err(WebhookError::BadSignature));
    }

    #[test]
    fn test_missing_or_garbage_signature() {
        assert_eq!(verify(SECRET, b"{}", None), Err(WebhookError::MissingSignature));
        assert_eq!(verify(SECRET, b"{}", Some("  ")), Err(WebhookError::MissingSignature));
        assert_eq!(verify(SECRET, b"{}", Some("zz-not-hex")), Err(WebhookError::BadSignature));
    }
}
