//! Webhook signature verification.
//!
//! The provider signs the exact raw request body with HMAC-SHA256 over a
//! shared secret and sends the hex digest in the `x-signature` header.
//! Verification runs before any payload parsing or state change.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex signature for a body. Used by tests and outbound tooling.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature against the raw body. Comparison is constant-time.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let body = br#"{"type":"call.session_started"}"#;
        let signature = sign("secret", body);
        assert!(verify("secret", body, &signature));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let body = br#"{"type":"call.session_started"}"#;
        let signature = sign("secret", body);
        assert!(!verify("secret", br#"{"type":"call.session_ended"}"#, &signature));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = b"payload";
        let signature = sign("secret", body);
        assert!(!verify("other", body, &signature));
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        assert!(!verify("secret", b"payload", "zzzz"));
    }

    #[test]
    fn test_signature_is_deterministic() {
        assert_eq!(sign("secret", b"payload"), sign("secret", b"payload"));
    }
}
