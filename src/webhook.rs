//! Optional HMAC-SHA256 signature gate for the inbound webhook shim.
//! Inert unless `HMAC_SECRET` is configured; does not touch the
//! correlator pipeline itself.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifies a hex-encoded HMAC-SHA256 signature over `body` using `secret`.
/// Returns `false` on malformed hex or a mismatched digest.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_signature() {
        let secret = "top-secret";
        let body = b"inbound payload";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(verify_webhook_signature(secret, body, &signature));
    }

    #[test]
    fn rejects_tampered_body() {
        let secret = "top-secret";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(b"original");
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(!verify_webhook_signature(secret, b"tampered", &signature));
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(!verify_webhook_signature("secret", b"body", "not-hex"));
    }
}
