use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the HMAC over a facilitator request body.
pub const FACILITATOR_AUTH_HEADER: &str = "X-Facilitator-Auth";

/// HMAC-SHA256 of `body` under `secret`, lowercase hex.
pub fn compute_hmac(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    alloy::hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_is_deterministic_hex() {
        let sig = compute_hmac(b"secret", b"body");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sig, compute_hmac(b"secret", b"body"));
    }

    #[test]
    fn test_hmac_depends_on_key_and_body() {
        let sig = compute_hmac(b"secret", b"body");
        assert_ne!(sig, compute_hmac(b"other", b"body"));
        assert_ne!(sig, compute_hmac(b"secret", b"tampered"));
    }

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            compute_hmac(b"Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
