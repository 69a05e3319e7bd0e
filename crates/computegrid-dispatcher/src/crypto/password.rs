//! Salted password digests.
//!
//! Only the salt and the HMAC-SHA256 of the password keyed with the salt are
//! stored.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::Mac;
use rand::RngCore;

use super::token::HmacSha256;

/// Generate a random 128-bit salt, URL-safe base64 encoded.
pub fn generate_salt() -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    URL_SAFE_NO_PAD.encode(salt)
}

fn keyed(password: &str, salt: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(salt.as_bytes()).ok()?;
    mac.update(password.as_bytes());
    Some(mac)
}

/// Digest `password` with `salt` (hex encoded).
pub fn hash_password(password: &str, salt: &str) -> String {
    keyed(password, salt)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Check `password` against a stored digest.
pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hash) else {
        return false;
    };
    keyed(password, salt).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_salted_hashes_differ() {
        let (a, b) = (generate_salt(), generate_salt());
        assert_ne!(a, b);
        assert_eq!(a.len(), 22);
        assert_ne!(hash_password("hunter2", &a), hash_password("hunter2", &b));
        assert_eq!(hash_password("hunter2", &a).len(), 64);
    }

    #[test]
    fn test_verify_password() {
        let salt = generate_salt();
        let hash = hash_password("correct horse", &salt);
        assert!(verify_password("correct horse", &salt, &hash));
        assert!(!verify_password("wrong horse", &salt, &hash));
        assert!(!verify_password("correct horse", &salt, "not-hex"));
        assert!(!verify_password("correct horse", &salt, &hash[..32]));
    }

    #[test]
    fn test_digest_is_hmac_keyed_by_salt() {
        assert_eq!(
            hash_password("The quick brown fox jumps over the lazy dog", "key"),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }
}
