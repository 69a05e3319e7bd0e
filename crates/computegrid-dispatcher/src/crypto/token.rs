//! Signed bearer tokens.
//!
//! A token is `<claims>.<signature>` where `claims` is the URL-safe base64
//! JSON encoding of [`Claims`] and `signature` is the hex HMAC-SHA256 of the
//! encoded claims keyed with the server secret. The server keeps no
//! per-token state; validity is decided from the token and the secret alone.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::IdentityError;

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Username.
    pub sub: String,

    /// Role granted at registration.
    pub role: String,

    /// Issued at (unix seconds).
    pub iat: i64,

    /// Expires at (unix seconds).
    pub exp: i64,

    /// Random token id.
    pub jti: String,
}

/// Issues and verifies bearer tokens with one server secret.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>, ttl_secs: u64) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            ttl: Duration::seconds(
                i64::try_from(ttl_secs)
                    .unwrap_or(i64::MAX)
                    .min(i64::MAX / 1000),
            ),
        }
    }

    fn mac(&self, encoded_claims: &str) -> Result<HmacSha256, IdentityError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| IdentityError::Signing(e.to_string()))?;
        mac.update(encoded_claims.as_bytes());
        Ok(mac)
    }

    /// Issue a token for `username` with `role`.
    pub fn issue(&self, username: &str, role: &str) -> Result<String, IdentityError> {
        let now = Utc::now();
        let mut jti = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut jti);

        let claims = Claims {
            sub: username.to_string(),
            role: role.to_string(),
            iat: now.timestamp(),
            exp: now
                .checked_add_signed(self.ttl)
                .map_or(i64::MAX, |t| t.timestamp()),
            jti: URL_SAFE_NO_PAD.encode(jti),
        };
        let json = serde_json::to_vec(&claims).map_err(|e| IdentityError::Signing(e.to_string()))?;
        let encoded = URL_SAFE_NO_PAD.encode(json);
        let signature = hex::encode(self.mac(&encoded)?.finalize().into_bytes());
        Ok(format!("{}.{}", encoded, signature))
    }

    /// Verify signature and expiry and return the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, IdentityError> {
        let (encoded, signature) = token
            .split_once('.')
            .ok_or_else(|| IdentityError::InvalidToken("malformed token".into()))?;
        let signature = hex::decode(signature)
            .map_err(|_| IdentityError::InvalidToken("malformed signature".into()))?;

        self.mac(encoded)?
            .verify_slice(&signature)
            .map_err(|_| IdentityError::InvalidToken("bad signature".into()))?;

        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| IdentityError::InvalidToken(e.to_string()))?;
        let claims: Claims = serde_json::from_slice(&json)
            .map_err(|e| IdentityError::InvalidToken(e.to_string()))?;

        if Utc::now().timestamp() >= claims.exp {
            return Err(IdentityError::TokenExpired);
        }
        Ok(claims)
    }
}

/// Generate a random 256-bit signing secret.
///
/// Tokens signed with a generated secret stop validating when the server
/// restarts.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a token using SHA-256, for logging without leaking it.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let signer = TokenSigner::new("secret", 3600);
        let token = signer.issue("alice", "admin").unwrap();
        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.role, "admin");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_tokens_are_unique() {
        let signer = TokenSigner::new("secret", 3600);
        assert_ne!(
            signer.issue("alice", "user").unwrap(),
            signer.issue("alice", "user").unwrap()
        );
    }

    #[test]
    fn test_rejects_tampering_and_foreign_secret() {
        let signer = TokenSigner::new("secret", 3600);
        let token = signer.issue("alice", "user").unwrap();

        let forged = signer.issue("mallory", "admin").unwrap();
        let (forged_claims, _) = forged.split_once('.').unwrap();
        let (_, signature) = token.split_once('.').unwrap();
        let spliced = format!("{}.{}", forged_claims, signature);
        assert!(matches!(
            signer.verify(&spliced),
            Err(IdentityError::InvalidToken(_))
        ));

        let other = TokenSigner::new("other-secret", 3600);
        assert!(other.verify(&token).is_err());
        assert!(signer.verify("not-a-token").is_err());
    }

    #[test]
    fn test_rejects_extended_or_truncated_signatures() {
        let signer = TokenSigner::new("secret", 3600);
        let token = signer.issue("alice", "user").unwrap();
        let (claims, signature) = token.split_once('.').unwrap();

        // Extra claims appended after the signed ones
        let extended = format!("{}eyJyb2xlIjoiYWRtaW4ifQ.{}", claims, signature);
        assert!(signer.verify(&extended).is_err());

        let truncated = format!("{}.{}", claims, &signature[..32]);
        assert!(matches!(
            signer.verify(&truncated),
            Err(IdentityError::InvalidToken(_))
        ));

        let not_hex = format!("{}.{}", claims, "zz".repeat(32));
        assert!(matches!(
            signer.verify(&not_hex),
            Err(IdentityError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_signature_is_hmac_sha256() {
        let signer = TokenSigner::new("secret", 3600);
        let token = signer.issue("alice", "user").unwrap();
        let (claims, signature) = token.split_once('.').unwrap();

        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(claims.as_bytes());
        assert_eq!(signature, hex::encode(mac.finalize().into_bytes()));
    }

    #[test]
    fn test_expired_token() {
        let signer = TokenSigner::new("secret", 0);
        let token = signer.issue("alice", "user").unwrap();
        assert!(matches!(signer.verify(&token), Err(IdentityError::TokenExpired)));
    }

    #[test]
    fn test_generate_secret_and_hash() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 43);
        assert_eq!(hash_token(&secret).len(), 64);
        assert_eq!(hash_token(&secret), hash_token(&secret));
    }
}
