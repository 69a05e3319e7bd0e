//! Bearer token extraction from request metadata.
//!
//! Clients send `authorization: Bearer <token>`. Whether a missing or bad
//! token is fatal is decided by the configured [`AccessGate`], not here.
//!
//! [`AccessGate`]: crate::identity::AccessGate

use tonic::Request;

/// Metadata key carrying the bearer token.
pub const AUTHORIZATION: &str = "authorization";

/// Extract the bearer token, if a well-formed one is present.
pub fn bearer_token<T>(request: &Request<T>) -> Option<String> {
    let value = request.metadata().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(header: Option<&str>) -> Request<()> {
        let mut request = Request::new(());
        if let Some(value) = header {
            request
                .metadata_mut()
                .insert(AUTHORIZATION, value.parse().unwrap());
        }
        request
    }

    #[test]
    fn test_valid_bearer() {
        assert_eq!(bearer_token(&request(Some("Bearer abc.def"))).as_deref(), Some("abc.def"));
        assert_eq!(bearer_token(&request(Some("bearer  xyz "))).as_deref(), Some("xyz"));
    }

    #[test]
    fn test_invalid_bearer() {
        assert!(bearer_token(&request(None)).is_none());
        assert!(bearer_token(&request(Some("Basic dXNlcjpwdw=="))).is_none());
        assert!(bearer_token(&request(Some("Bearer"))).is_none());
        assert!(bearer_token(&request(Some("Bearer   "))).is_none());
    }
}
