//! IdentityService implementation - registration, login and token checks.
//!
//! Credential failures are reported in the response body (`success=false`)
//! rather than as RPC errors, so clients can show the message directly.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::info;

use computegrid_proto::pb::{
    AuthResponse, LoginRequest, RegisterRequest, ValidateTokenRequest, ValidateTokenResponse,
};
use computegrid_proto::{IdentityService, IdentityServiceServer};

use crate::crypto::hash_token;
use crate::error::IdentityError;
use crate::state::AppState;

/// gRPC IdentityService implementation.
pub struct IdentityServiceImpl {
    state: Arc<AppState>,
}

impl IdentityServiceImpl {
    /// Create a new IdentityServiceImpl.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Convert into a tonic server.
    pub fn into_server(self) -> IdentityServiceServer<Self> {
        IdentityServiceServer::new(self)
    }
}

fn auth_response(result: Result<String, IdentityError>, ok_message: &str) -> AuthResponse {
    match result {
        Ok(token) => AuthResponse {
            success: true,
            token: Some(token),
            message: ok_message.to_string(),
        },
        Err(e) => AuthResponse {
            success: false,
            token: None,
            message: e.to_string(),
        },
    }
}

#[tonic::async_trait]
impl IdentityService for IdentityServiceImpl {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<AuthResponse>, Status> {
        let req = request.into_inner();
        let role = (!req.role.is_empty()).then_some(req.role.as_str());
        let result = self
            .state
            .identity
            .register(&req.username, &req.password, role)
            .await;
        Ok(Response::new(auth_response(result, "Registered")))
    }

    async fn login(&self, request: Request<LoginRequest>) -> Result<Response<AuthResponse>, Status> {
        let req = request.into_inner();
        let identity = &self.state.identity;
        let result = match req.external_token.as_deref() {
            Some(external) if !external.is_empty() => {
                info!(token_hash = %hash_token(external), "Delegated login attempt");
                identity.login_external(external).await
            }
            _ => identity.login(&req.username, &req.password).await,
        };

        // A missing provider is a server configuration problem, not a bad
        // credential.
        if let Err(IdentityError::NoExternalProvider) = result {
            return Err(IdentityError::NoExternalProvider.into());
        }
        Ok(Response::new(auth_response(result, "Logged in")))
    }

    async fn validate_token(
        &self,
        request: Request<ValidateTokenRequest>,
    ) -> Result<Response<ValidateTokenResponse>, Status> {
        let req = request.into_inner();
        let response = match self.state.identity.validate_token(&req.token) {
            Ok(principal) => ValidateTokenResponse {
                valid: true,
                username: Some(principal.username),
                role: Some(principal.role),
            },
            Err(_) => ValidateTokenResponse {
                valid: false,
                username: None,
                role: None,
            },
        };
        Ok(Response::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use computegrid_kernels::default_registry;
    use tonic::Code;

    use crate::config::Config;

    fn service() -> IdentityServiceImpl {
        let config = Config {
            token_secret: "test-secret".into(),
            ..Config::default()
        };
        IdentityServiceImpl::new(AppState::from_config(&config, default_registry()))
    }

    fn register_request(username: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            password: password.into(),
            role: String::new(),
        }
    }

    #[tokio::test]
    async fn test_register_login_validate() {
        let service = service();
        let registered = service
            .register(Request::new(register_request("alice", "pw")))
            .await
            .unwrap()
            .into_inner();
        assert!(registered.success);

        let login = service
            .login(Request::new(LoginRequest {
                username: "alice".into(),
                password: "pw".into(),
                external_token: None,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(login.success);

        let validated = service
            .validate_token(Request::new(ValidateTokenRequest {
                token: login.token.unwrap(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(validated.valid);
        assert_eq!(validated.username.as_deref(), Some("alice"));
        assert_eq!(validated.role.as_deref(), Some("user"));
    }

    #[tokio::test]
    async fn test_failures_are_reported_in_body() {
        let service = service();
        service
            .register(Request::new(register_request("bob", "pw")))
            .await
            .unwrap();

        let duplicate = service
            .register(Request::new(register_request("bob", "other")))
            .await
            .unwrap()
            .into_inner();
        assert!(!duplicate.success);
        assert!(duplicate.token.is_none());
        assert!(duplicate.message.contains("already registered"));

        let bad_login = service
            .login(Request::new(LoginRequest {
                username: "bob".into(),
                password: "wrong".into(),
                external_token: None,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!bad_login.success);

        let invalid = service
            .validate_token(Request::new(ValidateTokenRequest {
                token: "garbage".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!invalid.valid);
        assert!(invalid.username.is_none());
    }

    #[tokio::test]
    async fn test_external_login_without_provider_is_an_error() {
        let err = service()
            .login(Request::new(LoginRequest {
                username: String::new(),
                password: String::new(),
                external_token: Some("oidc-token".into()),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);
    }
}
