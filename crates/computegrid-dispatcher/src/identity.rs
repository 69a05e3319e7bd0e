//! Identity gate: local accounts, bearer tokens and dispatch authorization.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use computegrid_core::DispatchRecord;

use crate::crypto::{generate_salt, hash_password, verify_password, TokenSigner};
use crate::error::{DispatchError, IdentityError};

/// Role assigned when registration does not name one.
pub const DEFAULT_ROLE: &str = "user";

/// Role allowed to read every task's result.
pub const ADMIN_ROLE: &str = "admin";

/// A stored account.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub username: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    /// Set for accounts provisioned through an external provider.
    pub external_provider: Option<String>,
    salt: String,
    /// None for externally provisioned accounts, which cannot log in with a
    /// password.
    password_hash: Option<String>,
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub role: String,
}

impl Principal {
    /// Caller identity used when authorization is disabled.
    pub fn anonymous() -> Self {
        Self {
            username: "anonymous".to_string(),
            role: DEFAULT_ROLE.to_string(),
        }
    }

    /// Whether this caller may read the result of `record`.
    pub fn can_read(&self, record: &DispatchRecord) -> bool {
        self.role == ADMIN_ROLE || self.username == record.submitted_by
    }
}

/// Identity asserted by an external provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub username: String,
    pub role: Option<String>,
}

/// Verifies tokens issued by an external identity provider.
#[async_trait]
pub trait ExternalIdentityProvider: Send + Sync {
    /// Provider name recorded on provisioned accounts.
    fn name(&self) -> &str;

    async fn verify(&self, token: &str) -> Result<ExternalIdentity, IdentityError>;
}

/// In-memory account store and token issuer.
pub struct IdentityStore {
    users: RwLock<HashMap<String, UserRecord>>,
    signer: TokenSigner,
    external: Option<Arc<dyn ExternalIdentityProvider>>,
}

impl IdentityStore {
    pub fn new(signer: TokenSigner) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            signer,
            external: None,
        }
    }

    /// Enable delegated login through `provider`.
    pub fn with_external_provider(mut self, provider: Arc<dyn ExternalIdentityProvider>) -> Self {
        self.external = Some(provider);
        self
    }

    /// Register a local account and return a token for it.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        role: Option<&str>,
    ) -> Result<String, IdentityError> {
        validate_username(username)?;
        if password.is_empty() {
            return Err(IdentityError::InvalidRegistration(
                "password must not be empty".into(),
            ));
        }
        let role = match role.map(str::trim) {
            None | Some("") => DEFAULT_ROLE,
            Some(role) => role,
        };

        let mut users = self.users.write().await;
        if users.contains_key(username) {
            warn!(username = %username, "Registration for existing username");
            return Err(IdentityError::DuplicateUser(username.to_string()));
        }

        let salt = generate_salt();
        users.insert(
            username.to_string(),
            UserRecord {
                username: username.to_string(),
                role: role.to_string(),
                created_at: Utc::now(),
                external_provider: None,
                password_hash: Some(hash_password(password, &salt)),
                salt,
            },
        );
        info!(username = %username, role = %role, "User registered");

        self.signer.issue(username, role)
    }

    /// Password login.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, IdentityError> {
        let users = self.users.read().await;
        let record = users.get(username).ok_or(IdentityError::InvalidCredentials)?;
        let matches = record
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(password, &record.salt, hash));
        if !matches {
            warn!(username = %username, "Failed login attempt");
            return Err(IdentityError::InvalidCredentials);
        }

        info!(username = %username, "User logged in");
        self.signer.issue(&record.username, &record.role)
    }

    /// Delegated login. The first successful login provisions a local
    /// account carrying the provider's name; later logins succeed only for
    /// accounts provisioned by the same provider.
    pub async fn login_external(&self, external_token: &str) -> Result<String, IdentityError> {
        let provider = self
            .external
            .as_ref()
            .ok_or(IdentityError::NoExternalProvider)?;
        let identity = provider.verify(external_token).await?;
        validate_username(&identity.username)?;

        let mut users = self.users.write().await;
        let record = users.entry(identity.username.clone()).or_insert_with(|| {
            info!(
                username = %identity.username,
                provider = %provider.name(),
                "Provisioned account from external identity"
            );
            UserRecord {
                username: identity.username.clone(),
                role: identity.role.clone().unwrap_or_else(|| DEFAULT_ROLE.to_string()),
                created_at: Utc::now(),
                external_provider: Some(provider.name().to_string()),
                salt: String::new(),
                password_hash: None,
            }
        });

        // Never hand out a local account, or one owned by another provider.
        if record.external_provider.as_deref() != Some(provider.name()) {
            warn!(
                username = %identity.username,
                provider = %provider.name(),
                "External login for an account bound to a different identity source"
            );
            return Err(IdentityError::ExternalRejected(
                "username bound to a different identity source".into(),
            ));
        }

        self.signer.issue(&record.username, &record.role)
    }

    /// Decode a bearer token into the caller it names.
    pub fn validate_token(&self, token: &str) -> Result<Principal, IdentityError> {
        let claims = self.signer.verify(token)?;
        Ok(Principal {
            username: claims.sub,
            role: claims.role,
        })
    }

    pub async fn user(&self, username: &str) -> Option<UserRecord> {
        self.users.read().await.get(username).cloned()
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }
}

fn validate_username(username: &str) -> Result<(), IdentityError> {
    if username.is_empty() {
        return Err(IdentityError::InvalidRegistration(
            "username must not be empty".into(),
        ));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(IdentityError::InvalidRegistration(
            "username must not contain whitespace".into(),
        ));
    }
    Ok(())
}

/// Decides whether a caller may dispatch work.
#[async_trait]
pub trait AccessGate: Send + Sync {
    /// `bearer` is the token from the `authorization` header, if any.
    async fn authorize(&self, bearer: Option<&str>) -> Result<Principal, DispatchError>;
}

/// Admits every caller as [`Principal::anonymous`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl AccessGate for AllowAll {
    async fn authorize(&self, _bearer: Option<&str>) -> Result<Principal, DispatchError> {
        Ok(Principal::anonymous())
    }
}

/// Admits callers presenting a valid bearer token.
pub struct TokenGate {
    identity: Arc<IdentityStore>,
}

impl TokenGate {
    pub fn new(identity: Arc<IdentityStore>) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl AccessGate for TokenGate {
    async fn authorize(&self, bearer: Option<&str>) -> Result<Principal, DispatchError> {
        let token = bearer.ok_or(DispatchError::Unauthenticated)?;
        self.identity
            .validate_token(token)
            .map_err(|e| DispatchError::InvalidToken(e.to_string()))
    }
}
