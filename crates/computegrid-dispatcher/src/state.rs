//! Shared application state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use computegrid_core::ProviderRegistry;

use crate::config::Config;
use crate::crypto::{generate_secret, TokenSigner};
use crate::dispatcher::Dispatcher;
use crate::identity::{AccessGate, AllowAll, IdentityStore, TokenGate};

/// Shared application state.
pub struct AppState {
    /// Task queue, worker pool and result store.
    pub dispatcher: Arc<Dispatcher>,

    /// Accounts and token issuance.
    pub identity: Arc<IdentityStore>,

    /// Authorization applied to dispatch calls.
    pub gate: Arc<dyn AccessGate>,

    /// When the server started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        identity: Arc<IdentityStore>,
        gate: Arc<dyn AccessGate>,
    ) -> Arc<Self> {
        Arc::new(Self {
            dispatcher,
            identity,
            gate,
            started_at: Utc::now(),
        })
    }

    /// Build the state described by `config`. Workers are not started.
    pub fn from_config(config: &Config, registry: ProviderRegistry) -> Arc<Self> {
        let secret = if config.token_secret.is_empty() {
            warn!("No token secret configured - generated one, tokens will not survive a restart");
            generate_secret()
        } else {
            config.token_secret.clone()
        };
        let identity = Arc::new(IdentityStore::new(TokenSigner::new(
            secret,
            config.token_ttl_secs,
        )));

        let gate: Arc<dyn AccessGate> = if config.require_auth {
            Arc::new(TokenGate::new(identity.clone()))
        } else {
            warn!("Authorization disabled - every caller may dispatch tasks");
            Arc::new(AllowAll)
        };

        info!(task_kinds = registry.len(), "Provider registry loaded");
        Self::new(Dispatcher::new(registry, config), identity, gate)
    }

    /// Seconds since start.
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
