//! ComputeGrid Dispatch Server Library
//!
//! Accepts serialized tasks over gRPC, queues them for a fixed worker pool
//! and records their outcomes for polling or streaming. Dispatch calls pass
//! through an identity gate backed by locally issued bearer tokens.

pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod identity;
pub mod metrics;
pub mod service;
pub mod state;

pub use config::Config;
pub use dispatcher::{CounterSnapshot, Dispatcher, ResultStore};
pub use error::{DispatchError, IdentityError};
pub use identity::{
    AccessGate, AllowAll, ExternalIdentity, ExternalIdentityProvider, IdentityStore, Principal,
    TokenGate,
};
pub use service::{DispatchServiceImpl, IdentityServiceImpl};
pub use state::AppState;
