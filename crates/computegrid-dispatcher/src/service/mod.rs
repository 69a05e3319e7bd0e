//! gRPC service implementations.

pub mod auth;
pub mod dispatch_service;
pub mod identity_service;

pub use dispatch_service::DispatchServiceImpl;
pub use identity_service::IdentityServiceImpl;
