//! Generated gRPC code and converters for ComputeGrid.
//!
//! This crate contains:
//! - Generated protobuf message types
//! - Generated gRPC service stubs (client and server)
//! - Converters between proto types and domain types

pub mod convert;

/// Generated protobuf types and services.
pub mod pb {
    // The path matches the proto package: computegrid.v1
    tonic::include_proto!("computegrid.v1");
}

// Re-export commonly used types
pub use pb::dispatch_service_client::DispatchServiceClient;
pub use pb::dispatch_service_server::{DispatchService, DispatchServiceServer};
pub use pb::identity_service_client::IdentityServiceClient;
pub use pb::identity_service_server::{IdentityService, IdentityServiceServer};
