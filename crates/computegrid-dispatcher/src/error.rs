//! Dispatcher and identity errors, and their gRPC status mapping.

use thiserror::Error;
use tonic::Status;

use computegrid_core::TaskId;

/// Errors from the dispatch path.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Missing or malformed bearer token")]
    Unauthenticated,

    #[error("Invalid bearer token: {0}")]
    InvalidToken(String),

    #[error("Task payload is empty")]
    EmptyPayload,

    #[error("Task {0} already exists")]
    DuplicateTask(TaskId),

    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    #[error("Task {0} was submitted by another caller")]
    NotOwner(TaskId),

    #[error("Task queue is full ({capacity} tasks waiting)")]
    QueueFull { capacity: usize },

    #[error("Dispatcher is shutting down")]
    ShuttingDown,
}

impl From<DispatchError> for Status {
    fn from(err: DispatchError) -> Self {
        let message = err.to_string();
        match err {
            DispatchError::Unauthenticated | DispatchError::InvalidToken(_) => {
                Status::unauthenticated(message)
            }
            DispatchError::EmptyPayload => Status::invalid_argument(message),
            DispatchError::DuplicateTask(_) => Status::already_exists(message),
            DispatchError::TaskNotFound(_) => Status::not_found(message),
            DispatchError::NotOwner(_) => Status::permission_denied(message),
            DispatchError::QueueFull { .. } => Status::resource_exhausted(message),
            DispatchError::ShuttingDown => Status::unavailable(message),
        }
    }
}

/// Errors from the identity gate.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Username '{0}' is already registered")]
    DuplicateUser(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("External identity provider not configured")]
    NoExternalProvider,

    #[error("External identity rejected: {0}")]
    ExternalRejected(String),

    #[error("Token signing failed: {0}")]
    Signing(String),
}

impl From<IdentityError> for Status {
    fn from(err: IdentityError) -> Self {
        let message = err.to_string();
        match err {
            IdentityError::DuplicateUser(_) => Status::already_exists(message),
            IdentityError::InvalidRegistration(_) => Status::invalid_argument(message),
            IdentityError::NoExternalProvider => Status::failed_precondition(message),
            IdentityError::Signing(_) => Status::internal(message),
            IdentityError::InvalidCredentials
            | IdentityError::InvalidToken(_)
            | IdentityError::TokenExpired
            | IdentityError::ExternalRejected(_) => Status::unauthenticated(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_status_codes() {
        let status: Status = DispatchError::QueueFull { capacity: 4 }.into();
        assert_eq!(status.code(), Code::ResourceExhausted);

        let status: Status = DispatchError::Unauthenticated.into();
        assert_eq!(status.code(), Code::Unauthenticated);

        let status: Status = IdentityError::DuplicateUser("alice".into()).into();
        assert_eq!(status.code(), Code::AlreadyExists);
        assert!(status.message().contains("alice"));
    }
}
