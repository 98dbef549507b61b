//! Error types for customer operations.
//!
//! [`ServiceError`] is what every [`CustomerService`](crate::service::CustomerService)
//! operation returns. The transport layer translates it into client-facing
//! error codes via [`ServiceError::code`]; it never inspects messages.

use crate::store::StoreError;

/// Errors returned by customer operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// The requested customer does not exist.
    #[error("Customer not found with id: {0}")]
    NotFound(String),

    /// The input was malformed or violates a field rule.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Anything else.
    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl ServiceError {
    /// Stable machine-readable code for this error kind.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// Whether the message is safe and useful to show to a client.
    ///
    /// Storage and unknown failures carry backend details that stay in the
    /// logs.
    pub const fn is_client_facing(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Validation(_))
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ServiceError::NotFound(String::from("x")).code(), "NOT_FOUND");
        assert_eq!(
            ServiceError::Validation(String::from("x")).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            ServiceError::Storage(StoreError::Backend(String::from("down"))).code(),
            "STORAGE_ERROR"
        );
        assert_eq!(ServiceError::Unknown(String::from("x")).code(), "UNKNOWN");
    }

    #[test]
    fn only_not_found_and_validation_are_client_facing() {
        assert!(ServiceError::NotFound(String::from("x")).is_client_facing());
        assert!(ServiceError::Validation(String::from("x")).is_client_facing());
        assert!(!ServiceError::Storage(StoreError::Backend(String::from("x"))).is_client_facing());
        assert!(!ServiceError::Unknown(String::from("x")).is_client_facing());
    }

    #[test]
    fn not_found_message_names_the_id() {
        let err = ServiceError::NotFound(String::from("abc"));
        assert_eq!(err.to_string(), "Customer not found with id: abc");
    }
}
