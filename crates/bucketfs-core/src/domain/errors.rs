//! Domain error types.
//!
//! Validation failures raised by the newtype constructors in this module
//! tree. These are distinct from [`crate::error::BucketFsError`], which
//! classifies failures surfaced to the kernel-protocol adapter.

use thiserror::Error;

/// Errors raised while constructing or validating domain value types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Object name fails the bucket naming rules (empty, contains `\0`, etc).
    #[error("invalid object name: {0}")]
    InvalidObjectName(String),

    /// Bucket name fails the bucket naming rules.
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    /// A continuation token was empty where a non-empty token was required.
    #[error("invalid continuation token: {0}")]
    InvalidContinuationToken(String),

    /// A checksum string could not be decoded to its expected byte length.
    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    /// A generation or metageneration value was outside its legal range.
    #[error("invalid generation: {0}")]
    InvalidGeneration(String),

    /// Attempted state transition that the domain forbids.
    #[error("invalid state transition from {from} to {to}")]
    InvalidState { from: String, to: String },

    /// Catch-all validation failure with a human-readable reason.
    #[error("validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DomainError::InvalidObjectName("".into());
        assert_eq!(err.to_string(), "invalid object name: ");

        let err = DomainError::InvalidState {
            from: "Clean".into(),
            to: "Dirty".into(),
        };
        assert_eq!(err.to_string(), "invalid state transition from Clean to Dirty");
    }

    #[test]
    fn error_equality_and_clone() {
        let a = DomainError::ValidationFailed("x".into());
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, DomainError::ValidationFailed("y".into()));
    }
}
