//! Error taxonomy surfaced to the kernel-protocol adapter (§7).

use thiserror::Error;

/// Kinds of failure the adapter must classify every bucket/inode/cache
/// operation into before replying to the kernel.
#[derive(Debug, Error, Clone)]
pub enum BucketFsError {
    /// Object or inode absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// `if_generation_match=0` precondition failed because the name already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Generation mismatch on an update; triggers reconciliation (§4.4), not retry.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Authentication or authorization failure; never retried.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Network error, 5xx, throttling, or stall-timeout; retried by C10 up to budget.
    #[error("transient error: {0}")]
    Transient(String),

    /// Read requested past end of object; mapped to an empty read, not an error.
    #[error("range unsatisfiable: {0}")]
    RangeUnsatisfiable(String),

    /// Caller misuse (bad argument, malformed path, unsupported operation shape).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Any I/O failure surfaced after retries are exhausted.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Operation has no meaning for this bucket kind (e.g. `rename_folder`
    /// on a non-hierarchical bucket).
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Internal inconsistency; always logged, optionally fatal per
    /// `exit-on-invariant-violation`.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl BucketFsError {
    /// Whether C10 should retry this error kind (§4.1, §7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, BucketFsError::Transient(_))
    }
}

impl From<BucketFsError> for libc::c_int {
    fn from(err: BucketFsError) -> Self {
        match err {
            BucketFsError::NotFound(_) => libc::ENOENT,
            BucketFsError::AlreadyExists(_) => libc::EEXIST,
            // A precondition failure that escapes reconciliation is surfaced
            // to the kernel as a generic I/O error; callers that can
            // reconcile should not let this variant reach here.
            BucketFsError::PreconditionFailed(_) => libc::EIO,
            BucketFsError::PermissionDenied(_) => libc::EACCES,
            BucketFsError::Transient(_) => libc::EIO,
            BucketFsError::RangeUnsatisfiable(_) => 0,
            BucketFsError::InvalidArgument(_) => libc::EINVAL,
            BucketFsError::IoError(_) => libc::EIO,
            BucketFsError::NotSupported(_) => libc::ENOTSUP,
            BucketFsError::InvariantViolation(_) => libc::EIO,
        }
    }
}

impl From<std::io::Error> for BucketFsError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => BucketFsError::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => BucketFsError::PermissionDenied(err.to_string()),
            _ => BucketFsError::IoError(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for BucketFsError {
    fn from(err: anyhow::Error) -> Self {
        BucketFsError::IoError(err.to_string())
    }
}

impl From<crate::domain::DomainError> for BucketFsError {
    fn from(err: crate::domain::DomainError) -> Self {
        BucketFsError::InvalidArgument(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_matches_taxonomy() {
        assert_eq!(libc::c_int::from(BucketFsError::NotFound("x".into())), libc::ENOENT);
        assert_eq!(libc::c_int::from(BucketFsError::AlreadyExists("x".into())), libc::EEXIST);
        assert_eq!(libc::c_int::from(BucketFsError::PermissionDenied("x".into())), libc::EACCES);
        assert_eq!(libc::c_int::from(BucketFsError::InvalidArgument("x".into())), libc::EINVAL);
        assert_eq!(libc::c_int::from(BucketFsError::RangeUnsatisfiable("x".into())), 0);
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(BucketFsError::Transient("x".into()).is_retryable());
        assert!(!BucketFsError::NotFound("x".into()).is_retryable());
        assert!(!BucketFsError::PreconditionFailed("x".into()).is_retryable());
    }

    #[test]
    fn io_error_not_found_maps_to_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: BucketFsError = io_err.into();
        assert!(matches!(err, BucketFsError::NotFound(_)));
    }
}
