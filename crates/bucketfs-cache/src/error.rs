//! Error type for the on-disk file cache (C7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to connect to cache index: {0}")]
    ConnectionFailed(String),

    #[error("failed to migrate cache index schema: {0}")]
    MigrationFailed(String),

    #[error("failed to (de)serialize cache index row: {0}")]
    SerializationError(String),

    #[error("checksum mismatch for {name}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<CacheError> for bucketfs_core::error::BucketFsError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::ChecksumMismatch { .. } => {
                bucketfs_core::error::BucketFsError::Transient(err.to_string())
            }
            CacheError::Io(io_err) => io_err.into(),
            other => bucketfs_core::error::BucketFsError::IoError(other.to_string()),
        }
    }
}
