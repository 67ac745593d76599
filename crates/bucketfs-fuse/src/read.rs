//! File read path (C6, §4.6): sequential/random classification, reader
//! precedence (file cache over direct ranged GET), and generation-change
//! handling. A sequential read against an object bigger than the
//! configured prefetch window is treated like a random one, since the
//! cache's unit of hydration is the whole object and every read here
//! potentially touches the network.

use std::sync::Arc;

use bucketfs_core::domain::{BucketName, Generation, ObjectRecord};
use bucketfs_core::error::BucketFsError;
use bucketfs_core::ports::bucket_store::BucketStore;
use bucketfs_cache::FileCache;
use bytes::Bytes;

use crate::handle::{AccessPattern, FileHandle};

/// Bundles the dependencies a read needs, so `filesystem.rs` can build
/// one of these per mount rather than threading four arguments through
/// every call.
pub struct ReadPath {
    pub store: Arc<dyn BucketStore>,
    pub cache: Arc<FileCache>,
    pub bucket: BucketName,
    pub random_seek_threshold: u32,
    /// §4.6's configured sequential-read prefetch window, in bytes. The
    /// file cache only ever hydrates a whole object, so this is enforced
    /// as a ceiling: a sequential read against an object larger than the
    /// window bypasses the cache (as if it were random) rather than
    /// paying to download the whole thing to serve a bounded read-ahead.
    pub sequential_prefetch_bytes: u64,
}

impl ReadPath {
    /// Serves `[offset, offset + len)` of `record` for `handle`.
    ///
    /// Returns `Err(BucketFsError::PreconditionFailed)` if `record`'s
    /// generation no longer matches what the handle observed at open
    /// time — §4.6's "a generation change aborts the in-flight read and
    /// invalidates the stale cache entry" — the caller is expected to
    /// re-stat and retry with a fresh record.
    pub async fn read(
        &self,
        handle: &FileHandle,
        record: &ObjectRecord,
        offset: u64,
        len: u32,
    ) -> Result<Bytes, BucketFsError> {
        if record.generation != handle.record_generation {
            return Err(BucketFsError::PreconditionFailed(record.name.to_string()));
        }

        let pattern = {
            let mut classifier = handle.classifier.lock().unwrap();
            classifier.observe(offset, len as u64, self.random_seek_threshold)
        };
        let is_range_read = should_bypass_cache(pattern, record.size, self.sequential_prefetch_bytes);

        match self
            .cache
            .read_range(self.store.as_ref(), &self.bucket, record, offset, len, is_range_read)
            .await
            .map_err(classify_io_error)?
        {
            Some(bytes) => Ok(bytes),
            None => self.read_direct(record, offset, len).await,
        }
    }

    /// Bypasses the file cache entirely, used for range reads the cache
    /// policy declined and for callers (e.g. readlink) needing a single
    /// small slice without warming the whole-object cache.
    pub async fn read_direct(
        &self,
        record: &ObjectRecord,
        offset: u64,
        len: u32,
    ) -> Result<Bytes, BucketFsError> {
        self.store
            .read_range(&record.name, record.generation, offset, len as u64)
            .await
            .map_err(classify_io_error)
    }
}

fn classify_io_error(err: anyhow::Error) -> BucketFsError {
    match err.downcast::<BucketFsError>() {
        Ok(bfs) => bfs,
        Err(err) => BucketFsError::IoError(err.to_string()),
    }
}

/// Whether a read observing `expected` against a freshly-fetched record's
/// `observed` generation should be treated as stale (§4.6, I4).
pub fn generation_changed(expected: Generation, observed: Generation) -> bool {
    expected != observed
}

/// §4.6: random reads always bypass the cache; sequential reads do too
/// once the object is bigger than the configured prefetch window, since
/// the cache can only hydrate whole objects.
fn should_bypass_cache(pattern: AccessPattern, object_size: u64, prefetch_window: u64) -> bool {
    pattern == AccessPattern::Random || object_size > prefetch_window
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_change_detected() {
        assert!(generation_changed(Generation(1), Generation(2)));
        assert!(!generation_changed(Generation(1), Generation(1)));
    }

    #[test]
    fn random_reads_always_bypass_cache() {
        assert!(should_bypass_cache(AccessPattern::Random, 10, 1_000_000));
    }

    #[test]
    fn sequential_reads_within_window_use_cache() {
        assert!(!should_bypass_cache(AccessPattern::Sequential, 1_000, 1_000_000));
    }

    #[test]
    fn sequential_reads_beyond_window_bypass_cache() {
        assert!(should_bypass_cache(AccessPattern::Sequential, 2_000_000, 1_000_000));
    }
}
