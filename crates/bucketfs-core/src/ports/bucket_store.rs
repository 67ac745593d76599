//! Bucket abstraction port (C1, §4.1).
//!
//! This is the primary interface for all interactions with the remote
//! object store. Implementations own retry/backoff (C10), authentication,
//! and error classification into [`crate::error::BucketFsError`].
//!
//! Uses `anyhow::Result` at this boundary because transport-level errors
//! are adapter-specific; the use-case layer (C3/C4) classifies them into
//! `BucketFsError` where a domain-level decision is required (e.g.
//! `PreconditionFailed` triggers reconciliation, not a bare error bubble).

use std::fmt;

use async_trait::async_trait;

use crate::domain::{ContinuationToken, Generation, ObjectName, ObjectRecord};

/// A generation-based constraint attached to a mutation (§3, glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// No constraint; the mutation always applies.
    Any,
    /// Succeeds only if the name's current generation equals this value.
    /// `Generation(0)` means "only if the name is currently absent".
    IfGenerationMatch(Generation),
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::Any => write!(f, "any"),
            Precondition::IfGenerationMatch(g) => write!(f, "if-generation-match={g}"),
        }
    }
}

/// Result of a single `list` call (§4.1, §4.4).
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects whose name starts with the queried prefix and has no
    /// further path separator (plus the placeholder at the prefix itself,
    /// via `include_trailing_delimiter`).
    pub records: Vec<ObjectRecord>,
    /// Inferred child prefixes (`D/child/`) one level below the queried prefix.
    pub prefixes: Vec<ObjectName>,
    /// Present iff more pages remain.
    pub next_continuation: Option<ContinuationToken>,
}

/// A progress callback invoked with `(bytes_sent, total_bytes)` during a
/// resumable upload.
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// A resumable, chunked upload in progress (§4.1, §4.8).
///
/// Callers push fixed-size byte chunks via [`ChunkWriter::write_chunk`] and
/// either [`ChunkWriter::finalize`] to commit or [`ChunkWriter::abort`] to
/// discard. A writer must not be reused after either terminal call.
#[async_trait]
pub trait ChunkWriter: Send {
    /// Uploads the next chunk. Chunks must be supplied in order; the last
    /// chunk may be shorter than `chunk_size`.
    async fn write_chunk(&mut self, data: Vec<u8>) -> anyhow::Result<()>;

    /// Commits the upload session, returning the finalized object record.
    async fn finalize(self: Box<Self>) -> anyhow::Result<ObjectRecord>;

    /// Abandons the upload session; the bucket must not retain a partial object.
    async fn abort(self: Box<Self>) -> anyhow::Result<()>;
}

/// Port trait for the remote object store (C1).
///
/// Implementations wrap every method with C10 retry/backoff; callers may
/// assume a returned error has already exhausted the configured retry
/// budget.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Fetches the current record for `name`, or `Ok(None)` if absent.
    /// `force_fetch` bypasses any transport-level caching (not the
    /// adapter's own stat cache, which lives above this port).
    async fn stat(&self, name: &ObjectName, force_fetch: bool) -> anyhow::Result<Option<ObjectRecord>>;

    /// Issues a ranged GET over `[offset, offset + length)` of `name` at
    /// `generation` (§4.6). A length extending past the object's end
    /// returns the available bytes, not an error.
    async fn read_range(
        &self,
        name: &ObjectName,
        generation: Generation,
        offset: u64,
        length: u64,
    ) -> anyhow::Result<bytes::Bytes>;

    /// Lists one page of objects and inferred prefixes under `prefix`.
    async fn list(
        &self,
        prefix: &ObjectName,
        delimiter: Option<&str>,
        include_trailing_delimiter: bool,
        continuation: Option<&ContinuationToken>,
    ) -> anyhow::Result<ListPage>;

    /// Uploads `data` as a single request, applying `precondition`.
    async fn create(
        &self,
        name: &ObjectName,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> anyhow::Result<ObjectRecord>;

    /// Opens a resumable upload session (§4.1, §4.8).
    async fn open_chunk_writer(
        &self,
        name: &ObjectName,
        chunk_size: usize,
        precondition: Precondition,
        progress: Option<ProgressCallback>,
    ) -> anyhow::Result<Box<dyn ChunkWriter>>;

    /// Server-side copy, used by rename's fast path (§4.4).
    async fn copy(
        &self,
        src_name: &ObjectName,
        src_generation: Generation,
        dst_name: &ObjectName,
        precondition: Precondition,
    ) -> anyhow::Result<ObjectRecord>;

    /// Composes multiple source objects into one, used by append mode (§4.8).
    async fn compose(
        &self,
        sources: &[(ObjectName, Generation)],
        dst_name: &ObjectName,
        precondition: Precondition,
    ) -> anyhow::Result<ObjectRecord>;

    /// Deletes `name`, optionally only if it is currently at `generation`.
    async fn delete(&self, name: &ObjectName, generation: Option<Generation>) -> anyhow::Result<()>;

    /// Creates a hierarchical-bucket folder entity. Returns
    /// `BucketFsError::NotSupported` (wrapped in `anyhow`) on flat buckets.
    async fn create_folder(&self, name: &ObjectName) -> anyhow::Result<ObjectRecord>;

    /// Atomically renames a hierarchical-bucket folder at the bucket level (§4.4).
    async fn rename_folder(&self, src: &ObjectName, dst: &ObjectName) -> anyhow::Result<()>;

    /// Deletes a hierarchical-bucket folder entity.
    async fn delete_folder(&self, name: &ObjectName) -> anyhow::Result<()>;

    /// Whether this bucket exposes the hierarchical-namespace RPCs
    /// (`create_folder`/`rename_folder`/`delete_folder`).
    fn supports_hierarchical_namespace(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Generation;

    #[test]
    fn precondition_display() {
        assert_eq!(Precondition::Any.to_string(), "any");
        assert_eq!(
            Precondition::IfGenerationMatch(Generation(0)).to_string(),
            "if-generation-match=0"
        );
    }
}
