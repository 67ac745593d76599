//! Parallel chunked download of a cache entry (§4.7). Splits an object
//! into fixed-size chunks, fans them out to a bounded per-file worker
//! pool, and marks each chunk complete in a [`ChunkBitmap`] as it lands
//! so waiting readers can unblock incrementally rather than waiting for
//! the whole object.

use std::sync::Arc;

use bucketfs_core::domain::{Generation, ObjectName};
use bucketfs_core::ports::bucket_store::BucketStore;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::bitmap::ChunkBitmap;
use crate::content::ContentStore;
use crate::key::CacheKey;

/// Splits `total_size` into chunks of `chunk_size` bytes (last one may be
/// shorter), returning `(offset, length)` pairs.
pub fn chunk_plan(total_size: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    if total_size == 0 {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut offset = 0u64;
    while offset < total_size {
        let len = chunk_size.min(total_size - offset);
        chunks.push((offset, len));
        offset += len;
    }
    chunks
}

/// Downloads `name` at `generation` into the cache file identified by
/// `key`, writing chunks concurrently and marking `bitmap` as each lands.
///
/// `global_permits` bounds process-wide concurrency (`max-parallel-downloads`);
/// `per_file_parallelism` additionally bounds how many chunks of this one
/// file are in flight at once (`parallel-downloads-per-file`).
pub async fn download_into_cache(
    store: &dyn BucketStore,
    name: &ObjectName,
    generation: Generation,
    total_size: u64,
    chunk_size: u64,
    content: &ContentStore,
    key: &CacheKey,
    bitmap: Arc<ChunkBitmap>,
    per_file_parallelism: usize,
    global_permits: Arc<Semaphore>,
) -> anyhow::Result<()> {
    content.allocate(key, total_size)?;
    let chunks = chunk_plan(total_size, chunk_size);
    let per_file = Arc::new(Semaphore::new(per_file_parallelism.max(1)));

    let mut tasks = Vec::with_capacity(chunks.len());
    for (chunk_index, (offset, len)) in chunks.into_iter().enumerate() {
        let per_file = per_file.clone();
        let global_permits = global_permits.clone();
        let bitmap = bitmap.clone();
        let name = name.clone();

        tasks.push(async move {
            let _global = global_permits
                .acquire()
                .await
                .expect("semaphore is never closed");
            let _local = per_file.acquire().await.expect("semaphore is never closed");

            let bytes = store.read_range(&name, generation, offset, len).await?;
            anyhow::Ok((chunk_index, offset, bytes))
        });
    }

    let results = futures_util::future::join_all(tasks).await;
    for result in results {
        let (chunk_index, offset, bytes) = result?;
        content.write_at(key, offset, &bytes)?;
        bitmap.mark_complete(chunk_index);
        debug!(chunk_index, offset, len = bytes.len(), "cache chunk landed");
    }

    if !bitmap.is_fully_complete() {
        warn!(object = %name, "download finished without completing every chunk");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_plan_splits_evenly() {
        assert_eq!(chunk_plan(20, 10), vec![(0, 10), (10, 10)]);
    }

    #[test]
    fn chunk_plan_last_chunk_is_short() {
        assert_eq!(chunk_plan(25, 10), vec![(0, 10), (10, 10), (20, 5)]);
    }

    #[test]
    fn chunk_plan_empty_object_has_no_chunks() {
        assert!(chunk_plan(0, 10).is_empty());
    }

    #[test]
    fn chunk_plan_single_chunk_when_smaller_than_size() {
        assert_eq!(chunk_plan(3, 10), vec![(0, 3)]);
    }
}
