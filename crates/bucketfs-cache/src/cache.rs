//! Top-level on-disk file cache (C7, §4.7), tying the sidecar index, the
//! content store, and the chunked downloader together into one
//! orchestrator: unlike a single-shot download, a cache entry here can be
//! read while it is still downloading.

use std::path::Path;
use std::sync::Arc;

use bucketfs_core::config::FileCacheConfig;
use bucketfs_core::domain::{BucketName, Crc32c, ObjectRecord};
use bucketfs_core::ports::bucket_store::BucketStore;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::bitmap::ChunkBitmap;
use crate::content::ContentStore;
use crate::download::{chunk_plan, download_into_cache};
use crate::error::CacheError;
use crate::index::{CacheEntry, CacheIndex};
use crate::key::CacheKey;
use crate::pool::DatabasePool;

/// An in-flight (not yet index-committed) download, shared by every reader
/// racing to fetch the same cache entry.
struct InFlight {
    bitmap: Arc<ChunkBitmap>,
    total_size: u64,
}

pub struct FileCache {
    index: CacheIndex,
    content: ContentStore,
    config: FileCacheConfig,
    in_flight: DashMap<String, Arc<InFlight>>,
    global_permits: Arc<Semaphore>,
}

impl FileCache {
    pub async fn new(config: FileCacheConfig) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&config.cache_dir)?;
        let db_path = config.cache_dir.join("index.sqlite");
        let pool = DatabasePool::new(&db_path).await?;
        let index = CacheIndex::new(pool.pool().clone());
        let content = ContentStore::new(&config.cache_dir)?;
        let global_permits = Arc::new(Semaphore::new(config.max_parallel_downloads.max(1) as usize));
        Ok(Self {
            index,
            content,
            config,
            in_flight: DashMap::new(),
            global_permits,
        })
    }

    fn chunk_size_bytes(&self) -> u64 {
        self.config.download_chunk_size_mb as u64 * 1024 * 1024
    }

    /// Reads `[offset, offset + len)` of `record`, hydrating the cache as
    /// necessary. Returns `Ok(None)` when the configured policy says this
    /// read shouldn't go through the cache at all (§4.7's range-read gate),
    /// leaving the caller to read directly from the bucket.
    pub async fn read_range(
        &self,
        store: &dyn BucketStore,
        bucket: &BucketName,
        record: &ObjectRecord,
        offset: u64,
        len: u32,
        is_range_read: bool,
    ) -> anyhow::Result<Option<Bytes>> {
        if is_range_read && !self.config.cache_file_for_range_read {
            return Ok(None);
        }

        let key = CacheKey::new(bucket, &record.name, record.generation);
        let key_hash = key.as_str().to_string();

        if let Some(entry) = self.index.get(&key_hash).await? {
            if entry.fully_cached && entry.generation == record.generation.get() {
                self.index.touch(&key_hash, Utc::now()).await?;
                let data = self.content.read_at(&key, offset, len)?;
                return Ok(Some(Bytes::from(data)));
            }
            // Stale generation: drop the old file before starting a fresh one.
            let _ = self.content.remove(&key);
            self.index.delete(&key_hash).await?;
        }

        self.hydrate(store, bucket, record, &key, &key_hash).await?;

        let data = self.content.read_at(&key, offset, len)?;
        Ok(Some(Bytes::from(data)))
    }

    /// Ensures the whole object is present on disk, downloading it (once,
    /// even under concurrent callers) if it isn't already.
    async fn hydrate(
        &self,
        store: &dyn BucketStore,
        bucket: &BucketName,
        record: &ObjectRecord,
        key: &CacheKey,
        key_hash: &str,
    ) -> anyhow::Result<()> {
        let chunk_size = self.chunk_size_bytes();
        let num_chunks = chunk_plan(record.size, chunk_size).len().max(1);

        // Register (or join) the in-flight download without holding the
        // dashmap shard guard across the download's await below.
        let (in_flight, i_am_owner) = {
            let candidate = Arc::new(InFlight {
                bitmap: Arc::new(ChunkBitmap::new(num_chunks)),
                total_size: record.size,
            });
            match self.in_flight.entry(key_hash.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(o) => (o.get().clone(), false),
                dashmap::mapref::entry::Entry::Vacant(v) => {
                    v.insert(candidate.clone());
                    (candidate, true)
                }
            }
        };

        if i_am_owner {
            self.spawn_download(store, bucket, record, key, key_hash, in_flight.clone())
                .await?;
        }

        for chunk_index in 0..num_chunks {
            in_flight.bitmap.wait_for(chunk_index).await;
        }
        let _ = in_flight.total_size;
        Ok(())
    }

    async fn spawn_download(
        &self,
        store: &dyn BucketStore,
        bucket: &BucketName,
        record: &ObjectRecord,
        key: &CacheKey,
        key_hash: &str,
        in_flight: Arc<InFlight>,
    ) -> anyhow::Result<()> {
        let result = download_into_cache(
            store,
            &record.name,
            record.generation,
            record.size,
            self.chunk_size_bytes(),
            &self.content,
            key,
            in_flight.bitmap.clone(),
            self.config.parallel_downloads_per_file as usize,
            self.global_permits.clone(),
        )
        .await;

        self.in_flight.remove(key_hash);

        result?;
        self.finalize(key, key_hash, bucket, record).await
    }

    async fn finalize(
        &self,
        key: &CacheKey,
        key_hash: &str,
        bucket: &BucketName,
        record: &ObjectRecord,
    ) -> anyhow::Result<()> {
        if self.config.enable_crc {
            if let Some(expected) = record.crc32c {
                let bytes = self.content.read_at(key, 0, record.size as u32)?;
                let actual = Crc32c::of(&bytes).0;
                if actual != expected {
                    warn!(object = %record.name, expected, actual, "cached download failed checksum validation");
                    let _ = self.content.remove(key);
                    anyhow::bail!(CacheError::ChecksumMismatch {
                        name: record.name.as_str().to_string(),
                        expected,
                        actual,
                    });
                }
            }
        }

        self.index
            .upsert(&CacheEntry {
                key_hash: key_hash.to_string(),
                bucket: bucket.as_str().to_string(),
                object_name: record.name.as_str().to_string(),
                generation: record.generation.get(),
                size: record.size,
                crc32c: record.crc32c,
                fully_cached: true,
                last_access: Utc::now(),
            })
            .await?;

        self.evict_if_over_budget().await?;
        Ok(())
    }

    /// LRU eviction against `max-size-mb` (`-1` means unbounded).
    async fn evict_if_over_budget(&self) -> Result<(), CacheError> {
        if self.config.max_size_mb < 0 {
            return Ok(());
        }
        let budget_bytes = self.config.max_size_mb as u64 * 1024 * 1024;
        let mut total = self.index.total_size().await?;
        if total <= budget_bytes {
            return Ok(());
        }

        for entry in self.index.list_by_last_access_asc().await? {
            if total <= budget_bytes {
                break;
            }
            let key = CacheKey::from_hash(entry.key_hash.clone());
            let _ = self.content.remove(&key);
            self.index.delete(&entry.key_hash).await?;
            total = total.saturating_sub(entry.size);
            info!(object = entry.object_name, "evicted cache entry over size budget");
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bucketfs_core::domain::{ContinuationToken, Generation, Metageneration, ObjectName, RecordKind};
    use bucketfs_core::ports::bucket_store::{ChunkWriter, ListPage, Precondition, ProgressCallback};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeStore {
        data: Vec<u8>,
        reads: Mutex<u32>,
    }

    #[async_trait]
    impl BucketStore for FakeStore {
        async fn stat(&self, _name: &ObjectName, _force_fetch: bool) -> anyhow::Result<Option<ObjectRecord>> {
            unimplemented!()
        }

        async fn read_range(
            &self,
            _name: &ObjectName,
            _generation: Generation,
            offset: u64,
            length: u64,
        ) -> anyhow::Result<Bytes> {
            *self.reads.lock().unwrap() += 1;
            let start = offset as usize;
            let end = (offset + length).min(self.data.len() as u64) as usize;
            Ok(Bytes::copy_from_slice(&self.data[start..end]))
        }

        async fn list(
            &self,
            _prefix: &ObjectName,
            _delimiter: Option<&str>,
            _include_trailing_delimiter: bool,
            _continuation: Option<&ContinuationToken>,
        ) -> anyhow::Result<ListPage> {
            unimplemented!()
        }

        async fn create(&self, _name: &ObjectName, _data: Vec<u8>, _precondition: Precondition) -> anyhow::Result<ObjectRecord> {
            unimplemented!()
        }

        async fn open_chunk_writer(
            &self,
            _name: &ObjectName,
            _chunk_size: usize,
            _precondition: Precondition,
            _progress: Option<ProgressCallback>,
        ) -> anyhow::Result<Box<dyn ChunkWriter>> {
            unimplemented!()
        }

        async fn copy(
            &self,
            _src_name: &ObjectName,
            _src_generation: Generation,
            _dst_name: &ObjectName,
            _precondition: Precondition,
        ) -> anyhow::Result<ObjectRecord> {
            unimplemented!()
        }

        async fn compose(
            &self,
            _sources: &[(ObjectName, Generation)],
            _dst_name: &ObjectName,
            _precondition: Precondition,
        ) -> anyhow::Result<ObjectRecord> {
            unimplemented!()
        }

        async fn delete(&self, _name: &ObjectName, _generation: Option<Generation>) -> anyhow::Result<()> {
            unimplemented!()
        }

        async fn create_folder(&self, _name: &ObjectName) -> anyhow::Result<ObjectRecord> {
            unimplemented!()
        }

        async fn rename_folder(&self, _src: &ObjectName, _dst: &ObjectName) -> anyhow::Result<()> {
            unimplemented!()
        }

        async fn delete_folder(&self, _name: &ObjectName) -> anyhow::Result<()> {
            unimplemented!()
        }

        fn supports_hierarchical_namespace(&self) -> bool {
            false
        }
    }

    fn record(name: &str, size: u64, crc: Option<u32>) -> ObjectRecord {
        ObjectRecord {
            name: ObjectName::new(name).unwrap(),
            size,
            generation: Generation(1),
            metageneration: Metageneration(1),
            content_type: None,
            updated: Utc::now(),
            crc32c: crc,
            md5: None,
            metadata: HashMap::new(),
            storage_class: None,
            kind: RecordKind::Object,
        }
    }

    async fn cache(tmp: &tempfile::TempDir) -> FileCache {
        let config = FileCacheConfig {
            cache_dir: tmp.path().to_path_buf(),
            download_chunk_size_mb: 1,
            ..FileCacheConfig::default()
        };
        FileCache::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn read_range_hydrates_then_serves_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(&tmp).await;
        let bucket = BucketName::new("b").unwrap();
        let data = vec![7u8; 100];
        let crc = Crc32c::of(&data).0;
        let rec = record("f.bin", data.len() as u64, Some(crc));
        let store = FakeStore {
            data: data.clone(),
            reads: Mutex::new(0),
        };

        let bytes = cache
            .read_range(&store, &bucket, &rec, 10, 5, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&bytes[..], &data[10..15]);

        let bytes2 = cache
            .read_range(&store, &bucket, &rec, 20, 5, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&bytes2[..], &data[20..25]);
    }

    #[tokio::test]
    async fn range_read_without_cache_policy_defers_to_caller() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(&tmp).await;
        let bucket = BucketName::new("b").unwrap();
        let rec = record("f.bin", 10, None);
        let store = FakeStore {
            data: vec![0u8; 10],
            reads: Mutex::new(0),
        };

        let result = cache
            .read_range(&store, &bucket, &rec, 0, 5, true)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn checksum_mismatch_discards_entry_and_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache(&tmp).await;
        let bucket = BucketName::new("b").unwrap();
        let rec = record("f.bin", 10, Some(0xDEAD_BEEF));
        let store = FakeStore {
            data: vec![1u8; 10],
            reads: Mutex::new(0),
        };

        let err = cache.read_range(&store, &bucket, &rec, 0, 5, false).await;
        assert!(err.is_err());
    }
}
