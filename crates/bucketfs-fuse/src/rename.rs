//! Rename (C4, §4.4): copy+delete for files, enumerate+rename for
//! directories on flat buckets (bounded by `rename-dir-limit`), and the
//! native `rename_folder` RPC on hierarchical buckets.
//!
//! A move is copy-then-delete when no atomic move RPC applies, plus the
//! directory-subtree enumeration §4.4 requires for the flat-bucket
//! fallback, which must walk every leaf instead of renaming a whole
//! subtree atomically by id.

use bucketfs_core::domain::{Generation, ObjectName};
use bucketfs_core::error::BucketFsError;
use bucketfs_core::ports::bucket_store::{BucketStore, Precondition};

use crate::listing::list_all;

fn to_bfs_error(err: anyhow::Error) -> BucketFsError {
    match err.downcast::<BucketFsError>() {
        Ok(bfs) => bfs,
        Err(err) => BucketFsError::IoError(err.to_string()),
    }
}

/// Renames a single file object via server-side copy followed by delete
/// of the source (§4.4). The destination is created only if currently
/// absent, matching POSIX rename's "replace silently if present" only
/// after the copy step proves the source is readable.
pub async fn rename_file(
    store: &dyn BucketStore,
    src: &ObjectName,
    src_generation: Generation,
    dst: &ObjectName,
) -> Result<(), BucketFsError> {
    store
        .copy(src, src_generation, dst, Precondition::Any)
        .await
        .map_err(to_bfs_error)?;
    store
        .delete(src, Some(src_generation))
        .await
        .map_err(to_bfs_error)
}

/// Renames a directory subtree on a flat (non-hierarchical) bucket by
/// enumerating every descendant and copy+delete-ing each one (§4.4).
/// `rename_dir_limit` of `0` means only an empty directory may be
/// renamed this way (the DESIGN.md Open-Question resolution); any other
/// positive value caps the number of descendants walked before bailing
/// out with `InvalidArgument` rather than performing a partial rename.
pub async fn rename_dir_flat(
    store: &dyn BucketStore,
    src_prefix: &ObjectName,
    dst_prefix: &ObjectName,
    rename_dir_limit: u64,
) -> Result<(), BucketFsError> {
    let entries = list_all(store, src_prefix).await.map_err(to_bfs_error)?;

    if rename_dir_limit == 0 && !entries.is_empty() {
        return Err(BucketFsError::InvalidArgument(format!(
            "{}: directory rename requires an empty directory when rename-dir-limit is 0",
            src_prefix
        )));
    }
    if rename_dir_limit > 0 && entries.len() as u64 > rename_dir_limit {
        return Err(BucketFsError::InvalidArgument(format!(
            "{}: directory has more than {} entries, refusing partial rename",
            src_prefix, rename_dir_limit
        )));
    }

    for entry in &entries {
        if let Some(record) = &entry.record {
            let child_src = src_prefix.join_child(&entry.base_name).map_err(BucketFsError::from)?;
            let child_dst = dst_prefix.join_child(&entry.base_name).map_err(BucketFsError::from)?;
            rename_file(store, &child_src, record.generation, &child_dst).await?;
        } else if entry.is_dir {
            let child_src = src_prefix
                .join_child(&entry.base_name)
                .map_err(BucketFsError::from)?
                .as_placeholder();
            let child_dst = dst_prefix
                .join_child(&entry.base_name)
                .map_err(BucketFsError::from)?
                .as_placeholder();
            // Recursion depth is bounded by the real filesystem's own
            // directory depth; `Box::pin` lets this async fn recurse.
            Box::pin(rename_dir_flat(store, &child_src, &child_dst, rename_dir_limit)).await?;
        }
    }

    // Move the placeholder object for the directory itself, if one exists.
    if let Ok(Some(placeholder)) = store.stat(src_prefix, false).await {
        rename_file(store, src_prefix, placeholder.generation, dst_prefix).await?;
    }

    Ok(())
}

/// Renames a directory via the bucket's native hierarchical-namespace
/// RPC (§4.4), when available.
pub async fn rename_dir_hierarchical(
    store: &dyn BucketStore,
    src_prefix: &ObjectName,
    dst_prefix: &ObjectName,
) -> Result<(), BucketFsError> {
    store
        .rename_folder(src_prefix, dst_prefix)
        .await
        .map_err(to_bfs_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bucketfs_core::domain::{ContinuationToken, Metageneration, RecordKind};
    use bucketfs_core::ports::bucket_store::{ChunkWriter, ListPage, ProgressCallback};
    use bytes::Bytes;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeStore {
        objects: Mutex<HashMap<String, ObjectRecord>>,
    }

    fn sample(name: &str) -> ObjectRecord {
        ObjectRecord {
            name: ObjectName::new(name).unwrap(),
            size: 1,
            generation: Generation(1),
            metageneration: Metageneration(1),
            content_type: None,
            updated: Utc::now(),
            crc32c: None,
            md5: None,
            metadata: HashMap::new(),
            storage_class: None,
            kind: RecordKind::Object,
        }
    }

    #[async_trait]
    impl BucketStore for FakeStore {
        async fn stat(&self, name: &ObjectName, _force_fetch: bool) -> anyhow::Result<Option<ObjectRecord>> {
            Ok(self.objects.lock().unwrap().get(name.as_str()).cloned())
        }

        async fn read_range(&self, _name: &ObjectName, _generation: Generation, _offset: u64, _length: u64) -> anyhow::Result<Bytes> {
            unimplemented!()
        }

        async fn list(
            &self,
            prefix: &ObjectName,
            _delimiter: Option<&str>,
            _include_trailing_delimiter: bool,
            _continuation: Option<&ContinuationToken>,
        ) -> anyhow::Result<ListPage> {
            let objects = self.objects.lock().unwrap();
            let records = objects
                .values()
                .filter(|r| r.name.as_str().starts_with(prefix.as_str()) && r.name != *prefix)
                .cloned()
                .collect();
            Ok(ListPage { records, prefixes: vec![], next_continuation: None })
        }

        async fn create(&self, name: &ObjectName, _data: Vec<u8>, _precondition: Precondition) -> anyhow::Result<ObjectRecord> {
            let record = sample(name.as_str());
            self.objects.lock().unwrap().insert(name.as_str().to_string(), record.clone());
            Ok(record)
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

        async fn copy(&self, src_name: &ObjectName, _src_generation: Generation, dst_name: &ObjectName, _precondition: Precondition) -> anyhow::Result<ObjectRecord> {
            let mut objects = self.objects.lock().unwrap();
            let mut record = objects.get(src_name.as_str()).cloned().expect("src exists");
            record.name = dst_name.clone();
            objects.insert(dst_name.as_str().to_string(), record.clone());
            Ok(record)
        }

        async fn compose(&self, _sources: &[(ObjectName, Generation)], _dst_name: &ObjectName, _precondition: Precondition) -> anyhow::Result<ObjectRecord> {
            unimplemented!()
        }

        async fn delete(&self, name: &ObjectName, _generation: Option<Generation>) -> anyhow::Result<()> {
            self.objects.lock().unwrap().remove(name.as_str());
            Ok(())
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

    #[tokio::test]
    async fn rename_file_copies_then_deletes_source() {
        let store = FakeStore { objects: Mutex::new(HashMap::new()) };
        store.create(&ObjectName::new("a").unwrap(), vec![], Precondition::Any).await.unwrap();

        rename_file(&store, &ObjectName::new("a").unwrap(), Generation(1), &ObjectName::new("b").unwrap())
            .await
            .unwrap();

        let objects = store.objects.lock().unwrap();
        assert!(!objects.contains_key("a"));
        assert!(objects.contains_key("b"));
    }

    #[tokio::test]
    async fn empty_dir_rename_succeeds_with_zero_limit() {
        let store = FakeStore { objects: Mutex::new(HashMap::new()) };
        let result = rename_dir_flat(&store, &ObjectName::new("a/").unwrap(), &ObjectName::new("b/").unwrap(), 0).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn nonempty_dir_rename_rejected_with_zero_limit() {
        let store = FakeStore { objects: Mutex::new(HashMap::new()) };
        store.create(&ObjectName::new("a/child").unwrap(), vec![], Precondition::Any).await.unwrap();

        let result = rename_dir_flat(&store, &ObjectName::new("a/").unwrap(), &ObjectName::new("b/").unwrap(), 0).await;
        assert!(matches!(result, Err(BucketFsError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn nonempty_dir_rename_succeeds_under_positive_limit() {
        let store = FakeStore { objects: Mutex::new(HashMap::new()) };
        store.create(&ObjectName::new("a/child").unwrap(), vec![], Precondition::Any).await.unwrap();

        rename_dir_flat(&store, &ObjectName::new("a/").unwrap(), &ObjectName::new("b/").unwrap(), 10)
            .await
            .unwrap();

        let objects = store.objects.lock().unwrap();
        assert!(objects.contains_key("b/child"));
        assert!(!objects.contains_key("a/child"));
    }
}
