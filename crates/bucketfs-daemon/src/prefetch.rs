//! `experimental-metadata-prefetch-on-mount` (§6): walks the whole bucket
//! (or the `only-dir` subtree) once at mount time so the first round of
//! listings and stats on the tree are already warm in the transport layer
//! instead of paying for them lazily on first access.
//!
//! Built on `bucketfs-fuse`'s own `listing::list_all` pagination helper,
//! recursing into every directory it finds.

use std::sync::Arc;

use bucketfs_core::domain::ObjectName;
use bucketfs_core::ports::bucket_store::BucketStore;
use bucketfs_fuse::listing::list_all;
use tracing::{debug, warn};

/// Recursively lists every directory under `root`, logging but not
/// failing the mount on any one listing error — a partial prefetch is
/// still strictly better than none.
pub async fn walk(store: Arc<dyn BucketStore>, root: ObjectName) -> usize {
    let mut visited = 0;
    let mut stack = vec![root];
    while let Some(prefix) = stack.pop() {
        let placeholder = prefix.as_placeholder();
        match list_all(store.as_ref(), &placeholder).await {
            Ok(entries) => {
                visited += entries.len();
                for entry in entries {
                    if entry.is_dir {
                        if let Ok(child) = placeholder.join_child(&entry.base_name) {
                            stack.push(child);
                        }
                    }
                }
            }
            Err(e) => warn!(prefix = placeholder.as_str(), error = %e, "prefetch listing failed"),
        }
    }
    debug!(visited, "metadata prefetch complete");
    visited
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bucketfs_core::domain::{ContinuationToken, Generation};
    use bucketfs_core::ports::bucket_store::{ChunkWriter, ListPage, Precondition, ProgressCallback};
    use bucketfs_core::domain::ObjectRecord;

    struct EmptyStore;

    #[async_trait]
    impl BucketStore for EmptyStore {
        async fn stat(&self, _name: &ObjectName, _force_fetch: bool) -> anyhow::Result<Option<ObjectRecord>> {
            Ok(None)
        }
        async fn read_range(&self, _name: &ObjectName, _generation: Generation, _offset: u64, _length: u64) -> anyhow::Result<bytes::Bytes> {
            unimplemented!()
        }
        async fn list(
            &self,
            _prefix: &ObjectName,
            _delimiter: Option<&str>,
            _include_trailing_delimiter: bool,
            _continuation: Option<&ContinuationToken>,
        ) -> anyhow::Result<ListPage> {
            Ok(ListPage { records: vec![], prefixes: vec![], next_continuation: None })
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
        async fn copy(&self, _src_name: &ObjectName, _src_generation: Generation, _dst_name: &ObjectName, _precondition: Precondition) -> anyhow::Result<ObjectRecord> {
            unimplemented!()
        }
        async fn compose(&self, _sources: &[(ObjectName, Generation)], _dst_name: &ObjectName, _precondition: Precondition) -> anyhow::Result<ObjectRecord> {
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

    #[tokio::test]
    async fn walk_an_empty_bucket_visits_nothing() {
        let store: Arc<dyn BucketStore> = Arc::new(EmptyStore);
        let visited = walk(store, ObjectName::root()).await;
        assert_eq!(visited, 0);
    }
}
