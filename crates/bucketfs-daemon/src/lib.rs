//! Component wiring for a single bucketfs mount: resolves credentials,
//! builds the bucket-store and file-cache adapters, and drives the
//! `fuser` session. `bucketfs-cli` is a thin command-line front end over
//! this crate; `bucketfsd` drives it directly for unattended/service-
//! managed mounts.

pub mod credentials;
pub mod prefetch;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bucketfs_cache::FileCache;
use bucketfs_core::config::{Config, PrefetchMode};
use bucketfs_core::domain::{BucketName, ObjectName};
use bucketfs_core::ports::bucket_store::BucketStore;
use bucketfs_fuse::BucketFs;
use bucketfs_store::HttpBucketStore;
use fuser::MountOption;
use tracing::info;

use crate::credentials::resolve_credential;

/// A live mount. Dropping this does not unmount — the kernel mount stays
/// up until [`MountedSession::join`] returns or the process exits, the
/// same lifetime contract `fuser::BackgroundSession` itself offers.
pub struct MountedSession {
    inner: fuser::BackgroundSession,
    bucket: BucketName,
}

impl MountedSession {
    /// Blocks until the mount is torn down (e.g. by `fusermount -u`).
    pub fn join(self) {
        self.inner.join();
    }

    pub fn bucket(&self) -> &BucketName {
        &self.bucket
    }
}

/// Validates `config`, resolves credentials, builds the bucket-store and
/// file-cache adapters, and spawns the FUSE session for `mount_point` in
/// a background OS thread. Must be called from within a Tokio runtime —
/// the returned session's filesystem bridges back into it for every
/// operation.
pub async fn mount(config: Config, mount_point: &Path) -> Result<MountedSession> {
    let errors = config.validate();
    if !errors.is_empty() {
        bail!("invalid configuration: {errors:?}");
    }

    let bucket_name = config
        .mount
        .bucket
        .clone()
        .context("config.mount.bucket must be set to the bucket to mount")?;
    let bucket = BucketName::new(bucket_name)?;

    let http = reqwest::Client::builder()
        .pool_max_idle_per_host(config.transport.max_idle_conns_per_host as usize)
        .timeout(Duration::from_secs(config.transport.http_client_timeout_secs))
        .build()
        .context("building the credential-fetch HTTP client")?;
    let credential = resolve_credential(&config.auth, &http).await?;

    let store: Arc<dyn BucketStore> =
        Arc::new(HttpBucketStore::new(bucket.clone(), credential, &config).context("constructing the bucket-store client")?);
    let cache = Arc::new(FileCache::new(config.file_cache.clone()).await.context("opening the file cache")?);
    let rt = tokio::runtime::Handle::current();

    let prefetch_root = config
        .mount
        .only_dir
        .as_ref()
        .and_then(|dir| ObjectName::new(dir.clone()).ok())
        .unwrap_or_else(ObjectName::root);
    match config.metadata_prefetch {
        PrefetchMode::Disabled => {}
        PrefetchMode::Sync => {
            let visited = prefetch::walk(store.clone(), prefetch_root).await;
            info!(visited, "metadata prefetch finished before mount");
        }
        PrefetchMode::Async => {
            let store = store.clone();
            tokio::spawn(async move {
                let visited = prefetch::walk(store, prefetch_root).await;
                info!(visited, "background metadata prefetch finished");
            });
        }
    }

    let fs = BucketFs::new(store, cache, config.clone(), bucket.clone(), rt);

    let fs_name = format!("bucketfs:{}", bucket.as_str());
    let options = vec![MountOption::FSName(fs_name), MountOption::AutoUnmount, MountOption::AllowOther];

    info!(bucket = bucket.as_str(), mount_point = %mount_point.display(), "mounting");
    let inner = fuser::spawn_mount2(fs, mount_point, &options)
        .with_context(|| format!("mounting {} at {}", bucket.as_str(), mount_point.display()))?;

    Ok(MountedSession { inner, bucket })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mount_rejects_config_with_no_bucket() {
        let config = Config::default();
        let dir = tempfile::tempdir().unwrap();
        let result = mount(config, dir.path()).await;
        assert!(result.is_err());
    }
}
