//! On-disk content storage: a hash-prefix directory layout plus
//! `read`/`write_at`/`remove` helpers, keyed by [`crate::key::CacheKey`]
//! instead of a single remote id.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::error::CacheError;
use crate::key::CacheKey;

/// Manages cached file content on disk under `{cache_dir}/content/`.
pub struct ContentStore {
    content_dir: PathBuf,
}

impl ContentStore {
    pub fn new(cache_dir: &std::path::Path) -> Result<Self, CacheError> {
        let content_dir = cache_dir.join("content");
        fs::create_dir_all(&content_dir)?;
        Ok(Self { content_dir })
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        key.content_path(&self.content_dir)
    }

    /// Pre-sizes the cache file to `size` bytes so concurrent chunk
    /// downloads can each `write_at` their own offset without racing on
    /// file growth.
    pub fn allocate(&self, key: &CacheKey, size: u64) -> Result<(), CacheError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.set_len(size)?;
        Ok(())
    }

    pub fn write_at(&self, key: &CacheKey, offset: u64, data: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let mut file = fs::OpenOptions::new().write(true).open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    pub fn read_at(&self, key: &CacheKey, offset: u64, len: u32) -> Result<Vec<u8>, CacheError> {
        let path = self.path_for(key);
        let mut file = File::open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len as usize];
        let bytes_read = file.read(&mut buffer)?;
        buffer.truncate(bytes_read);
        Ok(buffer)
    }

    pub fn exists(&self, key: &CacheKey) -> bool {
        self.path_for(key).exists()
    }

    pub fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn file_size(&self, key: &CacheKey) -> Result<u64, CacheError> {
        Ok(fs::metadata(self.path_for(key))?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketfs_core::domain::{BucketName, Generation, ObjectName};
    use tempfile::tempdir;

    fn key() -> CacheKey {
        CacheKey::new(
            &BucketName::new("b").unwrap(),
            &ObjectName::new("dir/file.txt").unwrap(),
            Generation(1),
        )
    }

    #[test]
    fn allocate_then_write_at_offset_roundtrips() {
        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        let key = key();

        store.allocate(&key, 16).unwrap();
        store.write_at(&key, 8, b"chunk-b!").unwrap();
        store.write_at(&key, 0, b"chunk-a!").unwrap();

        let all = store.read_at(&key, 0, 16).unwrap();
        assert_eq!(&all, b"chunk-a!chunk-b!");
    }

    #[test]
    fn remove_deletes_file() {
        let dir = tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        let key = key();
        store.allocate(&key, 4).unwrap();
        assert!(store.exists(&key));
        store.remove(&key).unwrap();
        assert!(!store.exists(&key));
    }
}
