//! Content-addressed cache key: a stable hash of the cached name split
//! into a two-char prefix directory plus the remainder, over
//! `(bucket, object-name, generation)` (§4.7) instead of a single remote id,
//! since a new generation of the same name must never collide with the old
//! one on disk.

use std::path::PathBuf;

use bucketfs_core::domain::{BucketName, Generation, ObjectName};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    hash: String,
}

impl CacheKey {
    pub fn new(bucket: &BucketName, name: &ObjectName, generation: Generation) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bucket.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(name.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(generation.get().to_le_bytes());
        let hash = format!("{:x}", hasher.finalize());
        Self { hash }
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }

    /// Reconstructs a key from an index row's `key_hash` column, for
    /// operations (eviction) that only have the hash on hand.
    pub fn from_hash(hash: String) -> Self {
        Self { hash }
    }

    /// Path to the cached content file under `content_dir`, laid out as
    /// `{first_2_hex_chars}/{rest}` to avoid one directory with millions of
    /// entries.
    pub fn content_path(&self, content_dir: &std::path::Path) -> PathBuf {
        let (prefix, rest) = self.hash.split_at(2);
        content_dir.join(prefix).join(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn different_generations_hash_to_different_keys() {
        let bucket = BucketName::new("b").unwrap();
        let name = ObjectName::new("a/b").unwrap();
        let k1 = CacheKey::new(&bucket, &name, Generation(1));
        let k2 = CacheKey::new(&bucket, &name, Generation(2));
        assert_ne!(k1, k2);
    }

    #[test]
    fn content_path_splits_hash_into_prefix_directory() {
        let bucket = BucketName::new("b").unwrap();
        let name = ObjectName::new("a/b").unwrap();
        let key = CacheKey::new(&bucket, &name, Generation(1));
        let path = key.content_path(std::path::Path::new("/cache"));
        let hash = key.as_str();
        assert_eq!(
            path,
            std::path::Path::new("/cache").join(&hash[..2]).join(&hash[2..])
        );
    }
}
