//! On-disk content cache with a SQLite sidecar index (C7, §4.7).
//!
//! Cache entries are content-addressed over `(bucket, object-name,
//! generation)` so a new generation never collides with a stale on-disk
//! copy. Downloads are split into fixed-size chunks and fanned out to a
//! bounded worker pool; a [`bitmap::ChunkBitmap`] lets a read that only
//! needs the first few chunks return before the rest of the file lands.

pub mod bitmap;
pub mod cache;
pub mod content;
pub mod download;
pub mod error;
pub mod index;
pub mod key;
pub mod pool;

pub use cache::FileCache;
pub use error::CacheError;
pub use key::CacheKey;
