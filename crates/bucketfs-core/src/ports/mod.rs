//! Driven ports: interfaces that adapter crates implement and the
//! inode/handle layer consumes.

pub mod bucket_store;

pub use bucket_store::{BucketStore, ChunkWriter, ListPage, Precondition, ProgressCallback};
