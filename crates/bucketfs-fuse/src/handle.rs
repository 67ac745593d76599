//! Directory and file handles (§3): opened on `opendir`/`open`, closed on
//! `releasedir`/`release`. Handle ids share the allocator shape used for
//! inodes but live in a disjoint namespace (§3, §9). Each handle carries
//! the per-open-instance classifier and buffer state the read/write paths
//! need to track across a single open/close lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bucketfs_core::domain::{Generation, InodeId, ObjectRecord};
use bucketfs_core::ports::bucket_store::ChunkWriter;
use bytes::BytesMut;
use dashmap::DashMap;

/// Opaque handle identifier, disjoint from [`InodeId`] (§3).
pub type HandleId = u64;

/// Per-open-instance state for sequential/random access classification
/// (§4.6). A handle starts sequential; two out-of-order reads in a row
/// flip it to random, and two consecutive in-order reads flip it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPattern {
    Sequential,
    Random,
}

pub struct ReadClassifier {
    pattern: AccessPattern,
    expected_offset: u64,
    consecutive_in_order: u32,
    consecutive_out_of_order: u32,
}

impl ReadClassifier {
    fn new() -> Self {
        Self {
            pattern: AccessPattern::Sequential,
            expected_offset: 0,
            consecutive_in_order: 0,
            consecutive_out_of_order: 0,
        }
    }

    /// Updates the classifier with an observed read at `offset` and
    /// returns the pattern to use for serving it (§4.6's "the classifier
    /// decides before the read is dispatched").
    pub fn observe(&mut self, offset: u64, len: u64, random_seek_threshold: u32) -> AccessPattern {
        if offset == self.expected_offset {
            self.consecutive_in_order += 1;
            self.consecutive_out_of_order = 0;
            if self.pattern == AccessPattern::Random && self.consecutive_in_order >= 2 {
                self.pattern = AccessPattern::Sequential;
            }
        } else {
            self.consecutive_out_of_order += 1;
            self.consecutive_in_order = 0;
            if self.consecutive_out_of_order >= random_seek_threshold {
                self.pattern = AccessPattern::Random;
            }
        }
        self.expected_offset = offset + len;
        self.pattern
    }
}

/// Fixed-size accumulation buffer for the streaming block writer (§4.8).
pub struct WriteBlockBuffer {
    pub block_size: usize,
    pub buffer: BytesMut,
    /// Byte offset within the object that `buffer` starts at.
    pub block_start: u64,
    pub bytes_written: u64,
}

impl WriteBlockBuffer {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            buffer: BytesMut::with_capacity(block_size),
            block_start: 0,
            bytes_written: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.block_size
    }
}

/// Directory handle state: a pagination cursor plus a stable name
/// snapshot for this open instance (I7: enumeration order is stable for
/// the lifetime of one handle even if the bucket mutates underneath).
pub struct DirHandle {
    pub inode: InodeId,
    /// Listing generation observed at `opendir` time, used to detect
    /// concurrent mutation for cache invalidation bookkeeping.
    pub opened_at_generation: u64,
    entries: Mutex<Option<Vec<(String, InodeId, bucketfs_core::domain::RecordKind)>>>,
    /// Offset already returned to the kernel across `readdir` calls.
    pub cursor: AtomicU64,
}

impl DirHandle {
    pub fn new(inode: InodeId, opened_at_generation: u64) -> Self {
        Self {
            inode,
            opened_at_generation,
            entries: Mutex::new(None),
            cursor: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Option<Vec<(String, InodeId, bucketfs_core::domain::RecordKind)>> {
        self.entries.lock().unwrap().clone()
    }

    pub fn set_snapshot(&self, entries: Vec<(String, InodeId, bucketfs_core::domain::RecordKind)>) {
        *self.entries.lock().unwrap() = Some(entries);
    }
}

/// Write mode currently active for an open file handle (§4.8).
pub enum WriteMode {
    /// Bytes accumulate in a local temp file; uploaded whole on flush.
    StagedTempFile { path: std::path::PathBuf, file: std::fs::File },
    /// Bytes accumulate in fixed-size blocks, each pushed to `writer` as
    /// it fills; the writer is opened once on the first write and lives
    /// for the whole handle, finalized on flush.
    StreamingBlocks { buffer: WriteBlockBuffer, writer: Box<dyn ChunkWriter> },
}

/// File handle state (§3): classifier for reads, buffer for writes. A
/// handle opened read-only never allocates write state and vice versa.
pub struct FileHandle {
    pub inode: InodeId,
    pub record_generation: Generation,
    pub classifier: Mutex<ReadClassifier>,
    pub write_mode: Mutex<Option<WriteMode>>,
    pub dirty: std::sync::atomic::AtomicBool,
}

impl FileHandle {
    pub fn new(inode: InodeId, record: Option<&ObjectRecord>) -> Self {
        Self {
            inode,
            record_generation: record.map(|r| r.generation).unwrap_or(Generation(0)),
            classifier: Mutex::new(ReadClassifier::new()),
            write_mode: Mutex::new(None),
            dirty: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

/// Disjoint tables for directory and file handles, keyed by an
/// id allocated from a shared counter so directory and file handle ids
/// never collide even though they're stored separately.
pub struct HandleTable {
    dir_handles: DashMap<HandleId, std::sync::Arc<DirHandle>>,
    file_handles: DashMap<HandleId, std::sync::Arc<FileHandle>>,
    next_id: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            dir_handles: DashMap::new(),
            file_handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate(&self) -> HandleId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn open_dir(&self, inode: InodeId, opened_at_generation: u64) -> HandleId {
        let id = self.allocate();
        self.dir_handles.insert(id, std::sync::Arc::new(DirHandle::new(inode, opened_at_generation)));
        id
    }

    pub fn get_dir(&self, id: HandleId) -> Option<std::sync::Arc<DirHandle>> {
        self.dir_handles.get(&id).map(|e| e.clone())
    }

    pub fn close_dir(&self, id: HandleId) {
        self.dir_handles.remove(&id);
    }

    pub fn open_file(&self, inode: InodeId, record: Option<&ObjectRecord>) -> HandleId {
        let id = self.allocate();
        self.file_handles.insert(id, std::sync::Arc::new(FileHandle::new(inode, record)));
        id
    }

    pub fn get_file(&self, id: HandleId) -> Option<std::sync::Arc<FileHandle>> {
        self.file_handles.get(&id).map(|e| e.clone())
    }

    pub fn close_file(&self, id: HandleId) {
        self.file_handles.remove(&id);
    }

    /// Whether any open directory or file handle still references
    /// `inode` (I3/I9: an inode destroy must wait for these, not just a
    /// zero kernel lookup count).
    pub fn has_handle_for(&self, inode: InodeId) -> bool {
        self.dir_handles.iter().any(|e| e.value().inode == inode)
            || self.file_handles.iter().any(|e| e.value().inode == inode)
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_starts_sequential() {
        let mut c = ReadClassifier::new();
        assert_eq!(c.observe(0, 10, 3), AccessPattern::Sequential);
        assert_eq!(c.observe(10, 10, 3), AccessPattern::Sequential);
    }

    #[test]
    fn classifier_flips_to_random_after_threshold() {
        let mut c = ReadClassifier::new();
        c.observe(0, 10, 3);
        c.observe(500, 10, 3);
        c.observe(900, 10, 3);
        assert_eq!(c.observe(100, 10, 3), AccessPattern::Random);
    }

    #[test]
    fn classifier_reverts_to_sequential_after_two_in_order() {
        let mut c = ReadClassifier::new();
        c.observe(0, 10, 2);
        c.observe(500, 10, 2);
        assert_eq!(c.observe(900, 10, 2), AccessPattern::Random);
        let expected = 910;
        c.observe(expected, 10, 2);
        assert_eq!(c.observe(expected + 10, 10, 2), AccessPattern::Sequential);
    }

    #[test]
    fn dir_and_file_handle_ids_never_collide() {
        let table = HandleTable::new();
        let dir_id = table.open_dir(InodeId::ROOT, 0);
        let file_id = table.open_file(InodeId::from(2), None);
        assert_ne!(dir_id, file_id);
        assert!(table.get_dir(dir_id).is_some());
        assert!(table.get_file(file_id).is_some());
    }
}
