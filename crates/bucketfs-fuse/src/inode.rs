//! Inode variants (C4, §3): Dir, File, Symlink, ExplicitDir, plus the
//! shared fields every inode carries. An `AtomicU64` lookup counter and a
//! `kind` tag, with the kind modeled as a capability-set enum per
//! DESIGN.md since these inode kinds differ enough in mutable state
//! (content object, record generation) that one flat struct would carry
//! mostly-dead fields per variant.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use bucketfs_core::domain::{Generation, InodeId, ObjectName, ObjectRecord};

/// Per-directory child-name type cache (§4.2), distinct from the
/// process-wide [`crate::metadata_cache::TypeCache`]: each dir inode
/// carries its own so a lookup can short-circuit without touching the
/// shared cache's locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildType {
    File,
    Dir,
    Symlink,
    Nonexistent,
}

struct ChildTypeEntry {
    ty: ChildType,
    inserted_at: Instant,
}

/// Mutable state specific to a directory inode.
pub struct DirState {
    /// Bumped on every observed mutation of this directory's listing;
    /// used to drive kernel list-cache invalidation (§4.2, I7).
    pub list_generation: AtomicU64,
    child_types: Mutex<HashMap<String, ChildTypeEntry>>,
    /// Present for hierarchical-bucket folders and explicit-dir
    /// placeholders; `None` for a purely implicit directory.
    pub folder_record: Mutex<Option<ObjectRecord>>,
}

impl DirState {
    fn new() -> Self {
        Self {
            list_generation: AtomicU64::new(0),
            child_types: Mutex::new(HashMap::new()),
            folder_record: Mutex::new(None),
        }
    }

    pub fn bump_generation(&self) {
        self.list_generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.list_generation.load(Ordering::SeqCst)
    }

    pub fn note_child_type(&self, name: &str, ty: ChildType) {
        self.child_types.lock().unwrap().insert(
            name.to_string(),
            ChildTypeEntry { ty, inserted_at: Instant::now() },
        );
    }

    pub fn child_type(&self, name: &str, ttl: std::time::Duration) -> Option<ChildType> {
        let guard = self.child_types.lock().unwrap();
        guard.get(name).and_then(|entry| {
            if entry.inserted_at.elapsed() < ttl {
                Some(entry.ty)
            } else {
                None
            }
        })
    }

    pub fn invalidate_child(&self, name: &str) {
        self.child_types.lock().unwrap().remove(name);
    }
}

/// How a file inode's bytes are currently backed (I5): either a local
/// content object (being written or served from the file cache) or a
/// direct delegation to the bucket store. The two never overlap for the
/// same inode at once.
pub enum ContentMode {
    /// Reads/writes go straight to the bucket store / file cache.
    Remote,
    /// A write is in flight; staged bytes live under the write path's
    /// own storage (temp file or in-memory blocks), not yet uploaded.
    Dirty,
}

/// Mutable state specific to a file inode.
pub struct FileState {
    /// Most recent object record observed from the bucket (I4: the
    /// source generation derived from this never decreases).
    pub record: Mutex<Option<ObjectRecord>>,
    /// The generation a local write was last reconciled against (§4.4).
    pub source_generation: AtomicU64,
    pub content_mode: Mutex<ContentMode>,
    /// True for an object that exists only locally and has never been
    /// uploaded (e.g. between `create()` and first `flush()`).
    pub is_local: Mutex<bool>,
}

impl FileState {
    fn new(record: Option<ObjectRecord>, is_local: bool) -> Self {
        let source_generation = record.as_ref().map(|r| r.generation.get()).unwrap_or(0);
        Self {
            record: Mutex::new(record),
            source_generation: AtomicU64::new(source_generation as u64),
            content_mode: Mutex::new(ContentMode::Remote),
            is_local: Mutex::new(is_local),
        }
    }

    pub fn source_generation(&self) -> Generation {
        Generation(self.source_generation.load(Ordering::SeqCst) as i64)
    }

    /// Advances the source generation; per I4 this must never move backward.
    pub fn advance_source_generation(&self, new_value: Generation) {
        let new_value = new_value.get().max(0) as u64;
        let _ = self
            .source_generation
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                if new_value > cur { Some(new_value) } else { None }
            });
    }

    pub fn set_record(&self, record: ObjectRecord) {
        self.advance_source_generation(record.generation);
        *self.record.lock().unwrap() = Some(record);
    }

    pub fn current_record(&self) -> Option<ObjectRecord> {
        self.record.lock().unwrap().clone()
    }
}

/// The tagged variant every inode carries (§3, §9 "capability set").
pub enum InodeKind {
    Root,
    Dir(DirState),
    ExplicitDir(DirState),
    File(FileState),
    /// A file inode whose content is a symlink target stored under
    /// `ObjectRecord::SYMLINK_TARGET_KEY`.
    Symlink(FileState),
}

impl InodeKind {
    pub fn new_dir() -> Self {
        InodeKind::Dir(DirState::new())
    }

    pub fn new_explicit_dir(record: ObjectRecord) -> Self {
        let state = DirState::new();
        *state.folder_record.lock().unwrap() = Some(record);
        InodeKind::ExplicitDir(state)
    }

    pub fn new_file(record: Option<ObjectRecord>, is_local: bool) -> Self {
        InodeKind::File(FileState::new(record, is_local))
    }

    pub fn new_symlink(record: Option<ObjectRecord>, is_local: bool) -> Self {
        InodeKind::Symlink(FileState::new(record, is_local))
    }

    pub fn is_dir_like(&self) -> bool {
        matches!(self, InodeKind::Root | InodeKind::Dir(_) | InodeKind::ExplicitDir(_))
    }

    pub fn as_dir_state(&self) -> Option<&DirState> {
        match self {
            InodeKind::Dir(s) | InodeKind::ExplicitDir(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_file_state(&self) -> Option<&FileState> {
        match self {
            InodeKind::File(s) | InodeKind::Symlink(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, InodeKind::Symlink(_))
    }
}

/// A single inode (§3): identifier, reference count, the name it was
/// last resolved under, and its variant-specific state. Back-references
/// to the parent are non-owning names, not `Arc` pointers (§9): ownership
/// of every inode lives solely in [`crate::store::InodeStore`].
pub struct Inode {
    pub id: InodeId,
    /// Kernel lookup-count minus forgets (I3); destroyable at zero with
    /// no open handles.
    lookup_count: AtomicU64,
    /// Object name this inode currently resolves to. Protected by a
    /// mutex since rename (I1) atomically rebinds it.
    name: Mutex<ObjectName>,
    pub parent: Mutex<InodeId>,
    pub kind: InodeKind,
    /// Set by `unlink`/`rmdir` (I3): the name index entry is gone
    /// regardless of this inode's lookup count, so once the last open
    /// handle closes it's destroy-eligible without waiting for a kernel
    /// `forget` that may never arrive for a name that no longer exists.
    unlinked: std::sync::atomic::AtomicBool,
}

impl Inode {
    pub fn new(id: InodeId, name: ObjectName, parent: InodeId, kind: InodeKind) -> Self {
        Self {
            id,
            lookup_count: AtomicU64::new(0),
            name: Mutex::new(name),
            parent: Mutex::new(parent),
            kind,
            unlinked: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn mark_unlinked(&self) {
        self.unlinked.store(true, Ordering::SeqCst);
    }

    pub fn is_unlinked(&self) -> bool {
        self.unlinked.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> ObjectName {
        self.name.lock().unwrap().clone()
    }

    pub fn set_name(&self, name: ObjectName) {
        *self.name.lock().unwrap() = name;
    }

    pub fn incref(&self) -> u64 {
        self.lookup_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrements the lookup count by `n`, returning the new value.
    pub fn forget(&self, n: u64) -> u64 {
        let mut current = self.lookup_count.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_sub(n);
            match self.lookup_count.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn lookup_count(&self) -> u64 {
        self.lookup_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forget_never_underflows() {
        let inode = Inode::new(InodeId::from(2), ObjectName::new("a").unwrap(), InodeId::ROOT, InodeKind::new_dir());
        inode.incref();
        assert_eq!(inode.forget(5), 0);
    }

    #[test]
    fn dir_state_generation_monotonically_increases() {
        let state = DirState::new();
        assert_eq!(state.generation(), 0);
        state.bump_generation();
        state.bump_generation();
        assert_eq!(state.generation(), 2);
    }

    #[test]
    fn child_type_ttl_expires() {
        let state = DirState::new();
        state.note_child_type("foo", ChildType::File);
        assert_eq!(state.child_type("foo", std::time::Duration::from_secs(60)), Some(ChildType::File));
        assert_eq!(state.child_type("foo", std::time::Duration::from_nanos(0)), None);
    }

    #[test]
    fn source_generation_never_decreases() {
        let state = FileState::new(None, true);
        state.advance_source_generation(Generation(5));
        state.advance_source_generation(Generation(2));
        assert_eq!(state.source_generation(), Generation(5));
    }
}
