//! The inode table (C3, §3): id allocation, name resolution, reference
//! counting, and rename. A `DashMap<u64, Arc<Inode>>` plus a reverse
//! `(parent, name)` index, since bucket object names rather than a
//! stable remote id are this adapter's identity source (I1).

use std::sync::Arc;

use bucketfs_core::domain::{IdAllocator, InodeId, ObjectName};
use dashmap::DashMap;

use crate::handle::HandleTable;
use crate::inode::{Inode, InodeKind};

/// Composite lookup key: a child name resolved under a specific parent
/// directory inode. Two different parents may have children with the
/// same base name without colliding (I1 is scoped per-directory).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChildKey {
    parent: InodeId,
    name: String,
}

/// Owns every live inode. This is the sole owner (`Arc<Inode>` handles
/// handed out to callers are clones of that ownership, not a second
/// source of truth) — per §9, parent back-references inside `Inode`
/// are plain ids, not strong pointers, so this table is the only thing
/// keeping an inode alive.
pub struct InodeStore {
    by_id: DashMap<InodeId, Arc<Inode>>,
    by_child_key: DashMap<ChildKey, InodeId>,
    allocator: IdAllocator,
}

impl InodeStore {
    pub fn new() -> Self {
        Self::new_with_root(ObjectName::root())
    }

    /// Seeds the root inode with `root_name` rather than the bucket root,
    /// so every path this store resolves is implicitly scoped under it
    /// (§6's `only-dir`: mounting a subtree instead of the whole bucket).
    pub fn new_with_root(root_name: ObjectName) -> Self {
        let store = Self {
            by_id: DashMap::new(),
            by_child_key: DashMap::new(),
            allocator: IdAllocator::starting_at(2),
        };
        let root = Inode::new(InodeId::ROOT, root_name, InodeId::ROOT, InodeKind::Root);
        root.incref();
        store.by_id.insert(InodeId::ROOT, Arc::new(root));
        store
    }

    pub fn get(&self, id: InodeId) -> Option<Arc<Inode>> {
        self.by_id.get(&id).map(|e| e.clone())
    }

    /// Looks up an existing child inode by `(parent, name)`, incrementing
    /// its kernel lookup count (I3) if found.
    pub fn lookup(&self, parent: InodeId, name: &str) -> Option<Arc<Inode>> {
        let key = ChildKey { parent, name: name.to_string() };
        let id = *self.by_child_key.get(&key)?;
        let inode = self.get(id)?;
        inode.incref();
        Some(inode)
    }

    /// Inserts a freshly-resolved child, allocating a new id. Returns the
    /// new inode with its lookup count already at 1 (I3: a fresh lookup
    /// always counts once).
    pub fn insert_child(&self, parent: InodeId, name: ObjectName, kind: InodeKind) -> Arc<Inode> {
        let id = InodeId::from(self.allocator.allocate());
        let inode = Arc::new(Inode::new(id, name.clone(), parent, kind));
        inode.incref();
        self.by_id.insert(id, inode.clone());
        self.by_child_key.insert(
            ChildKey { parent, name: name.base_name().to_string() },
            id,
        );
        inode
    }

    /// Decrements the lookup count by `nlookup` (the kernel's `forget`
    /// semantics) and reaps the inode if it's now destroy-eligible: zero
    /// lookups and no open handle still referencing it (I3).
    pub fn forget(&self, id: InodeId, nlookup: u64, handles: &HandleTable) {
        if id.is_root() {
            return;
        }
        let Some(inode) = self.get(id) else { return };
        inode.forget(nlookup);
        self.reap_if_eligible(id, handles);
    }

    /// Drops the name-index entry for `id`, e.g. after `unlink`/`rmdir`,
    /// so future lookups by name miss immediately — then reaps the
    /// table entry too if no handle is currently open on it. If a
    /// handle is open, the `Arc<Inode>` stays reachable via `get(id)`
    /// until [`Self::reap_if_eligible`] runs again on handle close
    /// (I3's delete-while-open: the fd keeps working after unlink).
    pub fn destroy(&self, id: InodeId, handles: &HandleTable) {
        let Some(inode) = self.get(id) else { return };
        let parent = *inode.parent.lock().unwrap();
        let name = inode.name();
        self.by_child_key.remove(&ChildKey { parent, name: name.base_name().to_string() });
        inode.mark_unlinked();
        self.reap_if_eligible(id, handles);
    }

    /// Call after a handle referencing `id` closes (`release`/
    /// `releasedir`): an inode that became destroy-eligible while that
    /// was its last open handle needs reaping now, since an unlinked
    /// name will never get another kernel `forget` to trigger it.
    pub fn on_handle_closed(&self, id: InodeId, handles: &HandleTable) {
        self.reap_if_eligible(id, handles);
    }

    /// Removes `id` from both tables if it's destroy-eligible: no open
    /// handle, and either already unlinked or at a zero lookup count
    /// (I3). A no-op otherwise, so this is safe to call speculatively.
    fn reap_if_eligible(&self, id: InodeId, handles: &HandleTable) {
        let Some(inode) = self.get(id) else { return };
        if handles.has_handle_for(id) {
            return;
        }
        if !inode.is_unlinked() && inode.lookup_count() > 0 {
            return;
        }
        if self.by_id.remove(&id).is_some() {
            let parent = *inode.parent.lock().unwrap();
            let name = inode.name();
            self.by_child_key.remove(&ChildKey { parent, name: name.base_name().to_string() });
        }
    }

    /// Rebinds an inode's identity under a new parent/name pair (I1),
    /// used by the rename path (§4.4). The inode keeps its id.
    pub fn rename(&self, id: InodeId, new_parent: InodeId, new_name: ObjectName) {
        let Some(inode) = self.get(id) else { return };
        let old_parent = *inode.parent.lock().unwrap();
        let old_name = inode.name();
        self.by_child_key.remove(&ChildKey { parent: old_parent, name: old_name.base_name().to_string() });

        *inode.parent.lock().unwrap() = new_parent;
        inode.set_name(new_name.clone());
        self.by_child_key.insert(
            ChildKey { parent: new_parent, name: new_name.base_name().to_string() },
            id,
        );
    }

    /// All child ids currently indexed under `parent`, used by readdir's
    /// fallback path when no live listing snapshot exists.
    pub fn children_of(&self, parent: InodeId) -> Vec<InodeId> {
        self.by_child_key
            .iter()
            .filter(|entry| entry.key().parent == parent)
            .map(|entry| *entry.value())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }
}

impl Default for InodeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preseeded() {
        let store = InodeStore::new();
        assert!(store.get(InodeId::ROOT).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn insert_then_lookup_bumps_refcount() {
        let store = InodeStore::new();
        let inode = store.insert_child(InodeId::ROOT, ObjectName::new("foo").unwrap(), InodeKind::new_dir());
        assert_eq!(inode.lookup_count(), 1);

        let found = store.lookup(InodeId::ROOT, "foo").unwrap();
        assert_eq!(found.id, inode.id);
        assert_eq!(found.lookup_count(), 2);
    }

    #[test]
    fn forget_to_zero_destroys() {
        let store = InodeStore::new();
        let handles = HandleTable::new();
        let inode = store.insert_child(InodeId::ROOT, ObjectName::new("foo").unwrap(), InodeKind::new_dir());
        let id = inode.id;
        drop(inode);
        store.forget(id, 1, &handles);
        assert!(store.get(id).is_none());
        assert!(store.lookup(InodeId::ROOT, "foo").is_none());
    }

    #[test]
    fn forget_to_zero_with_open_handle_keeps_inode_alive() {
        let store = InodeStore::new();
        let handles = HandleTable::new();
        let inode = store.insert_child(InodeId::ROOT, ObjectName::new("foo").unwrap(), InodeKind::new_file(None, true));
        let id = inode.id;
        let fh = handles.open_file(id, None);
        drop(inode);

        store.forget(id, 1, &handles);
        assert!(store.get(id).is_some(), "inode must survive while a handle is open");

        handles.close_file(fh);
        store.on_handle_closed(id, &handles);
        assert!(store.get(id).is_none());
    }

    #[test]
    fn destroy_with_open_handle_removes_name_but_keeps_inode() {
        let store = InodeStore::new();
        let handles = HandleTable::new();
        let inode = store.insert_child(InodeId::ROOT, ObjectName::new("foo").unwrap(), InodeKind::new_file(None, true));
        let id = inode.id;
        let fh = handles.open_file(id, None);

        store.destroy(id, &handles);
        assert!(store.lookup(InodeId::ROOT, "foo").is_none(), "unlinked name must not resolve");
        assert!(store.get(id).is_some(), "still-open handle keeps the inode reachable by id");

        handles.close_file(fh);
        store.on_handle_closed(id, &handles);
        assert!(store.get(id).is_none());
    }

    #[test]
    fn rename_rebinds_child_key() {
        let store = InodeStore::new();
        let dir = store.insert_child(InodeId::ROOT, ObjectName::new("d/").unwrap(), InodeKind::new_dir());
        let inode = store.insert_child(InodeId::ROOT, ObjectName::new("foo").unwrap(), InodeKind::new_dir());
        store.rename(inode.id, dir.id, ObjectName::new("d/bar").unwrap());

        assert!(store.lookup(InodeId::ROOT, "foo").is_none());
        let found = store.lookup(dir.id, "bar").unwrap();
        assert_eq!(found.id, inode.id);
    }

    #[test]
    fn root_forget_is_ignored() {
        let store = InodeStore::new();
        let handles = HandleTable::new();
        store.forget(InodeId::ROOT, 1_000_000, &handles);
        assert!(store.get(InodeId::ROOT).is_some());
    }
}
