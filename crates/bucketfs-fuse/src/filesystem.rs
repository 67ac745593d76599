//! The kernel-protocol adapter (C9, §4.9): the `fuser::Filesystem` trait
//! implementation tying the inode store, handle table, read/write paths,
//! and rename algorithms together.
//!
//! Classic `fuser` 0.16 callback shapes, a `rt_handle: Handle` field for
//! bridging into async code, and `init()`'s use of `block_on` for
//! one-shot mount-time setup. Every operation that needs the bucket store
//! spawns a task that owns the `Reply*` object and calls it once the
//! awaited work completes (fire-and-reply), since `fuser`'s reply types
//! are `Send + 'static` and every request here may need the network.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bucketfs_core::config::Config;
use bucketfs_core::domain::{BucketName, Generation, InodeId, ObjectName, ObjectRecord, RecordKind};
use bucketfs_core::error::BucketFsError;
use bucketfs_core::ports::bucket_store::{BucketStore, Precondition};
use bucketfs_cache::FileCache;
use fuser::{
    FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::attrs;
use crate::handle::HandleTable;
use crate::inode::{Inode, InodeKind};
use crate::listing::list_all;
use crate::metadata_cache::StatCache;
use crate::read::ReadPath;
use crate::rename;
use crate::store::InodeStore;
use crate::write;

const NAME_MAX: usize = 1024;

fn name_to_str(name: &OsStr) -> Result<&str, i32> {
    name.to_str().ok_or(libc::EINVAL)
}

fn validate_name_len(name: &str) -> Result<(), i32> {
    if name.len() > NAME_MAX {
        Err(libc::ENAMETOOLONG)
    } else {
        Ok(())
    }
}

/// The shared, cheaply-cloned core every async helper and `spawn`ed task
/// operates against. Kept separate from [`BucketFs`] so the trait impl's
/// `&mut self` methods can clone a handful of `Arc`s into a `'static`
/// async block without cloning a `&mut` receiver.
pub struct Shared {
    pub inodes: InodeStore,
    pub handles: HandleTable,
    pub stat_cache: StatCache,
    pub store: Arc<dyn BucketStore>,
    pub cache: Arc<FileCache>,
    pub read_path: ReadPath,
    pub config: Config,
    pub bucket: BucketName,
}

/// The `fuser::Filesystem` implementation. Holds a `tokio::runtime::Handle`
/// so its synchronous trait methods can bridge into the async bucket
/// store and file cache.
pub struct BucketFs {
    shared: Arc<Shared>,
    rt: Handle,
}

impl BucketFs {
    pub fn new(
        store: Arc<dyn BucketStore>,
        cache: Arc<FileCache>,
        config: Config,
        bucket: BucketName,
        rt: Handle,
    ) -> Self {
        let read_path = ReadPath {
            store: store.clone(),
            cache: cache.clone(),
            bucket: bucket.clone(),
            random_seek_threshold: config.read.random_seek_threshold,
            sequential_prefetch_bytes: config.read.sequential_read_size_mb as u64 * 1024 * 1024,
        };
        let stat_cache = StatCache::new(
            config.metadata_cache.stat_cache_max_size_mb,
            config.metadata_cache.ttl(),
            config.metadata_cache.negative_ttl(),
        );
        // `only-dir` (§6) restricts the mount to a subtree: the root
        // inode's own name becomes that prefix, so every path resolved
        // under it is implicitly scoped without the rest of the adapter
        // needing to know a restriction is in effect.
        let root_name = match &config.mount.only_dir {
            Some(dir) => ObjectName::new(dir.clone()).unwrap_or_else(|_| ObjectName::root()).as_placeholder(),
            None => ObjectName::root(),
        };
        let shared = Arc::new(Shared {
            inodes: InodeStore::new_with_root(root_name),
            handles: HandleTable::new(),
            stat_cache,
            store,
            cache,
            read_path,
            config,
            bucket,
        });
        Self { shared, rt }
    }

    fn attr_ttl(&self) -> Duration {
        attrs::ATTR_TTL
    }

    /// Maps a domain error to the errno handed back to the kernel. An
    /// `InvariantViolation` is always logged at `error`; if
    /// `exit-on-invariant-violation` is set, the whole process exits
    /// rather than letting the mount continue in a state one of its own
    /// invariants says shouldn't be reachable (§6.1/§6.2).
    fn errno_reply(shared: &Shared, err: BucketFsError) -> i32 {
        if let BucketFsError::InvariantViolation(ref msg) = err {
            tracing::error!(%msg, "invariant violation");
            if shared.config.exit_on_invariant_violation {
                std::process::exit(1);
            }
        }
        libc::c_int::from(err)
    }

    /// Resolves (and, if necessary, creates) the inode for a name freshly
    /// observed under `parent` during `lookup`/`create`/`mkdir` (I1, I2).
    async fn resolve_child(
        shared: &Shared,
        parent: InodeId,
        child_name: &str,
    ) -> Result<Arc<Inode>, BucketFsError> {
        if let Some(existing) = shared.inodes.lookup(parent, child_name) {
            return Ok(existing);
        }

        let parent_inode = shared.inodes.get(parent).ok_or_else(|| BucketFsError::NotFound(parent.to_string()))?;
        let parent_name = parent_inode.name();
        let full_name = parent_name
            .join_child(child_name)
            .map_err(BucketFsError::from)?;

        match shared.stat_cache.get(full_name.as_str()) {
            Ok(Some(record)) => Ok(Self::insert_file_or_symlink(shared, parent, full_name, record)),
            Ok(None) => {
                if let Some(dir) = Self::resolve_implicit_dir(shared, parent, &full_name).await? {
                    Ok(dir)
                } else {
                    Err(BucketFsError::NotFound(full_name.to_string()))
                }
            }
            Err(()) => {
                match shared.store.stat(&full_name, false).await.map_err(BucketFsError::from)? {
                    Some(record) => {
                        shared.stat_cache.put(full_name.as_str(), record.clone());
                        Ok(Self::insert_file_or_symlink(shared, parent, full_name, record))
                    }
                    None => {
                        let placeholder = full_name.as_placeholder();
                        match shared.store.stat(&placeholder, false).await.map_err(BucketFsError::from)? {
                            Some(record) => {
                                shared.stat_cache.put(placeholder.as_str(), record.clone());
                                Ok(shared.inodes.insert_child(parent, placeholder, InodeKind::new_explicit_dir(record)))
                            }
                            None => {
                                if let Some(dir) = Self::resolve_implicit_dir(shared, parent, &full_name).await? {
                                    Ok(dir)
                                } else {
                                    shared.stat_cache.put_negative(full_name.as_str());
                                    Err(BucketFsError::NotFound(full_name.to_string()))
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Implicit directories (§4.4) have no object of their own; their
    /// existence is only provable by a non-empty listing under their prefix.
    async fn resolve_implicit_dir(
        shared: &Shared,
        parent: InodeId,
        full_name: &ObjectName,
    ) -> Result<Option<Arc<Inode>>, BucketFsError> {
        if !shared.config.listing.implicit_dirs {
            return Ok(None);
        }
        let placeholder = full_name.as_placeholder();
        let page = shared
            .store
            .list(&placeholder, Some("/"), false, None)
            .await
            .map_err(BucketFsError::from)?;
        if page.records.is_empty() && page.prefixes.is_empty() {
            return Ok(None);
        }
        Ok(Some(shared.inodes.insert_child(parent, placeholder, InodeKind::new_dir())))
    }

    fn insert_file_or_symlink(shared: &Shared, parent: InodeId, name: ObjectName, record: ObjectRecord) -> Arc<Inode> {
        if record.symlink_target().is_some() {
            shared.inodes.insert_child(parent, name, InodeKind::new_symlink(Some(record), false))
        } else {
            shared.inodes.insert_child(parent, name, InodeKind::new_file(Some(record), false))
        }
    }

    fn file_attr_for(shared: &Shared, inode: &Inode) -> Option<fuser::FileAttr> {
        match &inode.kind {
            InodeKind::Root | InodeKind::Dir(_) | InodeKind::ExplicitDir(_) => {
                Some(attrs::dir_attr(inode.id.get(), &shared.config.attrs))
            }
            InodeKind::File(state) | InodeKind::Symlink(state) => {
                let is_symlink = inode.kind.is_symlink();
                match state.current_record() {
                    Some(record) => Some(attrs::file_attr(inode.id.get(), &record, is_symlink, &shared.config.attrs)),
                    None => Some(attrs::local_file_attr(inode.id.get(), 0, is_symlink, &shared.config.attrs)),
                }
            }
        }
    }
}

impl Filesystem for BucketFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut fuser::KernelConfig) -> Result<(), libc::c_int> {
        tracing::info!(bucket = %self.shared.bucket, "mounting bucket");
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("unmounting");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name_str = match name_to_str(name) {
            Ok(s) => s,
            Err(e) => return reply.error(e),
        };
        if let Err(e) = validate_name_len(name_str) {
            return reply.error(e);
        }
        debug!(parent, name = name_str, "lookup");

        let shared = self.shared.clone();
        let name_owned = name_str.to_string();
        let ttl = self.attr_ttl();
        self.rt.spawn(async move {
            match Self::resolve_child(&shared, InodeId::from(parent), &name_owned).await {
                Ok(inode) => match Self::file_attr_for(&shared, &inode) {
                    Some(attr) => reply.entry(&ttl, &attr, 0),
                    None => reply.error(libc::EIO),
                },
                Err(e) => reply.error(Self::errno_reply(&shared, e)),
            }
        });
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.shared.inodes.forget(InodeId::from(ino), nlookup, &self.shared.handles);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let shared = self.shared.clone();
        let ttl = self.attr_ttl();
        self.rt.spawn(async move {
            match shared.inodes.get(InodeId::from(ino)) {
                Some(inode) => match Self::file_attr_for(&shared, &inode) {
                    Some(attr) => reply.attr(&ttl, &attr),
                    None => reply.error(libc::EIO),
                },
                None => reply.error(libc::ENOENT),
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let shared = self.shared.clone();
        let ttl = self.attr_ttl();
        self.rt.spawn(async move {
            let Some(inode) = shared.inodes.get(InodeId::from(ino)) else {
                return reply.error(libc::ENOENT);
            };
            if let (Some(new_size), Some(state)) = (size, inode.kind.as_file_state()) {
                // Truncation only updates the in-memory record's size; the
                // actual content resize happens on the next write/flush
                // through the write path (§4.8) — size is corrected on the
                // next stat.
                if let Some(mut record) = state.current_record() {
                    record.size = new_size;
                    state.set_record(record);
                }
            }
            match Self::file_attr_for(&shared, &inode) {
                Some(attr) => reply.attr(&ttl, &attr),
                None => reply.error(libc::EIO),
            }
        });
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let shared = self.shared.clone();
        self.rt.spawn(async move {
            let Some(inode) = shared.inodes.get(InodeId::from(ino)) else {
                return reply.error(libc::ENOENT);
            };
            let Some(state) = inode.kind.as_file_state() else {
                return reply.error(libc::EINVAL);
            };
            match state.current_record().and_then(|r| r.symlink_target().map(str::to_string)) {
                Some(target) => reply.data(target.as_bytes()),
                None => reply.error(libc::EINVAL),
            }
        });
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let shared = self.shared.clone();
        self.rt.spawn(async move {
            let Some(inode) = shared.inodes.get(InodeId::from(ino)) else {
                return reply.error(libc::ENOENT);
            };
            if !inode.kind.is_dir_like() {
                return reply.error(libc::ENOTDIR);
            }
            let generation = inode.kind.as_dir_state().map(|s| s.generation()).unwrap_or(0);
            let fh = shared.handles.open_dir(InodeId::from(ino), generation);
            reply.opened(fh, 0);
        });
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let shared = self.shared.clone();
        self.rt.spawn(async move {
            let Some(dir_handle) = shared.handles.get_dir(fh) else {
                return reply.error(libc::EBADF);
            };
            let Some(inode) = shared.inodes.get(InodeId::from(ino)) else {
                return reply.error(libc::ENOENT);
            };

            let snapshot = match dir_handle.snapshot() {
                Some(entries) => entries,
                None => {
                    let prefix = inode.name().as_placeholder();
                    let entries = match list_all(shared.store.as_ref(), &prefix).await {
                        Ok(entries) => entries,
                        Err(e) => return reply.error(Self::errno_reply(&shared, e.into())),
                    };
                    let mut built = Vec::with_capacity(entries.len());
                    for entry in entries {
                        let child_name = match prefix.join_child(&entry.base_name) {
                            Ok(n) => n,
                            Err(_) => continue,
                        };
                        let child_inode = if let Some(record) = entry.record {
                            shared.stat_cache.put(child_name.as_str(), record.clone());
                            Self::insert_file_or_symlink(&shared, inode.id, child_name, record)
                        } else {
                            let dir_name = child_name.as_placeholder();
                            shared.inodes.insert_child(inode.id, dir_name, InodeKind::new_dir())
                        };
                        built.push((entry.base_name, child_inode.id, if entry.is_dir { RecordKind::Folder } else { RecordKind::Object }));
                    }
                    dir_handle.set_snapshot(built.clone());
                    built
                }
            };

            let parent_ino = if ino == InodeId::ROOT.get() { InodeId::ROOT.get() } else { (*inode.parent.lock().unwrap()).get() };

            let mut pos: i64 = 0;
            let mut base_entries: Vec<(u64, FileType, String)> = vec![
                (ino, FileType::Directory, ".".to_string()),
                (parent_ino, FileType::Directory, "..".to_string()),
            ];
            for (name, id, kind) in &snapshot {
                let file_type = if *kind == RecordKind::Folder || shared.inodes.get(*id).map(|i| i.kind.is_dir_like()).unwrap_or(false) {
                    FileType::Directory
                } else {
                    FileType::RegularFile
                };
                base_entries.push((id.get(), file_type, name.clone()));
            }

            for (entry_ino, file_type, name) in base_entries.into_iter() {
                if pos >= offset {
                    let next = pos + 1;
                    if reply.add(entry_ino, next, file_type, OsStr::new(&name)) {
                        break;
                    }
                }
                pos += 1;
            }
            reply.ok();
        });
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        let shared = &self.shared;
        if let Some(dir_handle) = shared.handles.get_dir(fh) {
            let inode_id = dir_handle.inode;
            shared.handles.close_dir(fh);
            shared.inodes.on_handle_closed(inode_id, &shared.handles);
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let shared = self.shared.clone();
        self.rt.spawn(async move {
            let Some(inode) = shared.inodes.get(InodeId::from(ino)) else {
                return reply.error(libc::ENOENT);
            };
            if inode.kind.is_dir_like() {
                return reply.error(libc::EISDIR);
            }
            let record = inode.kind.as_file_state().and_then(|s| s.current_record());
            let fh = shared.handles.open_file(InodeId::from(ino), record.as_ref());
            reply.opened(fh, 0);
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let shared = self.shared.clone();
        self.rt.spawn(async move {
            let Some(handle) = shared.handles.get_file(fh) else {
                return reply.error(libc::EBADF);
            };
            let Some(inode) = shared.inodes.get(InodeId::from(ino)) else {
                return reply.error(libc::ENOENT);
            };
            let Some(state) = inode.kind.as_file_state() else {
                return reply.error(libc::EISDIR);
            };
            let Some(record) = state.current_record() else {
                return reply.data(&[]);
            };
            match shared.read_path.read(&handle, &record, offset as u64, size).await {
                Ok(bytes) => reply.data(&bytes),
                Err(e) => reply.error(Self::errno_reply(&shared, e)),
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let shared = self.shared.clone();
        let data = data.to_vec();
        self.rt.spawn(async move {
            let Some(handle) = shared.handles.get_file(fh) else {
                return reply.error(libc::EBADF);
            };
            let Some(inode) = shared.inodes.get(InodeId::from(ino)) else {
                return reply.error(libc::ENOENT);
            };
            let Some(state) = inode.kind.as_file_state() else {
                return reply.error(libc::EISDIR);
            };

            // Taken out of the mutex before any `.await` so the guard
            // (non-`Send`) never crosses a suspension point in this task.
            let mut mode = handle.write_mode.lock().unwrap().take();

            let streaming = shared.config.write.enable_streaming_writes;
            if mode.is_none() {
                if streaming {
                    let block_size = (shared.config.write.block_size_mb as usize) * 1024 * 1024;
                    let name = inode.name();
                    match shared.store.open_chunk_writer(&name, block_size, Precondition::Any, None).await {
                        Ok(writer) => {
                            mode = Some(crate::handle::WriteMode::StreamingBlocks {
                                buffer: crate::handle::WriteBlockBuffer::new(block_size),
                                writer,
                            });
                        }
                        Err(e) => return reply.error(Self::errno_reply(&shared, BucketFsError::from(e))),
                    }
                } else {
                    let path = std::env::temp_dir().join(format!("bucketfs-write-{}-{}", ino, fh));
                    match std::fs::File::options().read(true).write(true).create(true).truncate(false).open(&path) {
                        Ok(file) => mode = Some(crate::handle::WriteMode::StagedTempFile { path, file }),
                        Err(e) => return reply.error(BucketFsError::from(e).into()),
                    }
                }
            }

            let offset = offset as u64;
            let len = data.len() as u32;
            let result: Result<(), BucketFsError> = match mode.as_mut().unwrap() {
                crate::handle::WriteMode::StagedTempFile { file, .. } => {
                    write::staged_write(file, offset, &data).map_err(BucketFsError::from)
                }
                crate::handle::WriteMode::StreamingBlocks { buffer, writer } => {
                    write::stream_write(buffer, writer.as_mut(), &data).await
                }
            };
            *handle.write_mode.lock().unwrap() = mode;
            handle.dirty.store(true, std::sync::atomic::Ordering::SeqCst);

            match result {
                Ok(()) => {
                    if let Some(mut record) = state.current_record() {
                        record.size = record.size.max(offset + len as u64);
                        state.set_record(record);
                    }
                    reply.written(len)
                }
                Err(e) => reply.error(Self::errno_reply(&shared, e)),
            }
        });
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let shared = self.shared.clone();
        self.rt.spawn(async move {
            let Some(handle) = shared.handles.get_file(fh) else {
                return reply.ok();
            };
            if !handle.dirty.load(std::sync::atomic::Ordering::SeqCst) {
                return reply.ok();
            }
            let Some(inode) = shared.inodes.get(InodeId::from(ino)) else {
                return reply.ok();
            };
            let Some(state) = inode.kind.as_file_state() else {
                return reply.ok();
            };

            let mode = handle.write_mode.lock().unwrap().take();
            let precondition = if state.current_record().is_some() {
                Precondition::IfGenerationMatch(state.source_generation())
            } else {
                Precondition::IfGenerationMatch(Generation(0))
            };

            let outcome = match mode {
                Some(crate::handle::WriteMode::StagedTempFile { mut file, .. }) => {
                    Some(write::finalize_staged(shared.store.as_ref(), &inode.name(), &mut file, precondition).await)
                }
                Some(crate::handle::WriteMode::StreamingBlocks { mut buffer, writer }) => {
                    Some(write::finalize_stream(&mut buffer, writer).await)
                }
                None => None,
            };

            match outcome {
                Some(Ok(record)) => {
                    shared.stat_cache.put(inode.name().as_str(), record.clone());
                    state.set_record(record);
                    handle.dirty.store(false, std::sync::atomic::Ordering::SeqCst);
                }
                Some(Err(BucketFsError::PreconditionFailed(name))) => {
                    // §4.4 reconciliation: discard the local write, drop
                    // the stale cache entry, and let the next read re-fetch.
                    shared.stat_cache.invalidate(&name);
                    warn!(%name, "flush: precondition failed, discarding local write");
                    return reply.error(libc::EIO);
                }
                Some(Err(e)) => return reply.error(Self::errno_reply(&shared, e)),
                None => {}
            }
            reply.ok();
        });
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        // The write path already commits on flush; there is no separate
        // durability barrier to wait on beyond what `finalize` provides.
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let shared = self.shared.clone();
        let mut inode_id = None;
        if let Some(handle) = shared.handles.get_file(fh) {
            inode_id = Some(handle.inode);
            let mut write_mode = handle.write_mode.lock().unwrap();
            if let Some(crate::handle::WriteMode::StagedTempFile { path, .. }) = write_mode.take() {
                let _ = std::fs::remove_file(path);
            }
        }
        shared.handles.close_file(fh);
        if let Some(inode_id) = inode_id {
            shared.inodes.on_handle_closed(inode_id, &shared.handles);
        }
        reply.ok();
    }

    fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        let name_str = match name_to_str(name) {
            Ok(s) => s,
            Err(e) => return reply.error(e),
        };
        let shared = self.shared.clone();
        let name_owned = name_str.to_string();
        let ttl = self.attr_ttl();
        self.rt.spawn(async move {
            let Some(parent_inode) = shared.inodes.get(InodeId::from(parent)) else {
                return reply.error(libc::ENOENT);
            };
            let Ok(full_name) = parent_inode.name().join_child(&name_owned) else {
                return reply.error(libc::EINVAL);
            };
            let placeholder = full_name.as_placeholder();

            let result = if shared.store.supports_hierarchical_namespace() {
                shared.store.create_folder(&placeholder).await
            } else {
                shared.store.create(&placeholder, Vec::new(), Precondition::IfGenerationMatch(Generation(0))).await
            };

            match result {
                Ok(record) => {
                    shared.stat_cache.put(placeholder.as_str(), record.clone());
                    let inode = shared.inodes.insert_child(InodeId::from(parent), placeholder, InodeKind::new_explicit_dir(record));
                    if let Some(state) = parent_inode.kind.as_dir_state() {
                        state.bump_generation();
                    }
                    match BucketFs::file_attr_for(&shared, &inode) {
                        Some(attr) => reply.entry(&ttl, &attr, 0),
                        None => reply.error(libc::EIO),
                    }
                }
                Err(e) => reply.error(Self::errno_reply(&shared, e.into())),
            }
        });
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name_str = match name_to_str(name) {
            Ok(s) => s,
            Err(e) => return reply.error(e),
        };
        let shared = self.shared.clone();
        let name_owned = name_str.to_string();
        self.rt.spawn(async move {
            let Some(inode) = shared.inodes.lookup(InodeId::from(parent), &name_owned) else {
                return reply.error(libc::ENOENT);
            };
            let placeholder = inode.name().as_placeholder();

            let result = if shared.store.supports_hierarchical_namespace() {
                shared.store.delete_folder(&placeholder).await
            } else {
                shared.store.delete(&placeholder, None).await
            };

            match result {
                Ok(()) => {
                    shared.stat_cache.invalidate(placeholder.as_str());
                    shared.inodes.destroy(inode.id, &shared.handles);
                    reply.ok();
                }
                Err(e) => reply.error(Self::errno_reply(&shared, e.into())),
            }
        });
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name_str = match name_to_str(name) {
            Ok(s) => s,
            Err(e) => return reply.error(e),
        };
        let shared = self.shared.clone();
        let name_owned = name_str.to_string();
        self.rt.spawn(async move {
            let Some(inode) = shared.inodes.lookup(InodeId::from(parent), &name_owned) else {
                return reply.error(libc::ENOENT);
            };
            let full_name = inode.name();
            let generation = inode.kind.as_file_state().and_then(|s| s.current_record()).map(|r| r.generation);

            match shared.store.delete(&full_name, generation).await {
                Ok(()) => {
                    shared.stat_cache.invalidate(full_name.as_str());
                    shared.inodes.destroy(inode.id, &shared.handles);
                    reply.ok();
                }
                Err(e) => reply.error(Self::errno_reply(&shared, e.into())),
            }
        });
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let name_str = match name_to_str(name) {
            Ok(s) => s,
            Err(e) => return reply.error(e),
        };
        let newname_str = match name_to_str(newname) {
            Ok(s) => s,
            Err(e) => return reply.error(e),
        };
        let shared = self.shared.clone();
        let (name_owned, newname_owned) = (name_str.to_string(), newname_str.to_string());
        self.rt.spawn(async move {
            let Some(inode) = shared.inodes.lookup(InodeId::from(parent), &name_owned) else {
                return reply.error(libc::ENOENT);
            };
            let Some(new_parent_inode) = shared.inodes.get(InodeId::from(newparent)) else {
                return reply.error(libc::ENOENT);
            };

            let src_name = inode.name();
            let Ok(dst_name) = new_parent_inode.name().join_child(&newname_owned) else {
                return reply.error(libc::EINVAL);
            };

            let result = if inode.kind.is_dir_like() {
                let src_prefix = src_name.as_placeholder();
                let dst_prefix = dst_name.as_placeholder();
                if shared.store.supports_hierarchical_namespace() {
                    rename::rename_dir_hierarchical(shared.store.as_ref(), &src_prefix, &dst_prefix).await
                } else {
                    rename::rename_dir_flat(shared.store.as_ref(), &src_prefix, &dst_prefix, shared.config.listing.rename_dir_limit).await
                }
            } else {
                let generation = inode.kind.as_file_state().and_then(|s| s.current_record()).map(|r| r.generation).unwrap_or(Generation(0));
                rename::rename_file(shared.store.as_ref(), &src_name, generation, &dst_name).await
            };

            match result {
                Ok(()) => {
                    shared.stat_cache.invalidate(src_name.as_str());
                    shared.inodes.rename(inode.id, InodeId::from(newparent), dst_name);
                    reply.ok();
                }
                Err(e) => reply.error(Self::errno_reply(&shared, e)),
            }
        });
    }

    fn symlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, target: &std::path::Path, reply: ReplyEntry) {
        let name_str = match name_to_str(name) {
            Ok(s) => s,
            Err(e) => return reply.error(e),
        };
        let Some(target_str) = target.to_str() else {
            return reply.error(libc::EINVAL);
        };
        let shared = self.shared.clone();
        let (name_owned, target_owned) = (name_str.to_string(), target_str.to_string());
        let ttl = self.attr_ttl();
        self.rt.spawn(async move {
            let Some(parent_inode) = shared.inodes.get(InodeId::from(parent)) else {
                return reply.error(libc::ENOENT);
            };
            let Ok(full_name) = parent_inode.name().join_child(&name_owned) else {
                return reply.error(libc::EINVAL);
            };
            let record = ObjectRecord {
                name: full_name.clone(),
                size: target_owned.len() as u64,
                generation: Generation(0),
                metageneration: bucketfs_core::domain::Metageneration(0),
                content_type: None,
                updated: chrono::Utc::now(),
                crc32c: None,
                md5: None,
                metadata: Default::default(),
                storage_class: None,
                kind: RecordKind::Object,
            }
            .with_symlink_target(target_owned);

            match shared.store.create(&full_name, record.metadata.get(ObjectRecord::SYMLINK_TARGET_KEY).cloned().unwrap_or_default().into_bytes(), Precondition::IfGenerationMatch(Generation(0))).await {
                Ok(mut created) => {
                    created.metadata = record.metadata;
                    shared.stat_cache.put(full_name.as_str(), created.clone());
                    let inode = shared.inodes.insert_child(InodeId::from(parent), full_name, InodeKind::new_symlink(Some(created), false));
                    match BucketFs::file_attr_for(&shared, &inode) {
                        Some(attr) => reply.entry(&ttl, &attr, 0),
                        None => reply.error(libc::EIO),
                    }
                }
                Err(e) => reply.error(Self::errno_reply(&shared, e.into())),
            }
        });
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let name_str = match name_to_str(name) {
            Ok(s) => s,
            Err(e) => return reply.error(e),
        };
        let shared = self.shared.clone();
        let name_owned = name_str.to_string();
        let ttl = self.attr_ttl();
        self.rt.spawn(async move {
            let Some(parent_inode) = shared.inodes.get(InodeId::from(parent)) else {
                return reply.error(libc::ENOENT);
            };
            let Ok(full_name) = parent_inode.name().join_child(&name_owned) else {
                return reply.error(libc::EINVAL);
            };

            let (inode, record) = if write::should_create_empty_eagerly(shared.config.write.create_empty_file) {
                match shared.store.create(&full_name, Vec::new(), Precondition::IfGenerationMatch(Generation(0))).await {
                    Ok(record) => {
                        shared.stat_cache.put(full_name.as_str(), record.clone());
                        let inode = shared.inodes.insert_child(InodeId::from(parent), full_name, InodeKind::new_file(Some(record.clone()), false));
                        (inode, Some(record))
                    }
                    Err(e) => return reply.error(Self::errno_reply(&shared, e.into())),
                }
            } else {
                let inode = shared.inodes.insert_child(InodeId::from(parent), full_name, InodeKind::new_file(None, true));
                (inode, None)
            };

            let fh = shared.handles.open_file(inode.id, record.as_ref());
            match BucketFs::file_attr_for(&shared, &inode) {
                Some(attr) => reply.created(&ttl, &attr, 0, fh, 0),
                None => reply.error(libc::EIO),
            }
        });
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        // An object store has no meaningful block/inode quota to report;
        // these are placeholder values for a virtual mount.
        reply.statfs(0, 0, 0, 0, 0, 512, NAME_MAX as u32, 0);
    }
}
