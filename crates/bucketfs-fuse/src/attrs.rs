//! Inode attribute synthesis (§6 `uid`/`gid`/`file-mode`/`dir-mode`): a
//! plain function from stored metadata to `fuser::FileAttr`, pulling
//! uid/gid/mode from [`bucketfs_core::config::AttrConfig`] since this
//! adapter exposes them as mount-time configuration rather than hardcoded
//! constants.

use std::time::{Duration, SystemTime};

use bucketfs_core::config::AttrConfig;
use bucketfs_core::domain::ObjectRecord;
use fuser::{FileAttr, FileType};

/// Attribute cache TTL handed back to the kernel on every reply. The
/// adapter's own stat cache (§4.2) is the authority on freshness; this is
/// just how long the kernel may skip re-asking.
pub const ATTR_TTL: Duration = Duration::from_secs(1);

fn resolve_uid(configured: i64) -> u32 {
    if configured < 0 {
        unsafe { libc::getuid() }
    } else {
        configured as u32
    }
}

fn resolve_gid(configured: i64) -> u32 {
    if configured < 0 {
        unsafe { libc::getgid() }
    } else {
        configured as u32
    }
}

/// Synthesizes attributes for a directory inode (root, explicit, or implicit).
pub fn dir_attr(ino: u64, attrs: &AttrConfig) -> FileAttr {
    let now = SystemTime::now();
    FileAttr {
        ino,
        size: 4096,
        blocks: 8,
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind: FileType::Directory,
        perm: attrs.dir_mode as u16,
        nlink: 2,
        uid: resolve_uid(attrs.uid),
        gid: resolve_gid(attrs.gid),
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

/// Synthesizes attributes for a file or symlink inode from its most
/// recently observed object record.
pub fn file_attr(ino: u64, record: &ObjectRecord, is_symlink: bool, attrs: &AttrConfig) -> FileAttr {
    let mtime = record.updated.into();
    let kind = if is_symlink { FileType::Symlink } else { FileType::RegularFile };
    let perm = if is_symlink { 0o777 } else { attrs.file_mode as u16 };
    FileAttr {
        ino,
        size: record.size,
        blocks: record.size.div_ceil(512),
        atime: mtime,
        mtime,
        ctime: mtime,
        crtime: mtime,
        kind,
        perm,
        nlink: 1,
        uid: resolve_uid(attrs.uid),
        gid: resolve_gid(attrs.gid),
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

/// Attributes for a file inode that exists only locally (dirty, not yet
/// uploaded), sized from the local content staged so far rather than a
/// remote record.
pub fn local_file_attr(ino: u64, size: u64, is_symlink: bool, attrs: &AttrConfig) -> FileAttr {
    let now = SystemTime::now();
    let kind = if is_symlink { FileType::Symlink } else { FileType::RegularFile };
    let perm = if is_symlink { 0o777 } else { attrs.file_mode as u16 };
    FileAttr {
        ino,
        size,
        blocks: size.div_ceil(512),
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind,
        perm,
        nlink: 1,
        uid: resolve_uid(attrs.uid),
        gid: resolve_gid(attrs.gid),
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketfs_core::domain::{Generation, Metageneration, ObjectName, RecordKind};
    use chrono::Utc;
    use std::collections::HashMap;

    fn sample_record() -> ObjectRecord {
        ObjectRecord {
            name: ObjectName::new("a").unwrap(),
            size: 42,
            generation: Generation(1),
            metageneration: Metageneration(1),
            content_type: None,
            updated: Utc::now(),
            crc32c: None,
            md5: None,
            metadata: HashMap::new(),
            storage_class: None,
            kind: RecordKind::Object,
        }
    }

    #[test]
    fn dir_attr_uses_configured_mode() {
        let attrs = AttrConfig { dir_mode: 0o700, ..AttrConfig::default() };
        let attr = dir_attr(5, &attrs);
        assert_eq!(attr.perm, 0o700);
        assert_eq!(attr.kind, FileType::Directory);
    }

    #[test]
    fn file_attr_reflects_record_size() {
        let attrs = AttrConfig::default();
        let attr = file_attr(9, &sample_record(), false, &attrs);
        assert_eq!(attr.size, 42);
        assert_eq!(attr.kind, FileType::RegularFile);
    }

    #[test]
    fn symlink_attr_uses_permissive_mode() {
        let attrs = AttrConfig::default();
        let attr = file_attr(9, &sample_record(), true, &attrs);
        assert_eq!(attr.kind, FileType::Symlink);
        assert_eq!(attr.perm, 0o777);
    }

    #[test]
    fn negative_uid_resolves_to_invoking_user() {
        let attrs = AttrConfig { uid: -1, gid: -1, ..AttrConfig::default() };
        let attr = dir_attr(1, &attrs);
        assert_eq!(attr.uid, unsafe { libc::getuid() });
        assert_eq!(attr.gid, unsafe { libc::getgid() });
    }
}
