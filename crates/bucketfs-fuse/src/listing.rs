//! Directory listing merge and pagination (C5, §4.4): merges a bucket's
//! paginated `records`/`prefixes` page shape into a single ordered list
//! of directory entries, applying the explicit-wins-over-implicit
//! conflict rule from §4.4.

use std::collections::BTreeMap;

use bucketfs_core::domain::{ContinuationToken, ObjectName, ObjectRecord, RecordKind};
use bucketfs_core::ports::bucket_store::{BucketStore, ListPage};

/// One merged directory entry, ready for `InodeStore` resolution.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub base_name: String,
    pub kind: RecordKind,
    pub is_dir: bool,
    /// Present for file/symlink entries; `None` for a pure implicit or
    /// explicit directory, which has no object bytes of its own.
    pub record: Option<ObjectRecord>,
}

/// Whether a name observed twice in one page (once from `records` as an
/// explicit placeholder or managed folder, once inferred from
/// `prefixes`) should be reported as the explicit or the implicit entry.
/// §4.4: explicit always wins.
fn merge_conflict(existing: &DirEntry, candidate: DirEntry) -> DirEntry {
    let existing_is_explicit = existing.record.is_some() || existing.kind == RecordKind::Folder;
    if existing_is_explicit {
        existing.clone()
    } else {
        candidate
    }
}

/// Merges one [`ListPage`] into an ordered map of `base_name -> DirEntry`,
/// folding into `acc` so multi-page listings can accumulate across calls.
pub fn merge_page(acc: &mut BTreeMap<String, DirEntry>, page: &ListPage, prefix: &ObjectName) {
    for record in &page.records {
        if record.name == *prefix {
            // The placeholder object for the directory itself, not a child.
            continue;
        }
        let base_name = record.name.base_name().to_string();
        let is_dir = record.is_placeholder() || record.is_folder();
        let entry = DirEntry {
            base_name: base_name.clone(),
            kind: record.kind,
            is_dir,
            record: if is_dir { None } else { Some(record.clone()) },
        };
        acc.entry(base_name)
            .and_modify(|existing| *existing = merge_conflict(existing, entry.clone()))
            .or_insert(entry);
    }

    for child_prefix in &page.prefixes {
        let base_name = child_prefix.base_name().to_string();
        let entry = DirEntry {
            base_name: base_name.clone(),
            kind: RecordKind::Object,
            is_dir: true,
            record: None,
        };
        acc.entry(base_name)
            .and_modify(|existing| *existing = merge_conflict(existing, entry.clone()))
            .or_insert(entry);
    }
}

/// Fetches every page for `prefix` and returns the fully merged, name-sorted
/// listing (§4.4: "a directory handle enumerates a stable snapshot").
/// Sorting is a side effect of `BTreeMap`'s key order, matching readdir's
/// requirement of a deterministic (if not kernel-mandated) order.
pub async fn list_all(
    store: &dyn BucketStore,
    prefix: &ObjectName,
) -> anyhow::Result<Vec<DirEntry>> {
    let mut acc: BTreeMap<String, DirEntry> = BTreeMap::new();
    let mut continuation: Option<ContinuationToken> = None;

    loop {
        let page = store
            .list(prefix, Some("/"), true, continuation.as_ref())
            .await?;
        merge_page(&mut acc, &page, prefix);
        continuation = page.next_continuation;
        if continuation.is_none() {
            break;
        }
    }

    Ok(acc.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketfs_core::domain::{Generation, Metageneration};
    use chrono::Utc;
    use std::collections::HashMap;

    fn file_record(name: &str) -> ObjectRecord {
        ObjectRecord {
            name: ObjectName::new(name).unwrap(),
            size: 5,
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

    fn folder_record(name: &str) -> ObjectRecord {
        let mut r = file_record(name);
        r.kind = RecordKind::Folder;
        r.size = 0;
        r
    }

    #[test]
    fn files_and_implicit_prefixes_merge_without_conflict() {
        let prefix = ObjectName::root();
        let page = ListPage {
            records: vec![file_record("a.txt")],
            prefixes: vec![ObjectName::new("sub/").unwrap()],
            next_continuation: None,
        };
        let mut acc = BTreeMap::new();
        merge_page(&mut acc, &page, &prefix);
        assert_eq!(acc.len(), 2);
        assert!(!acc["a.txt"].is_dir);
        assert!(acc["sub"].is_dir);
    }

    #[test]
    fn explicit_managed_folder_wins_over_implicit_prefix() {
        let prefix = ObjectName::root();
        let page = ListPage {
            records: vec![folder_record("sub/")],
            prefixes: vec![ObjectName::new("sub/").unwrap()],
            next_continuation: None,
        };
        let mut acc = BTreeMap::new();
        merge_page(&mut acc, &page, &prefix);
        assert_eq!(acc.len(), 1);
        assert_eq!(acc["sub"].kind, RecordKind::Folder);
    }

    #[test]
    fn placeholder_for_the_queried_prefix_itself_is_skipped() {
        let prefix = ObjectName::new("dir/").unwrap();
        let page = ListPage {
            records: vec![folder_record("dir/"), file_record("dir/child")],
            prefixes: vec![],
            next_continuation: None,
        };
        let mut acc = BTreeMap::new();
        merge_page(&mut acc, &page, &prefix);
        assert_eq!(acc.len(), 1);
        assert!(acc.contains_key("child"));
    }
}
