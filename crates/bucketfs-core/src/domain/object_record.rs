//! The canonical remote-object descriptor (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::newtypes::{Generation, Metageneration, ObjectName};

/// Distinguishes a hierarchical-bucket folder entity from a plain object,
/// since the two have separate RPC surfaces (`create_folder`/`rename_folder`
/// vs `create`/`copy`) even though both can represent a directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Object,
    Folder,
}

/// A snapshot of an object (or hierarchical-bucket folder) as reported by
/// the bucket abstraction (§3, §4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub name: ObjectName,
    pub size: u64,
    pub generation: Generation,
    pub metageneration: Metageneration,
    pub content_type: Option<String>,
    pub updated: DateTime<Utc>,
    pub crc32c: Option<u32>,
    pub md5: Option<String>,
    pub metadata: HashMap<String, String>,
    pub storage_class: Option<String>,
    pub kind: RecordKind,
}

impl ObjectRecord {
    /// Key under which the symlink target is stashed in user metadata (§3).
    pub const SYMLINK_TARGET_KEY: &'static str = "bucketfs_symlink_target";

    pub fn is_placeholder(&self) -> bool {
        self.name.is_placeholder()
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, RecordKind::Folder)
    }

    pub fn symlink_target(&self) -> Option<&str> {
        self.metadata.get(Self::SYMLINK_TARGET_KEY).map(String::as_str)
    }

    pub fn with_symlink_target(mut self, target: impl Into<String>) -> Self {
        self.metadata
            .insert(Self::SYMLINK_TARGET_KEY.to_string(), target.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> ObjectRecord {
        ObjectRecord {
            name: ObjectName::new(name).unwrap(),
            size: 5,
            generation: Generation(1),
            metageneration: Metageneration(1),
            content_type: Some("application/octet-stream".into()),
            updated: Utc::now(),
            crc32c: None,
            md5: None,
            metadata: HashMap::new(),
            storage_class: None,
            kind: RecordKind::Object,
        }
    }

    #[test]
    fn symlink_target_roundtrips_through_metadata() {
        let record = sample("a/link").with_symlink_target("a/real-file");
        assert_eq!(record.symlink_target(), Some("a/real-file"));
    }

    #[test]
    fn placeholder_and_folder_are_independent() {
        let dir_placeholder = sample("a/");
        assert!(dir_placeholder.is_placeholder());
        assert!(!dir_placeholder.is_folder());

        let mut folder = sample("a/");
        folder.kind = RecordKind::Folder;
        assert!(folder.is_folder());
    }
}
