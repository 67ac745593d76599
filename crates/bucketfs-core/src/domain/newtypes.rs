//! Domain value types.
//!
//! Each type validates its invariants at construction and carries no
//! public constructor that can bypass validation, the same discipline the
//! rest of the adapter relies on when reasoning about object names and
//! generations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// BucketName
// ============================================================================

/// A bucket identifier: non-empty, no `/`, no NUL bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BucketName(String);

impl BucketName {
    pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(DomainError::InvalidBucketName("empty".into()));
        }
        if raw.contains('/') || raw.contains('\0') {
            return Err(DomainError::InvalidBucketName(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BucketName {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BucketName {
    type Error = DomainError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BucketName> for String {
    fn from(value: BucketName) -> Self {
        value.0
    }
}

// ============================================================================
// ObjectName
// ============================================================================

/// A fully-qualified object name within a bucket's flat keyspace.
///
/// Names ending in `/` are placeholder (directory) objects (§3). The
/// empty name denotes the bucket root and is only ever used as a listing
/// prefix, never as a real object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectName(String);

impl ObjectName {
    pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        if raw.contains('\0') {
            return Err(DomainError::InvalidObjectName(raw));
        }
        if raw.starts_with('/') {
            return Err(DomainError::InvalidObjectName(raw));
        }
        Ok(Self(raw))
    }

    /// The bucket root, used as the empty listing prefix.
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Placeholder (directory) objects end in `/`.
    pub fn is_placeholder(&self) -> bool {
        !self.0.is_empty() && self.0.ends_with('/')
    }

    /// The corresponding placeholder name (`"foo"` -> `"foo/"`); idempotent.
    pub fn as_placeholder(&self) -> Self {
        if self.is_placeholder() || self.is_root() {
            self.clone()
        } else {
            Self(format!("{}/", self.0))
        }
    }

    /// Strips a trailing `/`, if any.
    pub fn trim_placeholder(&self) -> Self {
        Self(self.0.trim_end_matches('/').to_string())
    }

    /// Final path component (the part after the last `/`, ignoring a
    /// trailing placeholder slash).
    pub fn base_name(&self) -> &str {
        let trimmed = self.0.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(idx) => &trimmed[idx + 1..],
            None => trimmed,
        }
    }

    /// The parent placeholder name, or `root()` if this is a top-level entry.
    pub fn parent(&self) -> Self {
        let trimmed = self.0.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(idx) => Self(trimmed[..=idx].to_string()),
            None => Self::root(),
        }
    }

    /// Appends a child component to a directory name (must be a placeholder
    /// or root).
    pub fn join_child(&self, child: &str) -> Result<Self, DomainError> {
        if !self.is_placeholder() && !self.is_root() {
            return Err(DomainError::InvalidObjectName(format!(
                "{} is not a directory prefix",
                self.0
            )));
        }
        if child.is_empty() || child.contains('/') {
            return Err(DomainError::InvalidObjectName(child.to_string()));
        }
        Ok(Self(format!("{}{}", self.0, child)))
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjectName {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ObjectName {
    type Error = DomainError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ObjectName> for String {
    fn from(value: ObjectName) -> Self {
        value.0
    }
}

// ============================================================================
// Generation / Metageneration
// ============================================================================

/// Monotonically increasing per-name write counter assigned by the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub i64);

impl Generation {
    /// Sentinel meaning "the name must currently be absent".
    pub const ABSENT: Generation = Generation(0);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Generation {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Counter bumped on every metadata-only update of an object (ACL changes
/// etc); tracked but not interpreted by this adapter beyond pass-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Metageneration(pub i64);

impl fmt::Display for Metageneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Metageneration {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

// ============================================================================
// ContinuationToken
// ============================================================================

/// An opaque pagination cursor returned by a bucket listing and replayed
/// verbatim on the next page request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn new(raw: impl Into<String>) -> Result<Self, DomainError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(DomainError::InvalidContinuationToken("empty".into()));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContinuationToken {
    type Error = DomainError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContinuationToken> for String {
    fn from(value: ContinuationToken) -> Self {
        value.0
    }
}

// ============================================================================
// Crc32c
// ============================================================================

/// A CRC32C checksum over an object's bytes, used by the file cache (§4.7)
/// to validate assembled downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crc32c(pub u32);

impl Crc32c {
    pub fn of(bytes: &[u8]) -> Self {
        Self(crc32c::crc32c(bytes))
    }
}

impl fmt::Display for Crc32c {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_name_rejects_empty_and_slash() {
        assert!(BucketName::new("").is_err());
        assert!(BucketName::new("a/b").is_err());
        assert!(BucketName::new("my-bucket").is_ok());
    }

    #[test]
    fn object_name_placeholder_roundtrip() {
        let dir = ObjectName::new("a/b/").unwrap();
        assert!(dir.is_placeholder());
        assert_eq!(dir.trim_placeholder().as_str(), "a/b");

        let file = ObjectName::new("a/b/c").unwrap();
        assert!(!file.is_placeholder());
        assert_eq!(file.as_placeholder().as_str(), "a/b/c/");
    }

    #[test]
    fn object_name_parent_and_base_name() {
        let n = ObjectName::new("a/b/c").unwrap();
        assert_eq!(n.base_name(), "c");
        assert_eq!(n.parent().as_str(), "a/b/");

        let top = ObjectName::new("foo").unwrap();
        assert_eq!(top.parent(), ObjectName::root());

        let dir = ObjectName::new("a/b/").unwrap();
        assert_eq!(dir.base_name(), "b");
        assert_eq!(dir.parent().as_str(), "a/");
    }

    #[test]
    fn object_name_join_child_requires_directory_prefix() {
        let root = ObjectName::root();
        assert_eq!(root.join_child("foo").unwrap().as_str(), "foo");

        let dir = ObjectName::new("a/").unwrap();
        assert_eq!(dir.join_child("b").unwrap().as_str(), "a/b");

        let file = ObjectName::new("a").unwrap();
        assert!(file.join_child("b").is_err());
        assert!(dir.join_child("b/c").is_err());
    }

    #[test]
    fn object_name_rejects_leading_slash() {
        assert!(ObjectName::new("/a").is_err());
    }

    #[test]
    fn continuation_token_rejects_empty() {
        assert!(ContinuationToken::new("").is_err());
        assert!(ContinuationToken::new("page-2").is_ok());
    }

    #[test]
    fn crc32c_matches_known_vector() {
        // "123456789" is the standard CRC32C check-value vector.
        assert_eq!(Crc32c::of(b"123456789").0, 0xE3069283);
    }
}
