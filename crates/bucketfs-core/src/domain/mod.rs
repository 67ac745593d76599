//! Domain types: value objects that carry no I/O and validate their own
//! invariants at construction.

pub mod errors;
pub mod inode_id;
pub mod newtypes;
pub mod object_record;

pub use errors::DomainError;
pub use inode_id::{IdAllocator, InodeId};
pub use newtypes::{BucketName, ContinuationToken, Crc32c, Generation, Metageneration, ObjectName};
pub use object_record::{ObjectRecord, RecordKind};
