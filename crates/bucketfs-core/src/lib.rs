//! Domain types, ports, and configuration shared by every bucketfs crate.
//!
//! This crate has no I/O of its own: it defines what an object record is,
//! how inode identifiers and continuation tokens are validated, the
//! [`ports::BucketStore`] trait adapter crates implement, and the
//! [`config::Config`] schema the daemon loads at startup.

pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

pub use config::Config;
pub use error::BucketFsError;
