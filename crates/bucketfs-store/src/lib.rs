//! HTTP implementation of the bucket abstraction port (C1) plus the
//! retry/backoff and adaptive stall-timeout layer (C10) that wraps it.

pub mod client;
pub mod retry;
pub mod upload;
pub mod wire;

pub use client::{Credential, HttpBucketStore};
pub use retry::{RetryPolicy, StallTracker};
