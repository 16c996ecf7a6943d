//! Data structures for concurrent queues.
//!
//! # Organization
//!
//! - [`concurrent_queue`] - The `ConcurrentQueue` trait shared by queue implementations
//! - [`ms_queue`] - Michael-Scott lock-free queue, generic over its reclamation guard

pub mod concurrent_queue;
pub mod ms_queue;

pub use concurrent_queue::ConcurrentQueue;
pub use ms_queue::MsQueue;
