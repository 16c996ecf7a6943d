//! Crossbeam-based reclamation for msqueue.
//!
//! This crate provides `EpochGuard`, an implementation of the `Guard` trait
//! using crossbeam-epoch for memory reclamation.
//!
//! # Usage
//!
//! ```
//! use msqueue_core::MsQueue;
//! use msqueue_crossbeam::EpochGuard;
//!
//! let queue: MsQueue<i32, EpochGuard> = MsQueue::new();
//! queue.enqueue(42);
//! assert_eq!(queue.dequeue(), Some(42));
//! ```

pub mod epoch_guard;

pub use epoch_guard::EpochGuard;
