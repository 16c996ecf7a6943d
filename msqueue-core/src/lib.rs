//! Lock-free multi-producer multi-consumer queue with pluggable memory reclamation.
//!
//! ```
//! use msqueue_core::{DeferredGuard, HazardGuard, MsQueue};
//!
//! let queue: MsQueue<u32, HazardGuard> = MsQueue::new();
//! queue.enqueue(1);
//! assert_eq!(queue.dequeue(), Some(1));
//! assert!(queue.is_empty());
//!
//! // Nodes are only freed when the queue drops; handy in tests.
//! let test_queue: MsQueue<u32, DeferredGuard> = MsQueue::new();
//! assert_eq!(test_queue.dequeue(), None);
//! ```

pub mod common_tests;
pub mod data_structures;
pub mod guard;

// Re-export the queue and guard types for convenience
pub use data_structures::{ConcurrentQueue, MsQueue};
pub use guard::{DeferredGuard, Guard, HazardGuard};

/*

cargo llvm-cov --html

cargo bench --package msqueue-crossbeam --bench queue_benchmark

RUST_LOG=msqueue_core=trace cargo test --package msqueue-core --test queue_stress_tests -- --nocapture

*/
