//! Guard trait for memory reclamation strategies.
//!
//! This module defines the `Guard` trait that abstracts over the memory
//! reclamation strategies a queue can be built on (epoch-based, hazard
//! pointers, deferred).
//!
//! # Design
//!
//! The `Guard` trait makes the queue generic over its memory reclamation
//! strategy:
//!
//! ```text
//! MsQueue<T, G: Guard>
//!     │
//!     ├── MsQueue<T, EpochGuard>      (crossbeam-epoch, msqueue-crossbeam)
//!     ├── MsQueue<T, HazardGuard>     (hazard pointers)
//!     └── MsQueue<T, DeferredGuard>   (testing)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use msqueue_core::{HazardGuard, MsQueue};
//!
//! let queue: MsQueue<i32, HazardGuard> = MsQueue::new();
//! queue.enqueue(42);
//! assert_eq!(queue.dequeue(), Some(42));
//! ```

mod deferred_guard;
mod hazard_guard;

use std::sync::atomic::{AtomicPtr, Ordering};

pub use deferred_guard::DeferredGuard;
pub use hazard_guard::{HazardGuard, HazardReadGuard};

/// A memory reclamation guard that protects concurrent access to nodes.
///
/// Different implementations provide different trade-offs:
///
/// - **EpochGuard**: Low overhead, batched reclamation (crossbeam-epoch)
/// - **HazardGuard**: Bounded memory, per-pointer protection
/// - **DeferredGuard**: Simple, defers all destruction until guard drops (testing)
///
/// # Safety Contract
///
/// Implementations must ensure:
/// 1. Nodes passed to `defer_destroy` are not freed while any thread that
///    obtained them through `protect` still holds the `ReadGuard` it used
/// 2. A freed node's address is not handed out again while a live
///    `ReadGuard` may still use it as a CAS comparand
///
/// # Design Note
///
/// Guards are stored in collections and must be `Send + Sync`. The guard
/// stored in a collection is used for deferred destruction scheduling.
/// Actual protection (pinning or hazard publication) happens per-operation,
/// through the `ReadGuard` returned by `pin`.
///
pub trait Guard: Sized + Default + Send + Sync {
    /// An active guard that protects reads for its lifetime.
    ///
    /// For epoch-based guards, this holds an actual pinned `crossbeam_epoch::Guard`.
    /// For hazard pointers, this owns a hazard record whose slots are cleared
    /// on drop. For deferred guards, this is the unit type.
    ///
    type ReadGuard: Sized;

    /// Number of pointers a single `ReadGuard` can protect at once.
    ///
    const PROTECT_SLOTS: usize = usize::MAX;

    /// Pin an active read guard.
    ///
    /// This creates a guard that protects node reads until dropped.
    ///
    /// Note: This is different from `Default::default()` which creates
    /// a guard for storage in collections (for deferred destruction).
    ///
    fn pin() -> Self::ReadGuard;

    /// Load a shared pointer from `source` and protect it under `slot`.
    ///
    /// Protecting a new pointer in a slot releases whatever that slot
    /// protected before. The returned pointer stays safe to dereference until
    /// the slot is reused or `read_guard` is dropped, provided it was still
    /// reachable from the data structure when loaded.
    ///
    /// Strategies that protect everything while pinned load with `Acquire`.
    ///
    fn protect<N>(read_guard: &Self::ReadGuard, slot: usize, source: &AtomicPtr<N>) -> *mut N {
        let _ = (read_guard, slot);
        source.load(Ordering::Acquire)
    }

    /// Schedule a node for deferred destruction.
    ///
    /// The node will be deallocated when it's safe (no readers).
    ///
    /// # Safety
    ///
    /// - `node` must be a valid pointer previously allocated by the collection
    /// - `node` must be unlinked from the collection (not reachable by traversal)
    /// - `node` must not be retired more than once
    /// - `dealloc` must be the correct deallocation function for `node`
    ///
    unsafe fn defer_destroy<N>(&self, node: *mut N, dealloc: unsafe fn(*mut N));
}
