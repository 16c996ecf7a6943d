//! Deferred guard implementation for testing.
//!
//! This module provides `DeferredGuard`, a simple guard implementation that
//! defers all node destruction until the guard is dropped.

#[cfg(debug_assertions)]
use std::collections::HashSet;
use std::sync::Mutex;

use super::Guard;

/// A simple guard that defers all node destruction until the guard is dropped.
///
/// This is useful for testing where you want predictable destruction timing:
/// a queue parameterized with `DeferredGuard` never frees a dequeued sentinel
/// before the queue itself is dropped, so no reader can ever observe a freed
/// node and no address is ever reused while the queue is alive.
///
/// Not suitable for production use in long-running applications as memory
/// will accumulate until the guard is dropped.
///
/// # Thread Safety
///
/// `DeferredGuard` uses a `Mutex` internally to safely collect nodes from
/// multiple threads. The nodes are freed when the guard is dropped.
///
pub struct DeferredGuard {
    deferred: Mutex<Vec<DeferredNode>>,
    #[cfg(debug_assertions)]
    seen: Mutex<HashSet<usize>>,
}

struct DeferredNode {
    ptr: *mut (),
    dealloc: unsafe fn(*mut ()),
}

// Safety: DeferredNode is Send because we only store the pointer
// and deallocation function, and ensure proper synchronization via Mutex
unsafe impl Send for DeferredNode {}

impl DeferredGuard {
    /// Create a new deferred guard.
    pub fn new() -> Self {
        DeferredGuard {
            deferred: Mutex::new(Vec::new()),
            #[cfg(debug_assertions)]
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Number of nodes waiting for the guard to drop.
    pub fn retired_count(&self) -> usize {
        self.deferred.lock().unwrap().len()
    }
}

impl Default for DeferredGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeferredGuard {
    fn drop(&mut self) {
        let nodes = self.deferred.get_mut().unwrap();

        tracing::trace!(count = nodes.len(), "freeing deferred nodes");

        for node in nodes.drain(..) {
            unsafe {
                (node.dealloc)(node.ptr);
            }
        }
    }
}

impl Guard for DeferredGuard {
    /// For DeferredGuard, ReadGuard is a no-op since all nodes are protected
    /// until the collection's stored guard drops.
    type ReadGuard = ();

    fn pin() -> Self::ReadGuard {
        // No-op for DeferredGuard - protection is provided by the stored guard
    }

    unsafe fn defer_destroy<N>(&self, node: *mut N, dealloc: unsafe fn(*mut N)) {
        // A sentinel retired twice means two dequeuers both won the same head CAS.
        #[cfg(debug_assertions)]
        {
            let addr = node as usize;
            if !self.seen.lock().unwrap().insert(addr) {
                panic!("node {:#x} retired twice", addr);
            }
        }

        let node = DeferredNode {
            ptr: node as *mut (),
            dealloc: unsafe {
                std::mem::transmute::<unsafe fn(*mut N), unsafe fn(*mut ())>(dealloc)
            },
        };
        self.deferred.lock().unwrap().push(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FREED: AtomicUsize = AtomicUsize::new(0);

    unsafe fn count_and_free(ptr: *mut u64) {
        FREED.fetch_add(1, Ordering::Relaxed);
        drop(unsafe { Box::from_raw(ptr) });
    }

    #[test]
    fn test_deferred_until_drop() {
        let guard = DeferredGuard::default();
        let before = FREED.load(Ordering::Relaxed);

        for i in 0..10u64 {
            let ptr = Box::into_raw(Box::new(i));
            unsafe {
                guard.defer_destroy(ptr, count_and_free);
            }
        }

        assert_eq!(guard.retired_count(), 10);
        assert_eq!(FREED.load(Ordering::Relaxed), before);

        drop(guard);
        assert_eq!(FREED.load(Ordering::Relaxed), before + 10);
    }

    #[test]
    fn test_protect_is_plain_load() {
        let value = Box::into_raw(Box::new(7u64));
        let source = std::sync::atomic::AtomicPtr::new(value);

        let read_guard = DeferredGuard::pin();
        let loaded = DeferredGuard::protect(&read_guard, 0, &source);
        assert_eq!(loaded, value);

        unsafe { drop(Box::from_raw(value)) };
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "retired twice")]
    fn test_double_retire_detected() {
        let guard = DeferredGuard::default();
        let ptr = Box::into_raw(Box::new(1u64));

        unsafe {
            guard.defer_destroy(ptr, |p| drop(Box::from_raw(p)));
            guard.defer_destroy(ptr, |p| drop(Box::from_raw(p)));
        }
    }
}
