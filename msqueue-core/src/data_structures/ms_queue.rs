use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::data_structures::ConcurrentQueue;
use crate::guard::Guard;

type NodePtr<T> = *mut QueueNode<T>;

// Hazard slots. Enqueue only ever protects the tail.
const HEAD_SLOT: usize = 0;
const NEXT_SLOT: usize = 1;
const TAIL_SLOT: usize = 0;

///
/// Concurrent unbounded queue based on Michael and Scott's paper 'Simple, Fast, and Practical
/// Non-Blocking and Blocking Concurrent Queue Algorithms'.
///
// =============================================================================
// QUEUE INVARIANTS
// =============================================================================
//
// ┌──────┐    ┌──────┐    ┌──────┐    ┌──────┐
// │ HEAD │───►│  10  │───►│  20  │───►│  30  │───► NULL
// │(sent)│    │      │    │      │    │      │
// └──────┘    └──────┘    └──────┘    └──────┘
//    ▲                       ▲           ▲
//   head                   tail    (or here)
//
// 1. head and tail are never null
// 2. head always refers to a sentinel; the logical content is the payloads
//    strictly after it, in link order
// 3. tail refers to the last or the second-to-last node
// 4. node.next goes from null to non-null at most once
//
// =============================================================================
// ENQUEUE
// =============================================================================
//
// Step 1 - Link (linearization point): CAS tail.next from NULL to node
//
//          ... ──► T ──► node ──► NULL
//                  ▲
//                 tail   (lagging by one)
//
// Step 2 - Swing: CAS tail from T to node. Best effort, never retried. A
//          failure means someone already helped.
//
// Any operation that finds tail.next non-null helps by swinging tail first.
//
// =============================================================================
// DEQUEUE
// =============================================================================
//
// Before:  head ──► H(sent) ──► N(v) ──► ...
//
// Read v from N, then CAS head from H to N (linearization point):
//
// After:   head ──► N(sent) ──► ...          H is retired
//
// v is read BEFORE the CAS: once the CAS succeeds N is the new sentinel and
// its payload no longer belongs to the queue. The read is a bitwise copy
// kept in ManuallyDrop; it takes ownership only if the CAS succeeds.
//
// When head == tail and N is not null, a concurrent enqueue linked N but has
// not swung tail yet. Dequeue swings tail before advancing head, so head
// never passes tail and a retired node is never referenced by tail.
//
// =============================================================================
// RECLAMATION
// =============================================================================
//
// The old sentinel H is handed to the guard once head has moved past it.
// Every dereferenced node is loaded through Guard::protect and re-validated
// against its source, so with hazard pointers:
//
//   dequeue: slot 0 = H, slot 1 = N
//   enqueue: slot 0 = T
//
// A node protected in a slot cannot be freed, and therefore its address
// cannot be reused while it may still serve as a CAS comparand (ABA).
//
pub(crate) struct QueueNode<T> {
    data: Option<ManuallyDrop<T>>,
    next: AtomicPtr<QueueNode<T>>,
}

impl<T> QueueNode<T> {
    fn new(value: T) -> Self {
        QueueNode {
            data: Some(ManuallyDrop::new(value)),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn new_sentinel() -> Self {
        QueueNode {
            data: None,
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[cfg(test)]
    fn is_sentinel(&self) -> bool {
        self.data.is_none()
    }

    /// Load next pointer (Acquire ordering)
    #[inline]
    fn get_next(&self) -> NodePtr<T> {
        self.next.load(Ordering::Acquire)
    }

    /// CAS next pointer (Release/Relaxed ordering)
    #[inline]
    fn cas_next(&self, expected: NodePtr<T>, new: NodePtr<T>) -> Result<NodePtr<T>, NodePtr<T>> {
        self.next
            .compare_exchange(expected, new, Ordering::Release, Ordering::Relaxed)
    }

    /// Bitwise copy of the payload.
    ///
    /// # Safety
    /// At most one copy may ever be turned into an owned `T`, and only while
    /// no one else can own the payload.
    unsafe fn read_payload(&self) -> ManuallyDrop<T> {
        let data = self
            .data
            .as_ref()
            .expect("only the initial sentinel has no payload");
        unsafe { ptr::read(data) }
    }

    /// Deallocate a node without dropping its payload.
    ///
    /// # Safety
    /// - The pointer must have been allocated with `Box::new`
    /// - Must only be called once
    /// - Node must not be accessed after this call
    ///
    unsafe fn dealloc_ptr(ptr: *mut Self) {
        unsafe { drop(Box::from_raw(ptr)) };
    }
}

/// A lock-free multi-producer multi-consumer FIFO queue.
///
/// `G` selects the memory reclamation strategy used for dequeued nodes; see
/// [`Guard`].
///
/// # Example
///
/// ```
/// use msqueue_core::{HazardGuard, MsQueue};
///
/// let queue: MsQueue<&str, HazardGuard> = MsQueue::new();
/// queue.enqueue("a");
/// queue.enqueue("b");
///
/// assert_eq!(queue.dequeue(), Some("a"));
/// assert_eq!(queue.dequeue(), Some("b"));
/// assert_eq!(queue.dequeue(), None);
/// ```
///
pub struct MsQueue<T, G: Guard> {
    head: AtomicPtr<QueueNode<T>>,
    tail: AtomicPtr<QueueNode<T>>,
    /// Shared guard instance for deferred destruction of dequeued sentinels.
    guard: G,
}

// Payloads move between threads; nodes are only shared through atomics.
unsafe impl<T: Send, G: Guard> Send for MsQueue<T, G> {}
unsafe impl<T: Send, G: Guard> Sync for MsQueue<T, G> {}

impl<T, G: Guard> MsQueue<T, G> {
    /// Create an empty queue: a single sentinel referenced by both head and tail.
    pub fn new() -> Self {
        debug_assert!(G::PROTECT_SLOTS >= 2, "queue needs two protection slots");

        let sentinel = Box::into_raw(Box::new(QueueNode::new_sentinel()));
        MsQueue {
            head: AtomicPtr::new(sentinel),
            tail: AtomicPtr::new(sentinel),
            guard: G::default(),
        }
    }

    /// Get the shared guard instance for this queue.
    pub fn guard(&self) -> &G {
        &self.guard
    }

    /// Append `value` at the tail. Never fails; never blocks.
    pub fn enqueue(&self, value: T) {
        let new_node = Box::into_raw(Box::new(QueueNode::new(value)));
        let read_guard = G::pin();

        loop {
            let tail = G::protect(&read_guard, TAIL_SLOT, &self.tail);
            let next = unsafe { (*tail).get_next() };

            // tail and tail.next are two separate loads.
            if tail != self.tail.load(Ordering::Acquire) {
                continue;
            }

            if next.is_null() {
                if unsafe { (*tail).cas_next(ptr::null_mut(), new_node) }.is_ok() {
                    let _ = self.cas_tail(tail, new_node);
                    return;
                }
            } else {
                // Tail is lagging; help the enqueuer that linked `next`.
                let _ = self.cas_tail(tail, next);
            }
        }
    }

    /// Remove and return the value at the head, or `None` if the queue is empty.
    ///
    /// Never blocks: an empty queue returns `None` immediately.
    pub fn dequeue(&self) -> Option<T> {
        let read_guard = G::pin();

        loop {
            let head = G::protect(&read_guard, HEAD_SLOT, &self.head);
            let tail = self.tail.load(Ordering::Acquire);
            let next = G::protect(&read_guard, NEXT_SLOT, unsafe { &(*head).next });

            if head != self.head.load(Ordering::Acquire) {
                continue;
            }

            if head == tail {
                if next.is_null() {
                    return None;
                }
                // Not empty: an enqueue linked `next` but has not swung tail yet.
                let _ = self.cas_tail(tail, next);
                continue;
            }

            debug_assert!(!next.is_null(), "head != tail implies head.next");

            let value = unsafe { (*next).read_payload() };

            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                unsafe { self.guard.defer_destroy(head, QueueNode::dealloc_ptr) };
                return Some(ManuallyDrop::into_inner(value));
            }
            // Another consumer took it; the copy is discarded without dropping.
        }
    }

    /// Snapshot emptiness check.
    ///
    /// Under concurrent modification the result may already be stale when
    /// it is returned. It is exact when no other thread modifies the queue.
    pub fn is_empty(&self) -> bool {
        let read_guard = G::pin();
        let head = G::protect(&read_guard, HEAD_SLOT, &self.head);
        unsafe { (*head).get_next() }.is_null()
    }

    #[inline]
    fn cas_tail(&self, expected: NodePtr<T>, new: NodePtr<T>) -> Result<NodePtr<T>, NodePtr<T>> {
        self.tail
            .compare_exchange(expected, new, Ordering::Release, Ordering::Relaxed)
    }
}

impl<T, G: Guard> ConcurrentQueue<T> for MsQueue<T, G> {
    type Guard = G;

    fn guard(&self) -> &G {
        &self.guard
    }

    fn enqueue(&self, value: T) {
        MsQueue::enqueue(self, value)
    }

    fn dequeue(&self) -> Option<T> {
        MsQueue::dequeue(self)
    }

    fn is_empty(&self) -> bool {
        MsQueue::is_empty(self)
    }
}

impl<T, G: Guard> Default for MsQueue<T, G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, G: Guard> Extend<T> for MsQueue<T, G> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.enqueue(value);
        }
    }
}

impl<T, G: Guard> FromIterator<T> for MsQueue<T, G> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut queue = Self::new();
        queue.extend(iter);
        queue
    }
}

impl<T, G: Guard> fmt::Debug for MsQueue<T, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsQueue")
            .field("is_empty", &self.is_empty())
            .finish_non_exhaustive()
    }
}

impl<T, G: Guard> Drop for MsQueue<T, G> {
    fn drop(&mut self) {
        // Free the sentinel and every linked node. Only payloads strictly after
        // the sentinel are still owned by the queue.
        //
        let mut curr = *self.head.get_mut();
        let mut is_head = true;
        let mut remaining = 0usize;

        while !curr.is_null() {
            let mut node = unsafe { Box::from_raw(curr) };
            curr = *node.next.get_mut();

            if !is_head {
                if let Some(data) = node.data.take() {
                    drop(ManuallyDrop::into_inner(data));
                    remaining += 1;
                }
            }
            is_head = false;
        }

        tracing::trace!(remaining, "dropped queue");
    }
}

// ============================================================================
// Tests - Unique to MsQueue (structure and helping)
// ============================================================================
// Note: Common tests are in tests/queue_core_tests.rs and tests/queue_stress_tests.rs
