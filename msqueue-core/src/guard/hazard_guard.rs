//! Hazard pointer guard implementation.
//!
//! This module provides `HazardGuard`, a `Guard` that reclaims nodes with
//! hazard pointers. Before dereferencing a shared node a thread publishes its
//! address in a hazard slot and re-validates that the node is still reachable.
//! A thread that retires a node frees it only after scanning every published
//! slot and finding no match.
//!
//! # Layout
//!
//! ```text
//! DOMAIN (process-global)
//!   records ──► HazardRecord ──► HazardRecord ──► ... (push-only, never freed)
//!               [slot0, slot1]   [slot0, slot1]
//!               active           active
//!   orphans ──► OrphanBatch ──► ...  (retired nodes left by exited threads)
//!
//! LOCAL (per thread)
//!   retired: Vec<RetiredNode>   scanned once it reaches the threshold
//!   record_hint                 last record this thread released
//! ```
//!
//! A record is owned by at most one `HazardReadGuard` at a time (`active`).
//! Records are never deallocated, so the record list can be traversed
//! without protection. The number of records is bounded by the peak number
//! of simultaneously pinned guards.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering, fence};

use super::Guard;

// Enough for the queue: dequeue protects head and head.next.
const SLOTS_PER_RECORD: usize = 2;

// Minimum number of locally retired nodes before a scan is attempted.
const RETIRE_THRESHOLD: usize = 64;

struct HazardRecord {
    slots: [AtomicPtr<()>; SLOTS_PER_RECORD],
    active: AtomicBool,
    // Written once before the record is published, immutable afterwards.
    next: *const HazardRecord,
}

impl HazardRecord {
    fn new_active() -> Self {
        HazardRecord {
            slots: [const { AtomicPtr::new(ptr::null_mut()) }; SLOTS_PER_RECORD],
            active: AtomicBool::new(true),
            next: ptr::null(),
        }
    }

    fn try_acquire(&self) -> bool {
        !self.active.load(Ordering::Relaxed)
            && self
                .active
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    fn release(&self) {
        for slot in &self.slots {
            slot.store(ptr::null_mut(), Ordering::Release);
        }
        self.active.store(false, Ordering::Release);
    }
}

#[derive(Copy, Clone)]
struct RetiredNode {
    ptr: *mut (),
    dealloc: unsafe fn(*mut ()),
}

impl RetiredNode {
    fn new<N>(node: *mut N, dealloc: unsafe fn(*mut N)) -> Self {
        RetiredNode {
            ptr: node as *mut (),
            dealloc: unsafe {
                std::mem::transmute::<unsafe fn(*mut N), unsafe fn(*mut ())>(dealloc)
            },
        }
    }

    /// # Safety
    /// The node must be unprotected and reclaimed only once.
    unsafe fn reclaim(self) {
        unsafe { (self.dealloc)(self.ptr) }
    }
}

struct OrphanBatch {
    nodes: Vec<RetiredNode>,
    next: *mut OrphanBatch,
}

struct HazardDomain {
    records: AtomicPtr<HazardRecord>,
    record_count: AtomicUsize,
    orphans: AtomicPtr<OrphanBatch>,
}

static DOMAIN: HazardDomain = HazardDomain {
    records: AtomicPtr::new(ptr::null_mut()),
    record_count: AtomicUsize::new(0),
    orphans: AtomicPtr::new(ptr::null_mut()),
};

impl HazardDomain {
    fn acquire_record(&'static self) -> &'static HazardRecord {
        // Reuse the record this thread released last, when nobody took it meanwhile.
        let hint = LOCAL
            .try_with(|local| local.record_hint.get())
            .unwrap_or(ptr::null());
        if !hint.is_null() {
            let record = unsafe { &*hint };
            if record.try_acquire() {
                return record;
            }
        }

        let mut curr = self.records.load(Ordering::Acquire) as *const HazardRecord;
        while !curr.is_null() {
            let record = unsafe { &*curr };
            if record.try_acquire() {
                return record;
            }
            curr = record.next;
        }

        // Every record is in use; publish a new one.
        let record = Box::into_raw(Box::new(HazardRecord::new_active()));
        let mut head = self.records.load(Ordering::Relaxed);
        loop {
            unsafe { (*record).next = head };
            match self.records.compare_exchange_weak(
                head,
                record,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => head = actual,
            }
        }

        let count = self.record_count.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(count, "allocated hazard record");

        unsafe { &*record }
    }

    /// Collect every pointer currently published in a hazard slot.
    fn protected_pointers(&self) -> HashSet<*mut ()> {
        // Pairs with the fence in `protect`: either the reader sees the node
        // unlinked, or this scan sees the reader's hazard.
        fence(Ordering::SeqCst);

        let mut protected = HashSet::new();
        let mut curr = self.records.load(Ordering::Acquire) as *const HazardRecord;
        while !curr.is_null() {
            let record = unsafe { &*curr };
            for slot in &record.slots {
                let ptr = slot.load(Ordering::Acquire);
                if !ptr.is_null() {
                    protected.insert(ptr);
                }
            }
            curr = record.next;
        }
        protected
    }

    fn scan_threshold(&self) -> usize {
        RETIRE_THRESHOLD.max(2 * SLOTS_PER_RECORD * self.record_count.load(Ordering::Relaxed))
    }

    fn push_orphans(&self, nodes: Vec<RetiredNode>) {
        if nodes.is_empty() {
            return;
        }

        tracing::debug!(count = nodes.len(), "handing retired nodes to the orphan list");

        let batch = Box::into_raw(Box::new(OrphanBatch {
            nodes,
            next: ptr::null_mut(),
        }));
        let mut head = self.orphans.load(Ordering::Relaxed);
        loop {
            unsafe { (*batch).next = head };
            match self.orphans.compare_exchange_weak(
                head,
                batch,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    fn adopt_orphans(&self, into: &mut Vec<RetiredNode>) {
        let mut batch = self.orphans.swap(ptr::null_mut(), Ordering::Acquire);
        if batch.is_null() {
            return;
        }

        let before = into.len();
        while !batch.is_null() {
            let owned = unsafe { Box::from_raw(batch) };
            into.extend_from_slice(&owned.nodes);
            batch = owned.next;
        }

        tracing::debug!(count = into.len() - before, "adopted orphaned nodes");
    }

    /// Free every node in `retired` that no hazard slot protects; return the rest.
    fn reclaim_unprotected(&self, retired: Vec<RetiredNode>) -> Vec<RetiredNode> {
        if retired.is_empty() {
            return retired;
        }

        let protected = self.protected_pointers();
        let (kept, freed): (Vec<_>, Vec<_>) = retired
            .into_iter()
            .partition(|node| protected.contains(&node.ptr));

        tracing::trace!(freed = freed.len(), kept = kept.len(), "hazard scan");

        for node in freed {
            unsafe { node.reclaim() };
        }
        kept
    }
}

struct LocalState {
    retired: RefCell<Vec<RetiredNode>>,
    record_hint: Cell<*const HazardRecord>,
}

impl LocalState {
    // Returns whether the retired list has grown enough to be scanned.
    fn retire(&self, node: RetiredNode) -> bool {
        let mut retired = self.retired.borrow_mut();
        retired.push(node);
        retired.len() >= DOMAIN.scan_threshold()
    }

    fn scan(&self) {
        // The list is taken out so that a node destructor may retire more nodes.
        let mut retired = self.retired.take();
        DOMAIN.adopt_orphans(&mut retired);

        let kept = DOMAIN.reclaim_unprotected(retired);
        self.retired.borrow_mut().extend(kept);
    }
}

impl Drop for LocalState {
    fn drop(&mut self) {
        let retired = std::mem::take(self.retired.get_mut());
        let kept = DOMAIN.reclaim_unprotected(retired);
        DOMAIN.push_orphans(kept);
    }
}

thread_local! {
    static LOCAL: LocalState = const {
        LocalState {
            retired: RefCell::new(Vec::new()),
            record_hint: Cell::new(ptr::null()),
        }
    };
}

/// Hazard pointer memory reclamation guard.
///
/// `HazardGuard` is a zero-sized type; all state lives in a process-global
/// hazard domain and in per-thread retired lists. Memory held by retired but
/// unreclaimed nodes is bounded by the number of hazard records times the
/// scan threshold, independently of how long a reader stays pinned.
///
/// # Thread Safety
///
/// `HazardGuard` is `Send` and `Sync`. The `HazardReadGuard` returned by
/// [`Guard::pin`] is bound to the pinning thread.
///
#[derive(Clone, Copy, Default)]
pub struct HazardGuard {
    // Zero-sized - all state is in the global hazard domain
}

impl HazardGuard {
    /// Create a new hazard guard.
    pub fn new() -> Self {
        HazardGuard {}
    }

    /// Scan now and free every node retired by this thread (or orphaned by
    /// exited threads) that no hazard slot protects.
    pub fn flush() {
        let _ = LOCAL.try_with(LocalState::scan);
    }

    /// Number of nodes retired by this thread and not yet freed.
    pub fn pending_local() -> usize {
        LOCAL
            .try_with(|local| local.retired.borrow().len())
            .unwrap_or(0)
    }

    /// Number of hazard records ever allocated in this process.
    pub fn record_count() -> usize {
        DOMAIN.record_count.load(Ordering::Relaxed)
    }
}

/// An owned hazard record; its slots are cleared when it drops.
pub struct HazardReadGuard {
    record: &'static HazardRecord,
}

impl Drop for HazardReadGuard {
    fn drop(&mut self) {
        self.record.release();
        let record: *const HazardRecord = self.record;
        let _ = LOCAL.try_with(|local| local.record_hint.set(record));
    }
}

impl Guard for HazardGuard {
    type ReadGuard = HazardReadGuard;

    const PROTECT_SLOTS: usize = SLOTS_PER_RECORD;

    fn pin() -> Self::ReadGuard {
        HazardReadGuard {
            record: DOMAIN.acquire_record(),
        }
    }

    fn protect<N>(read_guard: &Self::ReadGuard, slot: usize, source: &AtomicPtr<N>) -> *mut N {
        let hazard = &read_guard.record.slots[slot];
        let mut ptr = source.load(Ordering::Relaxed);
        loop {
            hazard.store(ptr as *mut (), Ordering::Release);
            fence(Ordering::SeqCst);

            // Still reachable from `source` after publication: no scan that
            // starts from now on can miss it.
            let current = source.load(Ordering::Acquire);
            if current == ptr {
                return ptr;
            }
            ptr = current;
        }
    }

    unsafe fn defer_destroy<N>(&self, node: *mut N, dealloc: unsafe fn(*mut N)) {
        let retired = RetiredNode::new(node, dealloc);

        match LOCAL.try_with(|local| local.retire(retired)) {
            Ok(true) => Self::flush(),
            Ok(false) => {}
            // Thread-local storage is already torn down on this thread.
            Err(_) => DOMAIN.push_orphans(vec![retired]),
        }
    }
}
