use crate::guard::Guard;

/// A trait for unbounded multi-producer multi-consumer FIFO queues.
///
/// # Associated Types
///
/// - `Guard`: The memory reclamation guard type (e.g., `EpochGuard`, `HazardGuard`)
///
/// # Design
///
/// The trait lets tests and benchmarks run the same workload against every
/// reclamation strategy:
///
/// ```text
/// MsQueue<u64, EpochGuard>      - Production: epoch-based reclamation
/// MsQueue<u64, HazardGuard>     - Production: hazard pointers
/// MsQueue<u64, DeferredGuard>   - Testing: deferred destruction
/// ```
///
/// No operation ever blocks: `dequeue` on an empty queue returns `None`
/// immediately rather than waiting for a producer.
///
pub trait ConcurrentQueue<T> {
    type Guard: Guard;

    /// Get the shared guard instance for this queue.
    ///
    fn guard(&self) -> &Self::Guard;

    /// Append a value at the tail. Always succeeds.
    ///
    fn enqueue(&self, value: T);

    /// Remove and return the value at the head, or `None` if the queue is empty.
    ///
    fn dequeue(&self) -> Option<T>;

    /// Snapshot emptiness check.
    ///
    /// The answer may be stale by the time it is returned when other threads
    /// are enqueuing or dequeuing concurrently; it is exact only when the
    /// caller has excluded concurrent modification.
    ///
    fn is_empty(&self) -> bool;

    /// Dequeue until the queue reports empty, collecting the values in order.
    ///
    fn drain_to_vec(&self) -> Vec<T> {
        std::iter::from_fn(|| self.dequeue()).collect()
    }
}
