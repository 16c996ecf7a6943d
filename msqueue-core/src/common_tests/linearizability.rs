//! History recording and checking for concurrent queue tests.
//!
//! Every operation is stamped from a shared `SeqCst` counter right before it
//! starts and right after it returns. Operation `a` precedes `b` in real time
//! when `a.end < b.start`.
//!
//! With unique enqueued values, a queue history is checked for the patterns
//! that no linearization can explain:
//!
//! - a dequeue returns a value that was never enqueued, or returns before the
//!   enqueue of that value started
//! - a value is dequeued twice
//! - `enq(a)` precedes `enq(b)` but `b` is dequeued while `a` is never
//!   dequeued, or `deq(b)` precedes `deq(a)`
//! - a dequeue reports empty although, at every instant of its interval,
//!   some value must have been in the queue
//!
//! A value must be in the queue from the end of its enqueue to the start of
//! its dequeue (forever if never dequeued). Those presence intervals are
//! merged once; an empty dequeue whose interval lies inside one merged
//! segment has no point where it could have taken effect.
//!
//! The checks run in O(n log n).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared logical clock for stamping operation intervals.
#[derive(Default)]
pub struct HistoryClock {
    now: AtomicU64,
}

impl HistoryClock {
    pub fn new() -> Self {
        HistoryClock {
            now: AtomicU64::new(0),
        }
    }

    /// Run `op` and record it with its start and end stamps.
    pub fn record<F>(&self, op: F) -> QueueOperation
    where
        F: FnOnce() -> OperationKind,
    {
        let start = self.now.fetch_add(1, Ordering::SeqCst);
        let kind = op();
        let end = self.now.fetch_add(1, Ordering::SeqCst);
        QueueOperation { kind, start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Enqueue(u64),
    Dequeue(Option<u64>),
}

#[derive(Debug, Clone, Copy)]
pub struct QueueOperation {
    pub kind: OperationKind,
    pub start: u64,
    pub end: u64,
}

impl QueueOperation {
    fn precedes(&self, other: &QueueOperation) -> bool {
        self.end < other.start
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    DuplicateEnqueue(u64),
    DequeuedNeverEnqueued(u64),
    DequeuedBeforeEnqueued(u64),
    DequeuedTwice(u64),
    FifoInversion { first: u64, second: u64 },
    EmptyWhileOccupied { dequeue_start: u64, dequeue_end: u64 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::DuplicateEnqueue(v) => write!(f, "value {v} enqueued twice"),
            Violation::DequeuedNeverEnqueued(v) => write!(f, "value {v} dequeued but never enqueued"),
            Violation::DequeuedBeforeEnqueued(v) => {
                write!(f, "value {v} dequeued before its enqueue started")
            }
            Violation::DequeuedTwice(v) => write!(f, "value {v} dequeued twice"),
            Violation::FifoInversion { first, second } => write!(
                f,
                "enqueue of {first} precedes enqueue of {second}, but {second} left the queue first"
            ),
            Violation::EmptyWhileOccupied {
                dequeue_start,
                dequeue_end,
            } => write!(
                f,
                "dequeue over [{dequeue_start}, {dequeue_end}] reported empty while the queue held values throughout"
            ),
        }
    }
}

impl std::error::Error for Violation {}

struct ValueLife {
    enqueue: QueueOperation,
    dequeue: Option<QueueOperation>,
}

/// Enqueues sorted by end stamp with the running maximum of the matching
/// dequeue start (`u64::MAX` for values never dequeued).
struct PrecedingEnqueues {
    ends: Vec<u64>,
    latest_dequeue_start: Vec<(u64, u64)>,
}

impl PrecedingEnqueues {
    fn new(lives: &HashMap<u64, ValueLife>) -> Self {
        let mut by_end: Vec<_> = lives
            .iter()
            .map(|(value, life)| {
                let dequeue_start = life.dequeue.map_or(u64::MAX, |deq| deq.start);
                (life.enqueue.end, *value, dequeue_start)
            })
            .collect();
        by_end.sort_unstable();

        let mut ends = Vec::with_capacity(by_end.len());
        let mut latest_dequeue_start = Vec::with_capacity(by_end.len());
        let mut best: Option<(u64, u64)> = None;
        for (end, value, dequeue_start) in by_end {
            if best.is_none_or(|(start, _)| dequeue_start > start) {
                best = Some((dequeue_start, value));
            }
            ends.push(end);
            latest_dequeue_start.extend(best);
        }

        PrecedingEnqueues {
            ends,
            latest_dequeue_start,
        }
    }

    /// Among values whose enqueue finished before `stamp`, the one that
    /// starts leaving the queue last, as `(dequeue_start, value)`.
    fn latest_leaving_before(&self, stamp: u64) -> Option<(u64, u64)> {
        let count = self.ends.partition_point(|end| *end < stamp);
        count
            .checked_sub(1)
            .map(|index| self.latest_dequeue_start[index])
    }
}

/// Union of the intervals during which some value must be in the queue, as
/// disjoint `(start, end)` segments sorted by start.
struct OccupiedSegments {
    segments: Vec<(u64, u64)>,
}

impl OccupiedSegments {
    fn new(lives: &HashMap<u64, ValueLife>) -> Self {
        let mut presence: Vec<(u64, u64)> = lives
            .values()
            .map(|life| {
                let leaves = life.dequeue.map_or(u64::MAX, |deq| deq.start);
                (life.enqueue.end, leaves)
            })
            // A dequeue that overlaps its enqueue pins no interval.
            .filter(|(arrives, leaves)| arrives <= leaves)
            .collect();
        presence.sort_unstable();

        let mut segments: Vec<(u64, u64)> = Vec::with_capacity(presence.len());
        for (start, end) in presence {
            match segments.last_mut() {
                // Touching intervals leave no instant where the queue is empty.
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => segments.push((start, end)),
            }
        }

        OccupiedSegments { segments }
    }

    /// Whether `[start, end]` lies entirely inside one segment.
    fn covers(&self, start: u64, end: u64) -> bool {
        let count = self.segments.partition_point(|segment| segment.0 <= start);
        count
            .checked_sub(1)
            .is_some_and(|index| self.segments[index].1 >= end)
    }
}

/// Check a complete history (every operation returned) for queue violations.
pub fn check_queue_history(history: &[QueueOperation]) -> Result<(), Violation> {
    let mut lives: HashMap<u64, ValueLife> = HashMap::new();
    for op in history {
        if let OperationKind::Enqueue(value) = op.kind {
            let previous = lives.insert(
                value,
                ValueLife {
                    enqueue: *op,
                    dequeue: None,
                },
            );
            if previous.is_some() {
                return Err(Violation::DuplicateEnqueue(value));
            }
        }
    }

    let mut empty_dequeues = Vec::new();
    for op in history {
        match op.kind {
            OperationKind::Enqueue(_) => {}
            OperationKind::Dequeue(None) => empty_dequeues.push(*op),
            OperationKind::Dequeue(Some(value)) => {
                let life = lives
                    .get_mut(&value)
                    .ok_or(Violation::DequeuedNeverEnqueued(value))?;
                if op.precedes(&life.enqueue) {
                    return Err(Violation::DequeuedBeforeEnqueued(value));
                }
                if life.dequeue.replace(*op).is_some() {
                    return Err(Violation::DequeuedTwice(value));
                }
            }
        }
    }

    let preceding = PrecedingEnqueues::new(&lives);

    for (value, life) in &lives {
        let Some(dequeue) = life.dequeue else {
            continue;
        };
        if let Some((first_leaves, first)) = preceding.latest_leaving_before(life.enqueue.start) {
            if first_leaves > dequeue.end {
                return Err(Violation::FifoInversion {
                    first,
                    second: *value,
                });
            }
        }
    }

    let occupied = OccupiedSegments::new(&lives);
    for op in empty_dequeues {
        if occupied.covers(op.start, op.end) {
            return Err(Violation::EmptyWhileOccupied {
                dequeue_start: op.start,
                dequeue_end: op.end,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kind: OperationKind, start: u64, end: u64) -> QueueOperation {
        QueueOperation { kind, start, end }
    }

    use OperationKind::{Dequeue, Enqueue};

    #[test]
    fn test_sequential_history_is_valid() {
        let history = [
            op(Enqueue(1), 0, 1),
            op(Enqueue(2), 2, 3),
            op(Dequeue(Some(1)), 4, 5),
            op(Dequeue(Some(2)), 6, 7),
            op(Dequeue(None), 8, 9),
        ];
        assert_eq!(check_queue_history(&history), Ok(()));
    }

    #[test]
    fn test_overlapping_enqueues_may_leave_in_either_order() {
        let history = [
            op(Enqueue(1), 0, 3),
            op(Enqueue(2), 1, 2),
            op(Dequeue(Some(2)), 4, 5),
            op(Dequeue(Some(1)), 6, 7),
        ];
        assert_eq!(check_queue_history(&history), Ok(()));
    }

    #[test]
    fn test_fifo_inversion_detected() {
        let history = [
            op(Enqueue(1), 0, 1),
            op(Enqueue(2), 2, 3),
            op(Dequeue(Some(2)), 4, 5),
            op(Dequeue(Some(1)), 6, 7),
        ];
        assert_eq!(
            check_queue_history(&history),
            Err(Violation::FifoInversion {
                first: 1,
                second: 2
            })
        );
    }

    #[test]
    fn test_lost_value_overtaken_detected() {
        let history = [
            op(Enqueue(1), 0, 1),
            op(Enqueue(2), 2, 3),
            op(Dequeue(Some(2)), 4, 5),
        ];
        assert!(matches!(
            check_queue_history(&history),
            Err(Violation::FifoInversion { .. })
        ));
    }

    #[test]
    fn test_duplicate_and_fresh_values_detected() {
        let twice = [
            op(Enqueue(1), 0, 1),
            op(Dequeue(Some(1)), 2, 3),
            op(Dequeue(Some(1)), 4, 5),
        ];
        assert_eq!(check_queue_history(&twice), Err(Violation::DequeuedTwice(1)));

        let fresh = [op(Dequeue(Some(9)), 0, 1)];
        assert_eq!(
            check_queue_history(&fresh),
            Err(Violation::DequeuedNeverEnqueued(9))
        );

        let early = [op(Dequeue(Some(3)), 0, 1), op(Enqueue(3), 2, 3)];
        assert_eq!(
            check_queue_history(&early),
            Err(Violation::DequeuedBeforeEnqueued(3))
        );
    }

    #[test]
    fn test_empty_while_present_detected() {
        let history = [
            op(Enqueue(1), 0, 1),
            op(Dequeue(None), 2, 3),
            op(Dequeue(Some(1)), 4, 5),
        ];
        assert_eq!(
            check_queue_history(&history),
            Err(Violation::EmptyWhileOccupied {
                dequeue_start: 2,
                dequeue_end: 3
            })
        );
    }

    #[test]
    fn test_empty_while_values_overlap_detected() {
        // Neither value alone spans the empty dequeue, but 2 arrives before 1
        // leaves, so the queue is never empty during [2, 11].
        let history = [
            op(Enqueue(1), 0, 1),
            op(Dequeue(None), 2, 11),
            op(Enqueue(2), 2, 3),
            op(Dequeue(Some(1)), 4, 5),
            op(Dequeue(Some(2)), 12, 13),
        ];
        assert_eq!(
            check_queue_history(&history),
            Err(Violation::EmptyWhileOccupied {
                dequeue_start: 2,
                dequeue_end: 11
            })
        );
    }

    #[test]
    fn test_empty_in_gap_between_values_is_valid() {
        let history = [
            op(Enqueue(1), 0, 1),
            op(Dequeue(Some(1)), 2, 3),
            op(Dequeue(None), 2, 9),
            op(Enqueue(2), 6, 7),
            op(Dequeue(Some(2)), 10, 11),
        ];
        assert_eq!(check_queue_history(&history), Ok(()));
    }

    #[test]
    fn test_empty_while_value_never_dequeued_detected() {
        let history = [op(Enqueue(1), 0, 1), op(Dequeue(None), 2, 3)];
        assert!(matches!(
            check_queue_history(&history),
            Err(Violation::EmptyWhileOccupied { .. })
        ));
    }

    #[test]
    fn test_empty_overlapping_enqueue_is_valid() {
        let history = [
            op(Enqueue(1), 0, 3),
            op(Dequeue(None), 1, 2),
            op(Dequeue(Some(1)), 4, 5),
        ];
        assert_eq!(check_queue_history(&history), Ok(()));
    }

    #[test]
    fn test_recorded_stamps_are_ordered() {
        let clock = HistoryClock::new();
        let first = clock.record(|| Enqueue(1));
        let second = clock.record(|| Dequeue(Some(1)));

        assert!(first.start < first.end);
        assert!(first.precedes(&second));
        assert_eq!(check_queue_history(&[first, second]), Ok(()));
    }
}
