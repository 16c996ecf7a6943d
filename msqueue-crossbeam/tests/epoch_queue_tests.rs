use std::time::Duration;

use msqueue_core::common_tests::queue_core_tests::*;
use msqueue_core::common_tests::queue_stress_tests::*;
use msqueue_core::data_structures::{ConcurrentQueue, MsQueue};
use msqueue_crossbeam::EpochGuard;
use rstest::rstest;
use serial_test::serial;

// Type aliases for cleaner test code
type EpochQueue = MsQueue<u64, EpochGuard>;

#[rstest]
#[case::epoch(EpochQueue::default())]
fn test_basic<C: ConcurrentQueue<u64> + Default>(#[case] _queue: C) {
    test_basic_operations::<C>();
}

#[rstest]
#[case::epoch(EpochQueue::default())]
fn test_empty<C: ConcurrentQueue<u64> + Default>(#[case] _queue: C) {
    test_empty_on_new::<C>();
    test_empty_after_drain::<C>();
}

#[rstest]
#[case::epoch(EpochQueue::default())]
fn test_sequential<C: ConcurrentQueue<u64> + Default>(#[case] _queue: C) {
    test_sequential_fifo::<C>();
    test_matches_sequential_model::<C>();
}

#[rstest]
#[case::epoch(EpochQueue::default())]
fn test_handoff<C: ConcurrentQueue<u64> + Default + Send + Sync + 'static>(#[case] _queue: C) {
    test_handoff_after_sync_point::<C>();
}

#[rstest]
#[serial(stress_tests)]
#[case::epoch(EpochQueue::default())]
fn test_concurrent<C: ConcurrentQueue<u64> + Default + Send + Sync + 'static>(
    #[case] _queue: C,
) {
    test_concurrent_enqueue::<C>();
}

#[rstest]
#[serial(stress_tests)]
#[case::epoch(EpochQueue::default())]
fn test_producers_and_consumers<C: ConcurrentQueue<u64> + Default + Send + Sync + 'static>(
    #[case] _queue: C,
) {
    test_producers_consumers::<C>();
    test_paired_operations_never_see_empty::<C>();
}

#[rstest]
#[serial(stress_tests)]
#[case::epoch(EpochQueue::default())]
fn test_linearizability<C: ConcurrentQueue<u64> + Default + Send + Sync + 'static>(
    #[case] _queue: C,
) {
    test_linearizable_history::<C>();
}

#[rstest]
#[serial(stress_tests)]
#[case::epoch(EpochQueue::default())]
fn test_polling<C: ConcurrentQueue<u64> + Default + Send + Sync + 'static>(#[case] _queue: C) {
    test_polling_empty_queue::<C>();
}

#[rstest]
#[serial(stress_tests)]
#[case::epoch(EpochQueue::default())]
fn test_epoch_throughput<C: ConcurrentQueue<u64> + Default + Send + Sync + 'static>(
    #[case] _queue: C,
) {
    assert!(test_throughput::<C>(Duration::from_secs(2)) > 0.0);
}
