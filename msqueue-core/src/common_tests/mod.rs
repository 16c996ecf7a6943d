//! Reusable test bodies, generic over any `ConcurrentQueue`, shared by the
//! integration tests of every guard crate.

pub mod linearizability;
