//! Default tuning values for the read-mostly lock

use std::time::Duration;

/// Failed attempts a waiter yields the processor for before it starts parking.
pub const DEFAULT_SPIN_THRESHOLD: u32 = 100;

/// Upper bound on a single park. Every park is timed, so a lost wakeup costs one interval.
pub const DEFAULT_PARK_INTERVAL: Duration = Duration::from_millis(1);

/// Minimum wall time between two dead-reader GC passes.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_millis(1);

pub const ENV_SPIN_THRESHOLD: &str = "READMOSTLY_SPIN_THRESHOLD";
pub const ENV_PARK_INTERVAL_US: &str = "READMOSTLY_PARK_INTERVAL_US";
pub const ENV_GC_INTERVAL_US: &str = "READMOSTLY_GC_INTERVAL_US";
pub const ENV_CANCEL_ON_CONTENTION: &str = "READMOSTLY_CANCEL_ON_CONTENTION";

/// Thread token reserved for "no thread".
pub const NO_THREAD: u64 = 0;
