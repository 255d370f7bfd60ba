//! A mostly-read, writer-preferring, non-reentrant reader-writer lock.
//!
//! Built for workloads dominated by short reads and rare, latency-sensitive
//! writes issued by a single designated writer thread. Readers register once
//! per thread and then acquire and release read access with a store and a
//! load; the writer pays for that with a scan over every registered reader.

pub mod backoff;
pub mod cancellation;
pub mod config;
pub mod constants;
pub mod errors;
pub mod helpers;
pub mod reader;
pub mod reader_registry;
pub mod rwlock;
pub mod telemetry;
pub mod types;

pub use cancellation::{CancellationBridge, CancellationFlags, NeverCancelled};
pub use config::LockConfig;
pub use errors::Error;
pub use rwlock::{PreWriteHook, ReadGuard, ReadMostlyLock, ReaderHandle, WriteSuspension};
pub use types::{ReaderId, ThreadToken};

use once_cell::sync::OnceCell;

// ---- logging bootstraper -------------------------------------------------
/// Install a fallback `env_logger` once. A logger the host installed first wins.
pub fn ensure_logging() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        let _ = env_logger::builder()
            .is_test(std::env::var("RUST_TEST_THREADS").is_ok())
            .try_init();
    });
}
