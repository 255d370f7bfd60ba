//! Host-side cancellation queries consulted by blocked and impatient readers

use std::sync::atomic::{AtomicBool, Ordering};

/// Read-only queries the host environment answers for the calling thread.
pub trait CancellationBridge: Send + Sync {
    /// True when the operation running on the calling thread has been cancelled.
    fn is_current_operation_cancelled(&self) -> bool;

    /// True while the host is inside a section that must not be interrupted.
    /// Suppresses both impatient-reader failure and blocked-reader cancellation.
    fn is_in_non_cancelable_section(&self) -> bool;
}

/// Bridge for hosts without a cancellation system.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancelled;

impl CancellationBridge for NeverCancelled {
    fn is_current_operation_cancelled(&self) -> bool {
        false
    }

    fn is_in_non_cancelable_section(&self) -> bool {
        false
    }
}

/// Process-wide flags a host toggles to drive cancellation.
#[derive(Debug, Default)]
pub struct CancellationFlags {
    cancelled: AtomicBool,
    non_cancelable: AtomicBool,
}

impl CancellationFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cancelled(&self, cancelled: bool) {
        self.cancelled.store(cancelled, Ordering::SeqCst);
    }

    pub fn set_non_cancelable(&self, non_cancelable: bool) {
        self.non_cancelable.store(non_cancelable, Ordering::SeqCst);
    }

    /// Run `f` with the non-cancelable flag raised, restoring the previous value afterwards.
    pub fn non_cancelable<R>(&self, f: impl FnOnce() -> R) -> R {
        let prev = self.non_cancelable.swap(true, Ordering::SeqCst);
        let _restore = Restore { flag: &self.non_cancelable, prev };
        f()
    }
}

struct Restore<'a> {
    flag: &'a AtomicBool,
    prev: bool,
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        self.flag.store(self.prev, Ordering::SeqCst);
    }
}

impl CancellationBridge for CancellationFlags {
    fn is_current_operation_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn is_in_non_cancelable_section(&self) -> bool {
        self.non_cancelable.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_cancelable_restores_on_panic() {
        let flags = CancellationFlags::new();
        let r = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            flags.non_cancelable(|| {
                assert!(flags.is_in_non_cancelable_section());
                panic!("boom");
            })
        }));
        assert!(r.is_err());
        assert!(!flags.is_in_non_cancelable_section());
    }

    #[test]
    fn never_cancelled_is_inert() {
        assert!(!NeverCancelled.is_current_operation_cancelled());
        assert!(!NeverCancelled.is_in_non_cancelable_section());
    }
}
