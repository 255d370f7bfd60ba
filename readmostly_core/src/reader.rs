//! Per-reader-thread state.
//!
//! Every flag of a [`ReaderRecord`] is stored only by the owning thread. The
//! writer thread loads them while scanning the registry but never stores.

use crate::helpers::current_thread_token;
use crate::types::ThreadToken;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};

#[derive(Debug)]
pub struct ReaderRecord {
    owner: ThreadToken,
    thread: Thread,
    /// Holds or is asserting read access.
    read_requested: AtomicBool,
    /// Parked in the read backoff, waiting for `write_unlock` to wake it.
    blocked: AtomicBool,
    impatient: AtomicBool,
}

impl ReaderRecord {
    /// Record owned by the calling thread.
    pub fn for_current_thread() -> Self {
        Self {
            owner: current_thread_token(),
            thread: thread::current(),
            read_requested: AtomicBool::new(false),
            blocked: AtomicBool::new(false),
            impatient: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn owner(&self) -> ThreadToken {
        self.owner
    }

    #[inline]
    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    #[inline]
    pub fn is_read_requested(&self) -> bool {
        self.read_requested.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_impatient(&self) -> bool {
        self.impatient.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn set_read_requested(&self, value: bool) {
        self.debug_check_owner();
        self.read_requested.store(value, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn set_blocked(&self, value: bool) {
        self.debug_check_owner();
        self.blocked.store(value, Ordering::SeqCst);
    }

    /// Returns the previous value.
    #[inline]
    pub(crate) fn replace_impatient(&self, value: bool) -> bool {
        self.debug_check_owner();
        self.impatient.swap(value, Ordering::SeqCst)
    }

    #[inline]
    fn debug_check_owner(&self) {
        debug_assert_eq!(
            self.owner,
            current_thread_token(),
            "reader record mutated by a thread other than its owner"
        );
    }
}

/// Scoped `impatient = true`, restoring the previous value on every exit path.
pub(crate) struct ImpatientScope<'a> {
    record: &'a ReaderRecord,
    prev: bool,
}

impl<'a> ImpatientScope<'a> {
    pub(crate) fn enter(record: &'a ReaderRecord) -> Self {
        let prev = record.replace_impatient(true);
        Self { record, prev }
    }
}

impl Drop for ImpatientScope<'_> {
    fn drop(&mut self) {
        self.record.replace_impatient(self.prev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_is_idle() {
        let r = ReaderRecord::for_current_thread();
        assert_eq!(r.owner(), current_thread_token());
        assert!(!r.is_read_requested());
        assert!(!r.is_blocked());
        assert!(!r.is_impatient());
    }

    #[test]
    fn impatient_scope_nests_and_restores() {
        let r = ReaderRecord::for_current_thread();
        {
            let _outer = ImpatientScope::enter(&r);
            {
                let _inner = ImpatientScope::enter(&r);
                assert!(r.is_impatient());
            }
            // inner restored the outer value, not false
            assert!(r.is_impatient());
        }
        assert!(!r.is_impatient());
    }
}
