//! Identity types shared by the lock, its readers and the registry

use std::fmt;
use std::num::NonZeroU64;

/// Opaque, process-unique identity of an OS thread.
///
/// Assigned lazily on first use by [`crate::helpers::current_thread_token`]
/// and never reused, so a token outlives the thread it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadToken(NonZeroU64);

impl ThreadToken {
    #[inline]
    pub(crate) fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(ThreadToken)
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ThreadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

/// Key of a reader record in the registry
pub type ReaderId = u64;
