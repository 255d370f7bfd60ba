//! Small helpers shared across the lock modules

use crate::types::ThreadToken;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TOKEN: Cell<u64> = const { Cell::new(0) };
}

/// Token of the calling thread, assigned on first call.
pub fn current_thread_token() -> ThreadToken {
    TOKEN.with(|cell| {
        let mut raw = cell.get();
        if raw == 0 {
            raw = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
            cell.set(raw);
        }
        // NEXT_TOKEN starts at 1 and only grows
        ThreadToken::from_raw(raw).unwrap_or_else(|| unreachable!("thread token overflow"))
    })
}

/// Nanoseconds in a `Duration`, saturating at `u64::MAX`.
#[inline]
pub fn duration_nanos(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_stable_per_thread() {
        let a = current_thread_token();
        assert_eq!(a, current_thread_token());
        let b = std::thread::spawn(current_thread_token).join().unwrap();
        assert_ne!(a, b);
    }
}
