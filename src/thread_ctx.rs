//! Small per-thread ids used to build `thread_mask`/`update_mask`/`polled_mask`.
//!
//! HAProxy assigns a compile-time `tid`/`tid_bit` to each worker thread;
//! here a thread claims the next free bit of a 64-bit counter the first
//! time it touches the engine, and keeps it for the thread's lifetime via a
//! `thread_local`.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hard ceiling on concurrent dispatch threads: masks are a single `u64`.
pub const MAX_THREADS: u32 = 64;

static NEXT_TID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static TID: Cell<Option<u32>> = const { Cell::new(None) };
}

/// Registers the calling OS thread with the engine, handing out the next
/// free tid. Idempotent: calling it again on the same thread returns the
/// same tid. Panics if more than [`MAX_THREADS`] threads ever register,
/// matching the compile-time `MAX_THREADS` ceiling this module replaces.
pub fn register_thread() -> u32 {
    TID.with(|cell| {
        if let Some(tid) = cell.get() {
            return tid;
        }
        let tid = NEXT_TID.fetch_add(1, Ordering::Relaxed);
        assert!(
            (tid as u32) < MAX_THREADS,
            "fd-engine: more than {MAX_THREADS} dispatch threads registered"
        );
        let tid = tid as u32;
        cell.set(Some(tid));
        tid
    })
}

/// The calling thread's tid, or `None` if it never called
/// [`register_thread`]. Used on assertion/debug paths; the hot path always
/// goes through `register_thread`, which is cheap after the first call.
pub fn current_tid() -> Option<u32> {
    TID.with(|cell| cell.get())
}

#[inline]
pub fn tid_bit(tid: u32) -> u64 {
    1u64 << tid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_within_thread() {
        let a = register_thread();
        let b = register_thread();
        assert_eq!(a, b);
    }
}
