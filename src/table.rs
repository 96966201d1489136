//! Component A: the process-wide FD table.
//!
//! A fixed-size array indexed by the OS descriptor number, sized once at
//! startup to the process's FD ceiling. Index is O(1) and collision-free
//! because the kernel only reassigns a closed descriptor's number after
//! `close(2)` returns, at which point the slot has already been cleared by
//! `delete`/`remove`. Bounds are checked at the two edges that take a raw
//! caller-supplied fd (`insert`, `slot`); everything past that indexes with
//! `get_unchecked` because fd validity is the kernel's precondition, not
//! ours to re-derive on every hot-path call.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::callback::FdHandler;
use crate::error::EngineError;
use crate::spinlock::SpinLock;
use crate::state::FdState;

/// NIL sentinel for the intrusive ready-cache links (component D). A slot
/// not currently cached has `prev == NIL`.
pub const NIL: i32 = -1;

/// Data guarded by the slot's spinlock: everything that is either mutated
/// as a compound operation or read alongside such a mutation. `thread_mask`
/// lives here too, per invariant 4 (it only changes between insert/delete,
/// which already hold the lock).
pub struct SlotInner {
    pub owner: Option<Arc<dyn FdHandler>>,
    pub thread_mask: u64,
    pub linger_risk: bool,
    pub cloned: bool,
}

impl Default for SlotInner {
    fn default() -> Self {
        SlotInner {
            owner: None,
            thread_mask: 0,
            linger_risk: false,
            cloned: false,
        }
    }
}

/// One descriptor record (spec §3).
pub struct Slot {
    pub state: FdState,
    /// Sticky last-reported kernel event bitmap (IN/OUT/ERR/HUP), owned by
    /// the poller integration; see `Engine::fd_update_events`.
    pub ev: AtomicU64,
    pub update_mask: AtomicU64,
    pub polled_mask: AtomicU64,
    /// Ready-cache intrusive list pointers: table indices, `NIL` if this
    /// end of the list. `NIL` here does *not* imply the slot is absent
    /// from the cache — a single-entry list has `prev == next == NIL` —
    /// so membership is tracked separately by `cached`.
    pub next: AtomicI32,
    pub prev: AtomicI32,
    /// Whether this slot is currently linked into a ready cache (local or
    /// global). Set/cleared only while holding that cache's lock (global)
    /// or from the owning thread (local), so a plain `AtomicBool` suffices.
    pub cached: AtomicBool,
    pub in_use: AtomicBool,
    pub inner: SpinLock<SlotInner>,
}

impl Slot {
    fn new() -> Self {
        Slot {
            state: FdState::new(),
            ev: AtomicU64::new(0),
            update_mask: AtomicU64::new(0),
            polled_mask: AtomicU64::new(0),
            next: AtomicI32::new(NIL),
            prev: AtomicI32::new(NIL),
            cached: AtomicBool::new(false),
            in_use: AtomicBool::new(false),
            inner: SpinLock::new(SlotInner::default()),
        }
    }

    /// Whether the slot is currently linked into a ready cache (spec §4.D).
    pub fn in_cache(&self) -> bool {
        self.cached.load(Ordering::Acquire)
    }
}

pub struct FdTable {
    slots: Vec<Slot>,
}

impl FdTable {
    /// Allocates a table sized to `capacity` slots. Callers typically pass
    /// the process's `RLIMIT_NOFILE` soft limit (see `Engine::new`).
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::new);
        FdTable { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Visits every slot currently in use. Used by `Engine::fork_poller`
    /// to rebuild poller registrations after a backend that can't survive
    /// `fork` re-creates itself.
    pub fn for_each_in_use(&self, mut f: impl FnMut(RawFd, &Slot)) {
        for (fd, slot) in self.slots.iter().enumerate() {
            if slot.in_use.load(Ordering::Acquire) {
                f(fd as RawFd, slot);
            }
        }
    }

    #[inline]
    pub fn get(&self, fd: RawFd) -> Result<&Slot, EngineError> {
        if fd < 0 || fd as usize >= self.slots.len() {
            return Err(EngineError::SlotExhausted {
                fd,
                capacity: self.slots.len(),
            });
        }
        // SAFETY: bounds just checked above.
        Ok(unsafe { self.slots.get_unchecked(fd as usize) })
    }

    /// Hot-path accessor used once a caller already holds a valid `fd`
    /// (e.g. one just returned by the poller, which can only report FDs
    /// this table registered). Debug builds still assert in bounds.
    #[inline]
    pub unsafe fn get_unchecked(&self, fd: RawFd) -> &Slot {
        debug_assert!(fd >= 0 && (fd as usize) < self.slots.len());
        self.slots.get_unchecked(fd as usize)
    }

    /// `fd_insert`: prepares a slot for polling. The slot must not already
    /// be in use (callers must `delete`/`remove` before reusing an fd
    /// number, which the kernel only hands back after `close`).
    pub fn insert(
        &self,
        fd: RawFd,
        owner: Arc<dyn FdHandler>,
        thread_mask: u64,
    ) -> Result<(), EngineError> {
        let slot = self.get(fd)?;
        let mut inner = slot.inner.lock();
        inner.owner = Some(owner);
        inner.thread_mask = thread_mask;
        inner.linger_risk = false;
        inner.cloned = false;
        drop(inner);

        // A reused fd number must not inherit the previous tenant's state:
        // `stop_both` (run by `delete`/`remove`) clears ACTIVE and POLLED
        // but leaves READY bits set, so this can't be skipped.
        slot.state.reset();
        slot.ev.store(0, Ordering::Relaxed);
        // polled_mask deliberately left untouched: it records which
        // backends still know about this fd from a prior round, exactly
        // as fd_insert's comment in fd.h documents.
        slot.in_use.store(true, Ordering::Release);
        Ok(())
    }

    /// Clears a slot after `delete`/`remove`. `polled_mask` survives so the
    /// caller can tell the poller to forget the fd.
    pub fn clear(&self, fd: RawFd) -> Result<(), EngineError> {
        let slot = self.get(fd)?;
        slot.in_use.store(false, Ordering::Release);
        let mut inner = slot.inner.lock();
        inner.owner = None;
        inner.thread_mask = 0;
        Ok(())
    }
}
