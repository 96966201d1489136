//! The top-level `Engine`: wires components A–F together and exposes the
//! external interface of spec.md §6.
//!
//! Mirrors how `mio::Poll` sits on top of `sys::Selector`: callers get one
//! shared handle (wrap in `Arc` to hand to multiple dispatch threads), the
//! transition primitives of `state` are always reached through here so
//! that every state change is followed by the matching update-list/cache
//! bookkeeping, never called on a bare `FdState` directly outside tests.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{trace, warn};

use crate::callback::FdHandler;
use crate::cache::{CacheMask, GlobalCache, LocalCache};
use crate::error::EngineError;
use crate::interest::Interest;
use crate::poller::{self, BoxedPoller, PollerObj, RawEvent};
use crate::spinlock::SpinLock;
use crate::state::{Direction, ReadinessState};
use crate::table::FdTable;
use crate::thread_ctx;
use crate::token::Token;
use crate::update_list::UpdateList;
use crate::waker::Waker;

/// Tunables for the engine itself (spec.md §7). Configuration of the
/// embedding application is out of scope; these are the engine's own.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// FD table size. `None` reads `RLIMIT_NOFILE`'s soft limit.
    pub capacity: Option<usize>,
    /// Ceiling on concurrently registered dispatch threads, at most
    /// [`thread_ctx::MAX_THREADS`].
    pub max_threads: usize,
    /// Forces a specific poller backend by name (see `poller::list_pollers`),
    /// mainly for tests that want to exercise a non-default backend.
    pub force_backend: Option<&'static str>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            capacity: None,
            max_threads: thread_ctx::MAX_THREADS as usize,
            force_backend: None,
        }
    }
}

struct ThreadLocalState {
    local_cache: LocalCache,
    update_list: UpdateList,
}

pub struct Engine {
    table: FdTable,
    global_cache: GlobalCache,
    cache_mask: CacheMask,
    poller: RwLock<BoxedPoller>,
    waker: Waker,
    locals: Vec<SpinLock<ThreadLocalState>>,
    config: EngineConfig,
}

#[cfg(target_os = "linux")]
fn rlimit_nofile() -> usize {
    let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if rc != 0 || limit.rlim_cur == 0 {
        return 1024;
    }
    (limit.rlim_cur as usize).min(1 << 20)
}

#[cfg(not(target_os = "linux"))]
fn rlimit_nofile() -> usize {
    1024
}

impl Engine {
    pub fn new() -> io::Result<Arc<Engine>> {
        Engine::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> io::Result<Arc<Engine>> {
        let capacity = config.capacity.unwrap_or_else(rlimit_nofile);
        let table = FdTable::new(capacity);

        let poller = poller::init_poller(capacity, config.force_backend)?;
        let poller = RwLock::new(poller);

        let waker_token = Token(-1);
        let waker = {
            let guard = poller.read().unwrap();
            Waker::new(&**guard, waker_token)?
        };

        let mut locals = Vec::with_capacity(config.max_threads);
        for tid in 0..config.max_threads as u32 {
            locals.push(SpinLock::new(ThreadLocalState {
                local_cache: LocalCache::new(tid),
                update_list: UpdateList::new(tid),
            }));
        }

        Ok(Arc::new(Engine {
            table,
            global_cache: GlobalCache::new(),
            cache_mask: CacheMask::default(),
            poller,
            waker,
            locals,
            config,
        }))
    }

    /// Registers the calling OS thread with the engine's thread-id space.
    /// Must be called before a thread runs a `Dispatch` loop or otherwise
    /// expects `Engine` calls on it to route through a local cache.
    pub fn register_thread(&self) -> u32 {
        let tid = thread_ctx::register_thread();
        assert!(
            (tid as usize) < self.config.max_threads,
            "fd-engine: thread id {tid} exceeds configured max_threads ({})",
            self.config.max_threads
        );
        tid
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn waker(&self) -> &Waker {
        &self.waker
    }

    // --- A: FD lifecycle -------------------------------------------------

    /// `fd_insert`: registers `fd` with `owner` but does not yet arm any
    /// direction — callers follow up with `want_recv`/`want_send`.
    pub fn insert(&self, fd: RawFd, owner: Arc<dyn FdHandler>, thread_mask: u64) -> io::Result<()> {
        self.table.insert(fd, owner, thread_mask).map_err(EngineError::into_io)
    }

    /// `fd_delete`: stops both directions and queues the poller
    /// deregistration for the next update-list flush. The caller still
    /// owns closing the underlying descriptor.
    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let t = self.table.get(fd).map_err(EngineError::into_io)?.state.stop_both();
        if t.polled_changed() {
            self.enqueue_update(fd);
            self.wake_if_cross_thread(fd);
        }
        self.table.clear(fd).map_err(EngineError::into_io)
    }

    /// `fd_remove`: like `delete`, but deregisters from the poller
    /// immediately rather than deferring to the update list. Use when the
    /// descriptor is about to be `close`d and must not linger in the
    /// poller's interest list even momentarily.
    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        let slot = self.table.get(fd).map_err(EngineError::into_io)?;
        slot.state.stop_both();
        let poller = self.poller.read().unwrap();
        let _ = poller.clo(fd);
        // Unlike `delete`, which defers to the update list and leaves
        // `polled_mask` for `sync_fd_with_poller` to clear, `remove`
        // deregisters right here — it must clear the bit itself, or a later
        // `insert` on the reused fd number would see `registered == true`
        // and issue a `reregister` the kernel never `ADD`ed, silently
        // dropping the registration.
        slot.polled_mask.store(0, Ordering::Release);
        self.table.clear(fd).map_err(EngineError::into_io)
    }

    // --- B: state transitions ---------------------------------------------

    pub fn want_recv(&self, fd: RawFd) -> io::Result<()> {
        self.transition(fd, Direction::Recv, |s, d| s.want(d))
    }

    pub fn want_send(&self, fd: RawFd) -> io::Result<()> {
        self.transition(fd, Direction::Send, |s, d| s.want(d))
    }

    pub fn stop_recv(&self, fd: RawFd) -> io::Result<()> {
        self.transition(fd, Direction::Recv, |s, d| s.stop(d))
    }

    pub fn stop_send(&self, fd: RawFd) -> io::Result<()> {
        self.transition(fd, Direction::Send, |s, d| s.stop(d))
    }

    pub fn stop_both(&self, fd: RawFd) -> io::Result<()> {
        let slot = self.table.get(fd).map_err(EngineError::into_io)?;
        let t = slot.state.stop_both();
        if t.polled_changed() {
            self.enqueue_update(fd);
        }
        self.route_cache(fd);
        if t.changed {
            self.wake_if_cross_thread(fd);
        }
        Ok(())
    }

    pub fn may_recv(&self, fd: RawFd) -> io::Result<()> {
        self.transition(fd, Direction::Recv, |s, d| s.may(d))
    }

    pub fn may_send(&self, fd: RawFd) -> io::Result<()> {
        self.transition(fd, Direction::Send, |s, d| s.may(d))
    }

    pub fn cant_recv(&self, fd: RawFd) -> io::Result<()> {
        self.transition(fd, Direction::Recv, |s, d| s.cant(d))
    }

    pub fn cant_send(&self, fd: RawFd) -> io::Result<()> {
        self.transition(fd, Direction::Send, |s, d| s.cant(d))
    }

    /// `fd_done_recv`: there is no `done_send` in the original (see
    /// `state::FdState::done`).
    pub fn done_recv(&self, fd: RawFd) -> io::Result<()> {
        self.transition(fd, Direction::Recv, |s, d| s.done(d))
    }

    pub fn recv_state(&self, fd: RawFd) -> io::Result<ReadinessState> {
        Ok(self.table.get(fd).map_err(EngineError::into_io)?.state.recv_state())
    }

    pub fn send_state(&self, fd: RawFd) -> io::Result<ReadinessState> {
        Ok(self.table.get(fd).map_err(EngineError::into_io)?.state.send_state())
    }

    fn transition(
        &self,
        fd: RawFd,
        dir: Direction,
        f: impl FnOnce(&crate::state::FdState, Direction) -> crate::state::Transition,
    ) -> io::Result<()> {
        let slot = self.table.get(fd).map_err(EngineError::into_io)?;
        let t = f(&slot.state, dir);
        if !t.changed {
            return Ok(());
        }
        if t.polled_changed() {
            self.enqueue_update(fd);
        }
        self.route_cache(fd);
        self.wake_if_cross_thread(fd);
        Ok(())
    }

    // --- C: update list ----------------------------------------------------

    fn enqueue_update(&self, fd: RawFd) {
        let tid = self.register_thread();
        self.locals[tid as usize].lock().update_list.enqueue(&self.table, fd);
    }

    /// Flushes the *calling thread's* update list into the poller. Called
    /// once per `Dispatch::run_once` iteration.
    pub(crate) fn flush_update_list(&self) {
        let tid = self.register_thread();
        let poller = self.poller.read().unwrap();
        let table = &self.table;
        let mut local = self.locals[tid as usize].lock();
        local.update_list.flush(table, |fd| {
            self.sync_fd_with_poller(&poller, fd);
        });
    }

    fn sync_fd_with_poller(&self, poller: &BoxedPoller, fd: RawFd) {
        let slot = match self.table.get(fd) {
            Ok(s) => s,
            Err(_) => return,
        };
        let recv_active = slot.state.is_active(Direction::Recv);
        let send_active = slot.state.is_active(Direction::Send);
        let registered = slot.polled_mask.load(Ordering::Acquire) & 1 != 0;

        if !recv_active && !send_active {
            if registered {
                let _ = poller.clo(fd);
                slot.polled_mask.store(0, Ordering::Release);
            }
            return;
        }

        let interest = match (recv_active, send_active) {
            (true, true) => Interest::READABLE.add(Interest::WRITABLE),
            (true, false) => Interest::READABLE,
            (false, true) => Interest::WRITABLE,
            (false, false) => unreachable!("returned above"),
        };

        let token = Token(fd);
        let result = if registered {
            poller.reregister(fd, token, interest)
        } else {
            poller.register(fd, token, interest)
        };
        match result {
            Ok(()) => slot.polled_mask.store(1, Ordering::Release),
            Err(e) => warn!("fd-engine: poller sync failed for fd {fd}: {e}"),
        }
    }

    // --- D: ready cache ------------------------------------------------

    /// Keeps cache membership in sync with `wants_cache()`: links `fd` in
    /// when it starts wanting the cache and isn't linked yet (the alloc
    /// branch), and unlinks it when it stops wanting the cache but is still
    /// linked (the release branch) — `stop_*`/`cant_*`/`done_recv` driven
    /// from outside the fd's own callback (a timer, another thread) can
    /// turn `wants_cache()` false while the fd still sits in a cache,
    /// mirroring both branches of `fd_update_cache`.
    fn route_cache(&self, fd: RawFd) {
        let slot = match self.table.get(fd) {
            Ok(s) => s,
            Err(_) => return,
        };
        let wants = slot.state.wants_cache();
        let cached = slot.in_cache();
        if wants == cached {
            return;
        }

        let thread_mask = slot.inner.lock().thread_mask;
        let local_tid = (thread_mask.count_ones() == 1 && thread_mask != 0)
            .then(|| thread_mask.trailing_zeros() as usize)
            .filter(|&tid| tid < self.locals.len());

        if wants {
            if let Some(tid) = local_tid {
                self.locals[tid].lock().local_cache.push(&self.table, &self.cache_mask, fd);
                return;
            }
            self.global_cache.push(&self.table, fd);
            self.cache_mask.set_global();
        } else {
            if let Some(tid) = local_tid {
                self.locals[tid].lock().local_cache.remove(&self.table, &self.cache_mask, fd);
                return;
            }
            self.global_cache.unlink(&self.table, fd);
            if self.global_cache.is_empty() {
                self.cache_mask.clear_global();
            }
        }
    }

    /// Wakes the poller if `fd` is owned by a thread other than the caller
    /// (or spans more than one thread), so a `want_*`/`stop_*` call from one
    /// thread breaks the owning thread out of a blocking `poll()` rather
    /// than leaving its update/cache effects unnoticed until something else
    /// wakes it.
    fn wake_if_cross_thread(&self, fd: RawFd) {
        let slot = match self.table.get(fd) {
            Ok(s) => s,
            Err(_) => return,
        };
        let thread_mask = slot.inner.lock().thread_mask;
        let caller_bit = thread_ctx::tid_bit(self.register_thread());
        if thread_mask & caller_bit != thread_mask {
            if let Err(e) = self.waker.wake() {
                warn!("fd-engine: failed to wake poller for cross-thread transition on fd {fd}: {e}");
            }
        }
    }

    pub(crate) fn has_cached_work(&self) -> bool {
        !self.cache_mask.is_empty()
    }

    pub(crate) fn process_cached_events(&self) {
        let tid = self.register_thread();
        loop {
            let fd = self.locals[tid as usize].lock().local_cache.pop(&self.table, &self.cache_mask);
            match fd {
                Some(fd) => self.dispatch_callback(fd),
                None => break,
            }
        }
        while let Some(fd) = self.global_cache.pop(&self.table) {
            if self.global_cache.is_empty() {
                self.cache_mask.clear_global();
            }
            self.dispatch_callback(fd);
        }
    }

    fn dispatch_callback(&self, fd: RawFd) {
        let slot = match self.table.get(fd) {
            Ok(s) => s,
            Err(_) => return,
        };
        let readable = slot.state.is_ready(Direction::Recv);
        let writable = slot.state.is_ready(Direction::Send);
        let owner = slot.inner.lock().owner.clone();
        if let Some(owner) = owner {
            owner.on_ready(self, fd, readable, writable);
        }
    }

    // --- E/F: poller + dispatch plumbing --------------------------------

    pub(crate) fn poller_poll(&self, events: &mut Vec<RawEvent>, timeout: Option<Duration>) -> io::Result<()> {
        let poller = self.poller.read().unwrap();
        poller.poll(events, timeout)
    }

    /// Folds one kernel-reported event into the FD's state, draining the
    /// waker's own readiness without surfacing it to any `FdHandler`.
    pub(crate) fn fd_update_events(&self, ev: RawEvent) {
        if ev.token == self.waker.token() {
            trace!("fd-engine: waker fired");
            self.waker.drain();
            return;
        }

        let fd = ev.token.0;
        let slot = match self.table.get(fd) {
            Ok(s) => s,
            Err(_) => return,
        };

        let mut bits = 0u64;
        if ev.readable {
            bits |= 0b0001;
        }
        if ev.writable {
            bits |= 0b0010;
        }
        if ev.error {
            bits |= 0b0100;
        }
        if ev.hup {
            bits |= 0b1000;
        }
        slot.ev.store(bits, Ordering::Relaxed);

        if ev.readable || ev.hup || ev.error {
            self.mark_ready(fd, Direction::Recv);
        }
        if ev.writable || ev.error {
            self.mark_ready(fd, Direction::Send);
        }

        if ev.error || ev.hup {
            let owner = slot.inner.lock().owner.clone();
            if let Some(owner) = owner {
                owner.on_error(self, fd, Direction::Recv);
            }
        }
    }

    fn mark_ready(&self, fd: RawFd, dir: Direction) {
        let slot = match self.table.get(fd) {
            Ok(s) => s,
            Err(_) => return,
        };
        let t = slot.state.may(dir);
        if t.changed {
            self.route_cache(fd);
        }
    }

    /// `Engine::fork_poller`: re-creates whatever the poller backend
    /// cannot safely share with a forked child (spec.md §5), clearing this
    /// process's view of `polled_mask` so every still-active descriptor is
    /// re-registered against the fresh backend instance immediately,
    /// rather than waiting for its next incidental state transition.
    pub fn fork_poller(&self) -> io::Result<()> {
        self.poller.write().unwrap().fork()?;

        let poller = self.poller.read().unwrap();
        self.table.for_each_in_use(|fd, slot| {
            slot.polled_mask.store(0, Ordering::Release);
            self.sync_fd_with_poller(&poller, fd);
        });
        Ok(())
    }

    pub fn list_backends() -> Vec<&'static str> {
        poller::list_pollers()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.poller.write().unwrap().term();
    }
}
