//! The callback interface (spec §6), replacing the C `(void *owner, void
//! (*iocb)(int))` pair with a single trait object. Owner and callback are
//! always the same Rust value once ownership is tracked by the type system,
//! so there is no reason to keep the split the original took for a language
//! with no closures. Stored as `Arc<dyn FdHandler>` in the table so the
//! dispatch loop can clone the reference out from under the per-FD
//! spinlock and invoke it unlocked — the lock stays O(1), the callback
//! itself is free to take as long as its own non-blocking contract allows.

use std::os::unix::io::RawFd;

use crate::engine::Engine;
use crate::state::Direction;

/// Implemented by whatever the application wants invoked when an FD shows
/// up in the ready cache: a connection, a listener, a timer fd, ...
///
/// Implementations must not block and must only perform non-blocking
/// syscalls on `fd`; the dispatch loop calls back in after unlinking the
/// FD from whichever ready cache it came from, so re-arming (`want_recv`,
/// `cant_recv`, ...) from inside `on_ready` is always safe.
pub trait FdHandler: Send + Sync {
    /// Called once per cache drain with the direction(s) currently ready.
    /// Implementations decide what to do: read/write `fd` directly (it is
    /// not wrapped by this crate), then call back into `engine` with
    /// `cant_recv`/`done_recv`/`stop_recv` etc. to update intent, or
    /// `engine.delete(fd)`/`engine.remove(fd)` to abandon the descriptor.
    fn on_ready(&self, engine: &Engine, fd: RawFd, readable: bool, writable: bool);

    /// Called by the dispatch loop if the callback region wants to report
    /// a fatal condition without panicking (rare; most handlers just call
    /// `engine.delete` from `on_ready` instead). Default is a no-op.
    fn on_error(&self, _engine: &Engine, _fd: RawFd, _dir: Direction) {}
}
