//! Component E: the poller abstraction.
//!
//! `Poller` is the seam between the dispatch loop and whatever the kernel
//! offers for readiness notification. Backends are explicit: each module
//! below exposes a `probe()` constructor and registers itself in
//! [`POLLER_REGISTRY`], tried in preference order at startup. This
//! replaces the original's linker-section self-registration trick (see
//! `fd.h`'s `poller` struct array) with something `rustc` actually
//! supports without a build script.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::interest::Interest;
use crate::token::Token;

#[cfg(all(target_os = "linux", not(feature = "force-poll")))]
pub mod epoll;
#[cfg(all(
    any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ),
    not(feature = "force-poll")
))]
pub mod kqueue;
pub mod poll;

/// One kernel-reported readiness event, already resolved to the `Token`
/// (== `RawFd`, see `token`) it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct RawEvent {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hup: bool,
}

/// A backend capable of watching raw file descriptors for readiness.
///
/// All methods take `&self`: backends use interior synchronization
/// (typically none beyond the kernel's own object, since `epoll_ctl`/
/// `kevent` are already safe to call concurrently with `epoll_wait`) so
/// that a single `Poller` instance can be shared by every dispatch thread,
/// matching spec.md §4.E / §5.
pub trait Poller: Send + Sync {
    /// Constructs a fresh backend instance. `capacity_hint` is the FD
    /// table's capacity, usable as an initial interest-list allocation.
    fn init(capacity_hint: usize) -> io::Result<Self>
    where
        Self: Sized;

    /// Releases kernel resources (the epoll/kqueue fd). Called once, from
    /// `Engine::drop` or a fallback switch in `init_pollers`.
    fn term(&mut self);

    /// Re-creates whatever the backend cannot safely share across `fork`
    /// (epoll and kqueue fds are not inherited usefully across fork on
    /// some kernels once threads re-register). Default: re-`init`.
    fn fork(&mut self) -> io::Result<()>;

    /// Blocks up to `timeout` (or forever if `None`) for at least one
    /// event, appending results to `events` (not clearing it first, so
    /// callers can batch several pollers — not used here, but it matches
    /// `mio::sys::Selector::select`'s contract).
    fn poll(&self, events: &mut Vec<RawEvent>, timeout: Option<Duration>) -> io::Result<()>;

    /// First-time registration of `fd` for `interest`.
    fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()>;

    /// Updates an already-registered `fd`'s interest set.
    fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()>;

    /// Deregisters `fd`. Named `clo` (as in HAProxy's `fd_clo`) rather than
    /// `deregister` to keep this crate's vocabulary consistent with
    /// spec.md, even though it plays mio's `Selector::deregister` role.
    fn clo(&self, fd: RawFd) -> io::Result<()>;

    /// Backend name for diagnostics and `EngineConfig::force_backend`.
    const NAME: &'static str;
}

/// A type-erased `Poller` for the registry, since `Poller::init` is an
/// associated function (`Self: Sized`) and can't be called through a
/// trait object directly.
pub(crate) type BoxedPoller = Box<dyn PollerObj>;

/// Object-safe wrapper forwarding to a concrete `Poller`'s instance
/// methods; `init`/`NAME` are reached through the registry's probe
/// functions instead.
pub(crate) trait PollerObj: Send + Sync {
    fn term(&mut self);
    fn fork(&mut self) -> io::Result<()>;
    fn poll(&self, events: &mut Vec<RawEvent>, timeout: Option<Duration>) -> io::Result<()>;
    fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()>;
    fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()>;
    fn clo(&self, fd: RawFd) -> io::Result<()>;
    fn name(&self) -> &'static str;
}

impl<P: Poller> PollerObj for P {
    fn term(&mut self) {
        Poller::term(self)
    }
    fn fork(&mut self) -> io::Result<()> {
        Poller::fork(self)
    }
    fn poll(&self, events: &mut Vec<RawEvent>, timeout: Option<Duration>) -> io::Result<()> {
        Poller::poll(self, events, timeout)
    }
    fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        Poller::register(self, fd, token, interest)
    }
    fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        Poller::reregister(self, fd, token, interest)
    }
    fn clo(&self, fd: RawFd) -> io::Result<()> {
        Poller::clo(self, fd)
    }
    fn name(&self) -> &'static str {
        P::NAME
    }
}

struct Registration {
    name: &'static str,
    probe: fn(usize) -> io::Result<BoxedPoller>,
}

fn probe_of<P: Poller + 'static>() -> fn(usize) -> io::Result<BoxedPoller> {
    |capacity_hint| P::init(capacity_hint).map(|p| Box::new(p) as BoxedPoller)
}

/// Backends in preference order: the OS-native multiplexer first, the
/// portable `poll(2)` fallback last (or alone, under `force-poll`).
fn registry() -> Vec<Registration> {
    let mut regs = Vec::new();

    #[cfg(all(target_os = "linux", not(feature = "force-poll")))]
    regs.push(Registration {
        name: epoll::Epoll::NAME,
        probe: probe_of::<epoll::Epoll>(),
    });

    #[cfg(all(
        any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        ),
        not(feature = "force-poll")
    ))]
    regs.push(Registration {
        name: kqueue::Kqueue::NAME,
        probe: probe_of::<kqueue::Kqueue>(),
    });

    regs.push(Registration {
        name: poll::Poll::NAME,
        probe: probe_of::<poll::Poll>(),
    });

    regs
}

/// Names of every backend compiled into this binary, in registry order.
pub fn list_pollers() -> Vec<&'static str> {
    registry().into_iter().map(|r| r.name).collect()
}

/// Initializes the first working backend, optionally forced to a specific
/// name (`EngineConfig::force_backend`). Returns `EngineError::FatalInit`
/// (as `io::Error`) if every candidate fails, logging a `warn!` for each
/// rejected backend along the way.
pub(crate) fn init_poller(
    capacity_hint: usize,
    force_backend: Option<&str>,
) -> io::Result<BoxedPoller> {
    for reg in registry() {
        if let Some(forced) = force_backend {
            if reg.name != forced {
                continue;
            }
        }
        match (reg.probe)(capacity_hint) {
            Ok(p) => {
                log::debug!("fd-engine: using poller backend {}", reg.name);
                return Ok(p);
            }
            Err(e) => {
                log::warn!("fd-engine: poller backend {} failed to init: {}", reg.name, e);
            }
        }
    }
    Err(io::Error::new(
        io::ErrorKind::Other,
        "no poller backend could be initialized",
    ))
}
