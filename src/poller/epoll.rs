//! Linux `epoll(7)` backend.
//!
//! Grounded on `mio::sys::unix::selector::epoll`: one `epoll` fd shared by
//! every dispatch thread, `EPOLLONESHOT` deliberately *not* set because
//! this engine is level-triggered by design (spec.md's explicit non-goal
//! rules out edge-triggered semantics), and `epoll_wait` called directly
//! rather than through `timerfd`-based emulation.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::interest::Interest;
use crate::poller::{Poller, RawEvent};
use crate::token::Token;

pub struct Epoll {
    epoll_fd: RawFd,
}

impl Epoll {
    fn ctl(&self, op: libc::c_int, fd: RawFd, mut event: libc::epoll_event) -> io::Result<()> {
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

fn interest_to_epoll_events(interest: Interest) -> u32 {
    let mut events = 0u32;
    if interest.is_readable() {
        events |= libc::EPOLLIN as u32 | libc::EPOLLPRI as u32;
    }
    if interest.is_writable() {
        events |= libc::EPOLLOUT as u32;
    }
    // Level-triggered: no EPOLLET. See module doc.
    events
}

impl Poller for Epoll {
    fn init(_capacity_hint: usize) -> io::Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Epoll { epoll_fd })
    }

    fn term(&mut self) {
        if self.epoll_fd >= 0 {
            unsafe { libc::close(self.epoll_fd) };
            self.epoll_fd = -1;
        }
    }

    fn fork(&mut self) -> io::Result<()> {
        // The epoll instance and its interest list are inherited by a
        // forked child's fd table as-is; nothing to redo here. Re-arming
        // after fork (if the child drops some watched FDs) is the
        // caller's job via `Engine::fork_poller`.
        Ok(())
    }

    fn poll(&self, events: &mut Vec<RawEvent>, timeout: Option<Duration>) -> io::Result<()> {
        const MAX_EVENTS: usize = 256;
        let mut buf: [mem::MaybeUninit<libc::epoll_event>; MAX_EVENTS] =
            unsafe { mem::MaybeUninit::uninit().assume_init() };

        let timeout_ms = match timeout {
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        let rc = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                buf.as_mut_ptr() as *mut libc::epoll_event,
                MAX_EVENTS as libc::c_int,
                timeout_ms,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for i in 0..rc as usize {
            // SAFETY: the kernel initialized the first `rc` entries.
            let ev = unsafe { buf[i].assume_init() };
            let bits = ev.events;
            events.push(RawEvent {
                token: Token(ev.u64 as RawFd),
                readable: bits & (libc::EPOLLIN as u32 | libc::EPOLLPRI as u32) != 0,
                writable: bits & libc::EPOLLOUT as u32 != 0,
                error: bits & libc::EPOLLERR as u32 != 0,
                hup: bits & (libc::EPOLLHUP as u32 | libc::EPOLLRDHUP as u32) != 0,
            });
        }
        Ok(())
    }

    fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let event = libc::epoll_event {
            events: interest_to_epoll_events(interest),
            u64: token.0 as u64,
        };
        self.ctl(libc::EPOLL_CTL_ADD, fd, event)
    }

    fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let event = libc::epoll_event {
            events: interest_to_epoll_events(interest),
            u64: token.0 as u64,
        };
        self.ctl(libc::EPOLL_CTL_MOD, fd, event)
    }

    fn clo(&self, fd: RawFd) -> io::Result<()> {
        let event = libc::epoll_event { events: 0, u64: 0 };
        self.ctl(libc::EPOLL_CTL_DEL, fd, event)
    }

    const NAME: &'static str = "epoll";
}

impl Drop for Epoll {
    fn drop(&mut self) {
        self.term();
    }
}
