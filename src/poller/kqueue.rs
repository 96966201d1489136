//! BSD/macOS `kqueue(2)` backend.
//!
//! Grounded on `mio::sys::unix::selector::kqueue`: read and write interest
//! are two independent filters (`EVFILT_READ`/`EVFILT_WRITE`) rather than
//! one event mask, so `register`/`reregister` issue up to two `kevent`
//! calls — one `EV_ADD` for the wanted filter, one `EV_DELETE` for the
//! filter no longer wanted, mirroring how mio diffs the previous and next
//! `Interest` on reregister.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

use crate::interest::Interest;
use crate::poller::{Poller, RawEvent};
use crate::token::Token;

pub struct Kqueue {
    kq_fd: RawFd,
}

// Level-triggered: no EV_CLEAR on any changelist entry this builds.
fn changelist_for(fd: RawFd, interest: Interest, add: bool) -> Vec<libc::kevent> {
    let mut out = Vec::with_capacity(2);
    if !add || interest.is_readable() {
        out.push(libc::kevent {
            ident: fd as libc::uintptr_t,
            filter: libc::EVFILT_READ,
            flags: if add && interest.is_readable() {
                libc::EV_ADD
            } else {
                libc::EV_DELETE
            },
            fflags: 0,
            data: 0,
            udata: fd as *mut libc::c_void,
        });
    }
    if !add || interest.is_writable() {
        out.push(libc::kevent {
            ident: fd as libc::uintptr_t,
            filter: libc::EVFILT_WRITE,
            flags: if add && interest.is_writable() {
                libc::EV_ADD
            } else {
                libc::EV_DELETE
            },
            fflags: 0,
            data: 0,
            udata: fd as *mut libc::c_void,
        });
    }
    out
}

impl Kqueue {
    fn apply(&self, mut changes: Vec<libc::kevent>) -> io::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let rc = unsafe {
            libc::kevent(
                self.kq_fd,
                changes.as_mut_ptr(),
                changes.len() as libc::c_int,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Poller for Kqueue {
    fn init(_capacity_hint: usize) -> io::Result<Self> {
        let kq_fd = unsafe { libc::kqueue() };
        if kq_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Kqueue { kq_fd })
    }

    fn term(&mut self) {
        if self.kq_fd >= 0 {
            unsafe { libc::close(self.kq_fd) };
            self.kq_fd = -1;
        }
    }

    fn fork(&mut self) -> io::Result<()> {
        // A kqueue descriptor is *not* inherited in a usable state across
        // fork on most BSDs, unlike epoll. Re-create it; the caller
        // (`Engine::fork_poller`) is responsible for re-registering every
        // still-active fd afterward, per spec.md §5.
        self.term();
        let kq_fd = unsafe { libc::kqueue() };
        if kq_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        self.kq_fd = kq_fd;
        Ok(())
    }

    fn poll(&self, events: &mut Vec<RawEvent>, timeout: Option<Duration>) -> io::Result<()> {
        const MAX_EVENTS: usize = 256;
        let mut buf: [mem::MaybeUninit<libc::kevent>; MAX_EVENTS] =
            unsafe { mem::MaybeUninit::uninit().assume_init() };

        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts.as_ref().map(|t| t as *const libc::timespec).unwrap_or(ptr::null());

        let rc = unsafe {
            libc::kevent(
                self.kq_fd,
                ptr::null(),
                0,
                buf.as_mut_ptr() as *mut libc::kevent,
                MAX_EVENTS as libc::c_int,
                ts_ptr,
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
            let fd = ev.ident as RawFd;
            let readable = ev.filter == libc::EVFILT_READ;
            let writable = ev.filter == libc::EVFILT_WRITE;
            events.push(RawEvent {
                token: Token(fd),
                readable,
                writable,
                error: ev.flags & libc::EV_ERROR != 0,
                hup: ev.flags & libc::EV_EOF != 0,
            });
        }
        Ok(())
    }

    fn register(&self, fd: RawFd, _token: Token, interest: Interest) -> io::Result<()> {
        self.apply(changelist_for(fd, interest, true))
    }

    fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        // kqueue has no update-in-place; add the wanted filters and
        // delete the unwanted ones in a single batched `kevent` call.
        let mut changes = changelist_for(fd, interest, true);
        if !interest.is_readable() {
            changes.push(libc::kevent {
                ident: fd as libc::uintptr_t,
                filter: libc::EVFILT_READ,
                flags: libc::EV_DELETE,
                fflags: 0,
                data: 0,
                udata: token.0 as *mut libc::c_void,
            });
        }
        if !interest.is_writable() {
            changes.push(libc::kevent {
                ident: fd as libc::uintptr_t,
                filter: libc::EVFILT_WRITE,
                flags: libc::EV_DELETE,
                fflags: 0,
                data: 0,
                udata: token.0 as *mut libc::c_void,
            });
        }
        self.apply(changes)
    }

    fn clo(&self, fd: RawFd) -> io::Result<()> {
        self.apply(changelist_for(fd, Interest::READABLE.add(Interest::WRITABLE), false))
    }

    const NAME: &'static str = "kqueue";
}

impl Drop for Kqueue {
    fn drop(&mut self) {
        self.term();
    }
}
