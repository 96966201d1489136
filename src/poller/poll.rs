//! Portable `poll(2)` backend.
//!
//! Grounded on `mio::sys::unix::selector::poll`: no kernel-side interest
//! list exists for `poll(2)`, so the backend keeps its own `Vec<pollfd>`
//! and rebuilds the argument array from it on every call. This is the
//! fallback used on anything other than Linux/BSD, and the backend
//! selectable via the `force-poll` feature for portable CI runs that want
//! to exercise the registration/poll contract without epoll- or
//! kqueue-specific behavior.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Mutex;
use std::time::Duration;

use crate::interest::Interest;
use crate::poller::{Poller, RawEvent};
use crate::token::Token;

struct Entry {
    fd: RawFd,
    token: Token,
    interest: Interest,
}

pub struct Poll {
    entries: Mutex<Vec<Entry>>,
}

impl Poller for Poll {
    fn init(capacity_hint: usize) -> io::Result<Self> {
        Ok(Poll {
            entries: Mutex::new(Vec::with_capacity(capacity_hint.min(4096))),
        })
    }

    fn term(&mut self) {
        self.entries.lock().unwrap().clear();
    }

    fn fork(&mut self) -> io::Result<()> {
        // `poll(2)` holds no kernel-side state to re-create; the interest
        // list itself survives fork fine since it is plain heap memory.
        Ok(())
    }

    fn poll(&self, events: &mut Vec<RawEvent>, timeout: Option<Duration>) -> io::Result<()> {
        let mut pollfds: Vec<libc::pollfd> = {
            let entries = self.entries.lock().unwrap();
            entries
                .iter()
                .map(|e| libc::pollfd {
                    fd: e.fd,
                    events: interest_to_events(e.interest),
                    revents: 0,
                })
                .collect()
        };
        if pollfds.is_empty() {
            if let Some(timeout) = timeout {
                std::thread::sleep(timeout);
            }
            return Ok(());
        }

        let timeout_ms = match timeout {
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        let entries = self.entries.lock().unwrap();
        for (pfd, entry) in pollfds.iter().zip(entries.iter()) {
            if pfd.revents == 0 {
                continue;
            }
            events.push(RawEvent {
                token: entry.token,
                readable: pfd.revents & (libc::POLLIN | libc::POLLPRI) != 0,
                writable: pfd.revents & libc::POLLOUT != 0,
                error: pfd.revents & libc::POLLERR != 0,
                hup: pfd.revents & (libc::POLLHUP | libc::POLLNVAL) != 0,
            });
        }
        Ok(())
    }

    fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|e| e.fd == fd) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "fd already registered"));
        }
        entries.push(Entry { fd, token, interest });
        Ok(())
    }

    fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| e.fd == fd) {
            Some(e) => {
                e.token = token;
                e.interest = interest;
                Ok(())
            }
            None => Err(io::Error::new(io::ErrorKind::NotFound, "fd not registered")),
        }
    }

    fn clo(&self, fd: RawFd) -> io::Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| e.fd != fd);
        Ok(())
    }

    const NAME: &'static str = "poll";
}

fn interest_to_events(interest: Interest) -> libc::c_short {
    let mut events = 0;
    if interest.is_readable() {
        events |= libc::POLLIN | libc::POLLPRI;
    }
    if interest.is_writable() {
        events |= libc::POLLOUT;
    }
    events as libc::c_short
}
