//! Cross-thread wakeup, so that a `want_*`/`stop_*` call on thread A can
//! break thread B out of a blocking `poll()` call.
//!
//! Grounded on `mio::sys::unix::waker`: Linux gets an `eventfd(2)` (a
//! single read/write counter, coalescing any number of pending wakes into
//! one readiness event); every other unix target falls back to a
//! self-pipe. Either way the waker registers itself with the poller like
//! any other watched fd and its readiness is drained and discarded by the
//! dispatch loop — it carries no payload, it only means "re-check".

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::interest::Interest;
use crate::poller::PollerObj;
use crate::token::Token;

#[cfg(target_os = "linux")]
struct Inner {
    fd: RawFd,
}

#[cfg(target_os = "linux")]
impl Inner {
    fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Inner { fd })
    }

    fn wake(&self) -> io::Result<()> {
        let buf: [u8; 8] = 1u64.to_ne_bytes();
        let rc = unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, 8) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                // Counter already saturated / a wake is already pending:
                // the reader will still observe readiness.
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    fn drain(&self) {
        let mut buf = [0u8; 8];
        loop {
            let rc = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, 8) };
            if rc <= 0 {
                break;
            }
        }
    }
}

#[cfg(target_os = "linux")]
impl Drop for Inner {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

#[cfg(not(target_os = "linux"))]
struct Inner {
    read: std::os::unix::net::UnixStream,
    write: std::os::unix::net::UnixStream,
}

#[cfg(not(target_os = "linux"))]
impl Inner {
    fn new() -> io::Result<Self> {
        let (read, write) = std::os::unix::net::UnixStream::pair()?;
        read.set_nonblocking(true)?;
        write.set_nonblocking(true)?;
        Ok(Inner { read, write })
    }

    fn wake(&self) -> io::Result<()> {
        match (&self.write).write(&[1u8]) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.read).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    }

    fn fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }
}

#[cfg(target_os = "linux")]
impl Inner {
    fn fd(&self) -> RawFd {
        self.fd
    }
}

/// A registerable wakeup handle, one per `Engine`.
pub struct Waker {
    inner: Inner,
    token: Token,
}

impl Waker {
    pub fn new(poller: &dyn PollerObj, token: Token) -> io::Result<Self> {
        let inner = Inner::new()?;
        poller.register(inner.fd(), token, Interest::READABLE)?;
        Ok(Waker { inner, token })
    }

    pub fn wake(&self) -> io::Result<()> {
        self.inner.wake()
    }

    /// Drains the underlying primitive; call once per dispatch iteration
    /// after observing the waker's token in the event batch.
    pub fn drain(&self) {
        self.inner.drain()
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn raw_fd(&self) -> RawFd {
        self.inner.fd()
    }
}
