//! The error taxonomy surfaced to callers (spec §7).
//!
//! Like the teacher crate, most of the public API returns plain
//! [`std::io::Result`]; `EngineError` exists for the handful of seams where
//! the caller needs to distinguish a condition the engine itself detected
//! from an arbitrary OS error, and gets folded into `io::Error` at the
//! boundary via [`EngineError::into_io`].

use std::fmt;
use std::io;

/// Failures the engine itself can detect and report, as opposed to errors
/// that simply propagate from the OS.
#[derive(Debug)]
pub enum EngineError {
    /// A non-blocking syscall returned `EAGAIN`/`EWOULDBLOCK`. Callers
    /// should call `cant_recv`/`cant_send` and let the engine re-poll; the
    /// engine itself never manufactures this variant.
    WouldBlock,
    /// The poller backend returned something other than a plain I/O error
    /// (e.g. an unexpected `epoll_wait` return shape). The engine logs the
    /// fault, tears down the backend, and tries the next one in the
    /// registry.
    PollerFault(io::Error),
    /// `fd >= table.capacity()`; the transition was refused without being
    /// attempted. The caller owns the FD and must close it itself.
    SlotExhausted { fd: i32, capacity: usize },
    /// No poller backend in the registry could be initialized.
    FatalInit,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::WouldBlock => write!(f, "operation would block"),
            EngineError::PollerFault(e) => write!(f, "poller backend fault: {e}"),
            EngineError::SlotExhausted { fd, capacity } => {
                write!(f, "fd {fd} is outside the table's capacity ({capacity})")
            }
            EngineError::FatalInit => write!(f, "no poller backend could be initialized"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::PollerFault(e) => Some(e),
            _ => None,
        }
    }
}

impl EngineError {
    pub fn into_io(self) -> io::Error {
        match self {
            EngineError::WouldBlock => io::ErrorKind::WouldBlock.into(),
            EngineError::PollerFault(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}

impl From<EngineError> for io::Error {
    fn from(e: EngineError) -> io::Error {
        e.into_io()
    }
}
