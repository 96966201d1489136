//! A minimal UNIX-stream listener collaborator, grounded on HAProxy's
//! `proto_uxst.c` (`create_uxst_socket`, `uxst_bind_listeners`,
//! `uxst_event_accept`).
//!
//! This does not reimplement the original's atomic bind-then-rename
//! socket-file dance (`create_uxst_socket`'s `.tmp`/`.bak` juggling is a
//! config-reload concern, out of scope here per spec.md's Non-goals on
//! configuration handling); what it keeps is the accept-loop shape: bind
//! non-blocking, register with the engine, accept in a loop until
//! `WouldBlock`, and apply a connection-count ceiling the same way
//! `uxst_event_accept` enforces `LI_FULL` by calling `fd_stop_recv` and
//! re-arms with `fd_want_recv` once a slot frees up.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener as StdUnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::callback::FdHandler;
use crate::engine::Engine;

/// Invoked once per accepted connection, with the listener's own engine
/// handle and the freshly accepted, already-non-blocking stream.
pub trait ConnectionHandler: Send + Sync {
    fn on_accept(&self, engine: &Engine, stream: UnixStream);
}

/// The uxst-equivalent listener: binds one UNIX-domain stream socket,
/// registers it with an [`Engine`], and accepts connections until
/// `max_conn` are outstanding (`HAProxy`'s `LI_FULL`), at which point it
/// stops asking for `Recv` readiness until [`UnixListener::release_slot`]
/// brings the count back down.
pub struct UnixListener {
    fd: RawFd,
    // kept alive so the fd stays valid and the socket file gets cleaned
    // up on drop, matching `std::os::unix::net::UnixListener`'s own Drop.
    _socket: StdUnixListener,
    max_conn: usize,
    active_conn: AtomicUsize,
    handler: Arc<dyn ConnectionHandler>,
}

impl UnixListener {
    pub fn bind<P: AsRef<Path>>(
        engine: &Arc<Engine>,
        path: P,
        max_conn: usize,
        thread_mask: u64,
        handler: Arc<dyn ConnectionHandler>,
    ) -> io::Result<Arc<UnixListener>> {
        let socket = StdUnixListener::bind(path)?;
        socket.set_nonblocking(true)?;
        let fd = socket.as_raw_fd();

        let listener = Arc::new(UnixListener {
            fd,
            _socket: socket,
            max_conn,
            active_conn: AtomicUsize::new(0),
            handler,
        });

        engine.insert(fd, listener.clone() as Arc<dyn FdHandler>, thread_mask)?;
        engine.want_recv(fd)?;
        debug!("fd-engine: uxst listener bound, fd={fd}, max_conn={max_conn}");
        Ok(listener)
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Called by the application once an accepted connection closes, so
    /// the listener can re-arm accepting if it had hit `max_conn`
    /// (`uxst_event_accept`'s drain path).
    pub fn release_slot(&self, engine: &Engine) {
        let prev = self.active_conn.fetch_sub(1, Ordering::AcqRel);
        if prev == self.max_conn {
            if let Err(e) = engine.want_recv(self.fd) {
                warn!("fd-engine: failed to re-arm uxst listener fd={}: {}", self.fd, e);
            }
        }
    }
}

impl FdHandler for UnixListener {
    fn on_ready(&self, engine: &Engine, fd: RawFd, readable: bool, _writable: bool) {
        if !readable {
            return;
        }
        loop {
            if self.active_conn.load(Ordering::Acquire) >= self.max_conn {
                // LI_FULL: stop accepting until release_slot is called.
                let _ = engine.stop_recv(fd);
                return;
            }

            match self._socket.accept() {
                Ok((stream, _addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!("fd-engine: failed to set accepted stream non-blocking: {e}");
                        continue;
                    }
                    self.active_conn.fetch_add(1, Ordering::AcqRel);
                    self.handler.on_accept(engine, stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let _ = engine.cant_recv(fd);
                    return;
                }
                Err(e) => {
                    warn!("fd-engine: uxst accept error on fd={fd}: {e}");
                    return;
                }
            }
        }
    }

    fn on_error(&self, _engine: &Engine, fd: RawFd, _dir: crate::state::Direction) {
        trace!("fd-engine: uxst listener fd={fd} reported an error/hup");
    }
}
