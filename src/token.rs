use std::os::unix::io::RawFd;

/// A tag attached to a kernel readiness event so the poller can report which
/// descriptor it belongs to.
///
/// Unlike `mio::Token`, which is an opaque caller-chosen value because mio's
/// `Poll` can watch arbitrary `Evented` sources, this engine's FD table is
/// indexed by the OS descriptor number itself (component A), so a `Token` is
/// always numerically equal to the FD it was issued for. The newtype still
/// earns its keep: it stops poller backends from mixing up a raw fd with an
/// epoll `u64` cookie or a kqueue `udata` pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub RawFd);

impl From<RawFd> for Token {
    fn from(fd: RawFd) -> Self {
        Token(fd)
    }
}

impl From<Token> for RawFd {
    fn from(token: Token) -> Self {
        token.0
    }
}
