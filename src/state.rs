//! The lock-free FD state machine.
//!
//! The packed byte described in the data model: low nibble is the read
//! (`Recv`) direction, high nibble is the write (`Send`) direction. Within
//! each nibble, bit 0 is `POLLED`, bit 1 is `READY`, bit 2 is `ACTIVE`.
//! Transitions are CAS loops that retry on collision; they never block and
//! never suppress a caller's intent, matching `include/proto/fd.h`'s
//! `fd_want_recv`/`fd_stop_recv`/... family.
//!
//! This module knows nothing about the update list or the ready cache: it
//! only computes the next byte and reports whether the `POLLED` bit of the
//! direction flipped. `Engine` is responsible for acting on that report.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

pub const POLLED: u8 = 0b0001;
pub const READY: u8 = 0b0010;
pub const ACTIVE: u8 = 0b0100;
const NIBBLE: u8 = 0b0111;

/// Which half of a full-duplex descriptor a transition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Recv,
    Send,
}

impl Direction {
    #[inline]
    fn shift(self) -> u32 {
        match self {
            Direction::Recv => 0,
            Direction::Send => 4,
        }
    }

    #[inline]
    fn mask(self) -> u8 {
        NIBBLE << self.shift()
    }

    #[inline]
    fn polled(self) -> u8 {
        POLLED << self.shift()
    }

    #[inline]
    fn ready(self) -> u8 {
        READY << self.shift()
    }

    #[inline]
    fn active(self) -> u8 {
        ACTIVE << self.shift()
    }
}

/// One of the eight states a direction's nibble can be in. Returned by
/// `recv_state`/`send_state` on [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Off,
    ReadyOnly,
    ActiveOnly,
    ActiveReady,
    PolledOnly,
    PolledReady,
    PolledActive,
    PolledActiveReady,
}

impl ReadinessState {
    fn from_nibble(n: u8) -> Self {
        match n & NIBBLE {
            0b000 => ReadinessState::Off,
            0b010 => ReadinessState::ReadyOnly,
            0b100 => ReadinessState::ActiveOnly,
            0b110 => ReadinessState::ActiveReady,
            0b001 => ReadinessState::PolledOnly,
            0b011 => ReadinessState::PolledReady,
            0b101 => ReadinessState::PolledActive,
            0b111 => ReadinessState::PolledActiveReady,
            _ => unreachable!("nibble masked to 3 bits"),
        }
    }
}

/// The outcome of a transition primitive.
///
/// `changed` is false when the operation's guard made it a no-op (e.g.
/// `want_recv` on an already-active direction) — in that case the caller
/// must not enqueue an update or touch the ready cache, exactly as the C
/// primitives `return` before reaching `fd_update_cache`.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub old: u8,
    pub new: u8,
    pub changed: bool,
}

impl Transition {
    fn no_op(byte: u8) -> Self {
        Transition {
            old: byte,
            new: byte,
            changed: false,
        }
    }

    /// Whether the `POLLED` bit of either direction flipped, i.e. whether
    /// the update list needs a new entry for this FD.
    pub fn polled_changed(&self) -> bool {
        self.changed && (self.old ^ self.new) & (Direction::Recv.polled() | Direction::Send.polled()) != 0
    }
}

/// The packed, atomically-updated state byte for one descriptor.
pub struct FdState(AtomicU8);

impl FdState {
    pub const fn new() -> Self {
        FdState(AtomicU8::new(0))
    }

    #[inline]
    pub fn load(&self, ordering: Ordering) -> u8 {
        self.0.load(ordering)
    }

    /// Zeroes the byte. Only valid on a slot that isn't concurrently
    /// reachable by any other thread yet, i.e. right before `FdTable::insert`
    /// hands it out — a reused fd number must not inherit a prior tenant's
    /// `READY` bits, which `stop_both` deliberately leaves set.
    #[inline]
    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }

    fn cas_loop(&self, mut f: impl FnMut(u8) -> Option<u8>) -> Transition {
        let mut old = self.0.load(Ordering::Relaxed);
        loop {
            let new = match f(old) {
                Some(new) => new,
                None => return Transition::no_op(old),
            };
            match self
                .0
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    return Transition {
                        old,
                        new,
                        changed: true,
                    }
                }
                Err(actual) => old = actual,
            }
        }
    }

    /// `want_recv`/`want_send`: the application now wants I/O in `dir`.
    pub fn want(&self, dir: Direction) -> Transition {
        self.cas_loop(|old| {
            if old & dir.active() != 0 {
                return None;
            }
            let mut new = old | dir.active();
            if new & dir.ready() == 0 {
                new |= dir.polled();
            }
            Some(new)
        })
    }

    /// `stop_recv`/`stop_send`: the application no longer wants I/O in `dir`.
    pub fn stop(&self, dir: Direction) -> Transition {
        self.cas_loop(|old| {
            if old & dir.active() == 0 {
                return None;
            }
            Some(old & !dir.active() & !dir.polled())
        })
    }

    /// `stop_both`: the atomic conjunction of `stop` on both directions.
    pub fn stop_both(&self) -> Transition {
        let both_active = Direction::Recv.active() | Direction::Send.active();
        let both_polled = Direction::Recv.polled() | Direction::Send.polled();
        self.cas_loop(|old| {
            if old & both_active == 0 {
                return None;
            }
            Some(old & !both_active & !both_polled)
        })
    }

    /// `may_recv`/`may_send`: the kernel (or a probe) says `dir` is ready.
    /// Never touches `POLLED`; has no guard, so it always runs.
    pub fn may(&self, dir: Direction) -> Transition {
        let old = self.0.fetch_or(dir.ready(), Ordering::AcqRel);
        Transition {
            old,
            new: old | dir.ready(),
            changed: true,
        }
    }

    /// `cant_recv`/`cant_send`: a non-blocking syscall returned `WouldBlock`.
    pub fn cant(&self, dir: Direction) -> Transition {
        self.cas_loop(|old| {
            if old & dir.ready() == 0 {
                return None;
            }
            let mut new = old & !dir.ready();
            if new & dir.active() != 0 {
                new |= dir.polled();
            }
            Some(new)
        })
    }

    /// `done_recv`: only valid when both `POLLED` and `READY` are set for
    /// `dir` (there is no `done_send` in the original — sending never
    /// voluntarily gives up readiness mid-drain the way a short read does).
    pub fn done(&self, dir: Direction) -> Transition {
        self.cas_loop(|old| {
            if old & (dir.polled() | dir.ready()) != (dir.polled() | dir.ready()) {
                return None;
            }
            let mut new = old & !dir.ready();
            if new & dir.active() != 0 {
                new |= dir.polled();
            }
            Some(new)
        })
    }

    pub fn recv_state(&self) -> ReadinessState {
        ReadinessState::from_nibble(self.load(Ordering::Acquire))
    }

    pub fn send_state(&self) -> ReadinessState {
        ReadinessState::from_nibble(self.load(Ordering::Acquire) >> Direction::Send.shift())
    }

    pub fn is_active(&self, dir: Direction) -> bool {
        self.load(Ordering::Acquire) & dir.active() != 0
    }

    pub fn is_ready(&self, dir: Direction) -> bool {
        self.load(Ordering::Acquire) & dir.ready() != 0
    }

    /// True if either direction is both `ACTIVE` and `READY`, i.e. the FD
    /// belongs in a ready cache right now (invariant 2).
    pub fn wants_cache(&self) -> bool {
        let byte = self.load(Ordering::Acquire);
        let want = |d: Direction| byte & (d.active() | d.ready()) == (d.active() | d.ready());
        want(Direction::Recv) || want(Direction::Send)
    }
}

impl fmt::Debug for FdState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdState")
            .field("byte", &format_args!("{:#010b}", self.load(Ordering::Relaxed)))
            .field("recv", &self.recv_state())
            .field("send", &self.send_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn want_then_may_then_done() {
        let s = FdState::new();
        let t = s.want(Direction::Recv);
        assert!(t.changed);
        assert_eq!(s.recv_state(), ReadinessState::PolledActive);

        // duplicate want is a no-op
        let t2 = s.want(Direction::Recv);
        assert!(!t2.changed);

        let t3 = s.may(Direction::Recv);
        assert!(t3.changed);
        assert_eq!(s.recv_state(), ReadinessState::PolledActiveReady);
        assert!(s.wants_cache());

        let t4 = s.done(Direction::Recv);
        assert!(t4.changed);
        assert!(!t4.polled_changed());
        assert_eq!(s.recv_state(), ReadinessState::PolledActive);
        assert!(!s.wants_cache());
    }

    #[test]
    fn cant_reasserts_polled() {
        let s = FdState::new();
        s.want(Direction::Recv);
        s.may(Direction::Recv);
        assert!(s.wants_cache());

        let t = s.cant(Direction::Recv);
        assert!(t.changed);
        assert_eq!(s.recv_state(), ReadinessState::PolledActive);
        assert!(!s.wants_cache());
    }

    #[test]
    fn stop_clears_polled_even_when_ready() {
        let s = FdState::new();
        s.want(Direction::Recv);
        s.may(Direction::Recv);

        let t = s.stop(Direction::Recv);
        assert!(t.changed);
        assert!(t.polled_changed());
        assert_eq!(s.recv_state(), ReadinessState::Off);
    }

    #[test]
    fn done_requires_polled_and_ready() {
        let s = FdState::new();
        // not active, not polled, not ready: done is a no-op
        let t = s.done(Direction::Recv);
        assert!(!t.changed);

        s.want(Direction::Recv);
        // active+polled but not ready yet: still a no-op
        let t = s.done(Direction::Recv);
        assert!(!t.changed);
    }

    #[test]
    fn directions_are_independent() {
        let s = FdState::new();
        s.want(Direction::Recv);
        s.want(Direction::Send);
        assert_eq!(s.recv_state(), ReadinessState::PolledActive);
        assert_eq!(s.send_state(), ReadinessState::PolledActive);

        s.may(Direction::Send);
        assert_eq!(s.recv_state(), ReadinessState::PolledActive);
        assert_eq!(s.send_state(), ReadinessState::PolledActiveReady);
    }

    #[test]
    fn stop_both_clears_whole_byte() {
        let s = FdState::new();
        s.want(Direction::Recv);
        s.want(Direction::Send);
        s.may(Direction::Recv);

        let t = s.stop_both();
        assert!(t.changed);
        assert_eq!(s.recv_state(), ReadinessState::Off);
        assert_eq!(s.send_state(), ReadinessState::Off);
    }
}
