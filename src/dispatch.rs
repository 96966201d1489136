//! Component F: the dispatch loop.
//!
//! `run_once` is `poll → process_cached_events → flush_update_list`
//! exactly as spec.md §4.F lays it out. `run` is the ambient "how does
//! this ever stop" wrapper the distilled spec leaves to the embedding
//! application's `main()`: a plain `AtomicBool` flag checked once per
//! iteration, the same shape as mio's own examples drive a `Poll::poll`
//! loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::trace;

use crate::engine::Engine;
use crate::poller::RawEvent;

/// Runs one dispatch iteration's `poll` step and callback fan-out.
pub struct Dispatch {
    engine: Arc<Engine>,
    events: Vec<RawEvent>,
    stop: Arc<AtomicBool>,
}

impl Dispatch {
    pub fn new(engine: Arc<Engine>) -> Self {
        Dispatch {
            engine,
            events: Vec::with_capacity(256),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clone-able handle that, when set, makes the next `run_once` (or
    /// the currently blocked `poll`, once it wakes) the last one `run`
    /// performs.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// One full cycle: block in the poller (unless local/global caches
    /// already have work, in which case poll with a zero timeout just to
    /// drain any already-ready kernel events without blocking), fold
    /// newly reported events into FD state, drain both ready caches
    /// calling back into owners, then flush this thread's update list to
    /// the poller.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        let effective_timeout = if self.engine.has_cached_work() {
            Some(Duration::ZERO)
        } else {
            timeout
        };

        self.events.clear();
        self.engine.poller_poll(&mut self.events, effective_timeout)?;
        trace!("fd-engine: poll returned {} events", self.events.len());

        for ev in self.events.drain(..) {
            self.engine.fd_update_events(ev);
        }

        self.engine.process_cached_events();
        self.engine.flush_update_list();
        Ok(())
    }

    /// Loops `run_once` until `stop_handle()` is set. `timeout` bounds
    /// each blocking `poll` call so the stop flag gets re-checked even
    /// with no I/O activity.
    pub fn run(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        while !self.stop.load(Ordering::Acquire) {
            self.run_once(timeout)?;
        }
        Ok(())
    }
}
