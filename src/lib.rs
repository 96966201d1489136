//! A lock-free file-descriptor state machine and readiness dispatch loop
//! for multi-threaded, event-driven servers.
//!
//! The crate is built from six cooperating pieces: a process-wide
//! [`table::FdTable`] indexed by raw descriptor number, the packed-byte
//! state machine in [`state`], a per-thread [`update_list`] that tells the
//! [`poller`] backend what changed, a [`cache`] of currently-ready
//! descriptors (local to one thread, or shared when more than one thread
//! owns a descriptor), the [`poller`] abstraction itself (epoll, kqueue,
//! or portable `poll(2)`), and the [`dispatch`] loop tying `poll →
//! process_cached_events → flush_update_list` together every iteration.
//!
//! [`engine::Engine`] is the entry point most applications use directly;
//! the component modules are public so a caller can build a different
//! dispatch shape on top of the same primitives.

pub mod cache;
pub mod callback;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod interest;
pub mod net;
pub mod poller;
pub mod spinlock;
pub mod state;
pub mod table;
pub mod thread_ctx;
pub mod token;
pub mod update_list;
pub mod waker;

pub use callback::FdHandler;
pub use dispatch::Dispatch;
pub use engine::{Engine, EngineConfig};
pub use error::EngineError;
pub use interest::Interest;
pub use state::{Direction, ReadinessState};
pub use token::Token;
