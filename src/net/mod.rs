//! Listener collaborators that exercise the engine's callback interface
//! end to end. Kept deliberately thin: no session/stream state machine
//! lives here (see spec.md's Non-goals).

pub mod unix_listener;
