//! Device session state machine
//!
//! Operations consult the session state before touching the link. The
//! machine is explicit, finite and deterministic.

pub mod events;
pub mod machine;

pub use events::Event;
pub use machine::{FaultKind, SessionState};
