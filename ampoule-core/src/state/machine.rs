//! Session state machine definition
//!
//! A session moves `Disconnected -> Connected -> Homed -> Ready`, and each
//! operation takes it `Ready -> Busy -> Ready`. A device fault or timeout
//! leaves it `Faulted` until the arm is homed again.

use core::fmt;

use super::events::Event;

/// Session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport
    Disconnected,
    /// Transport open, arm position not trusted
    Connected,
    /// Arm homed, positions are meaningful
    Homed,
    /// Homed and initialized, waiting for an operation
    Ready,
    /// An operation is issuing commands
    Busy,
    /// A device fault or timeout occurred; only homing is accepted
    Faulted(FaultKind),
}

/// What put the session into [`SessionState::Faulted`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Device reported a fault code
    Device,
    /// Device did not answer or never settled
    Timeout,
    /// Port level failure
    Link,
}

impl SessionState {
    /// Check if operations may start in this state
    pub fn accepts_operations(&self) -> bool {
        matches!(self, SessionState::Homed | SessionState::Ready)
    }

    /// Check if the arm may be homed in this state
    pub fn accepts_homing(&self) -> bool {
        matches!(
            self,
            SessionState::Connected
                | SessionState::Homed
                | SessionState::Ready
                | SessionState::Faulted(_)
        )
    }

    /// Check if this is a fault state
    pub fn is_faulted(&self) -> bool {
        matches!(self, SessionState::Faulted(_))
    }

    /// Process an event and return the next state
    pub fn transition(self, event: Event) -> Self {
        use SessionState as S;

        match (self, event) {
            // Link
            (S::Disconnected, Event::Connected) => S::Connected,
            (_, Event::Disconnected) => S::Disconnected,

            // Homing recovers from faults
            (S::Connected | S::Homed | S::Ready | S::Faulted(_), Event::Homed) => S::Homed,

            // Initialization
            (S::Homed | S::Ready, Event::Initialized) => S::Ready,

            // Operations
            (S::Homed | S::Ready, Event::OperationStarted) => S::Busy,
            (S::Busy, Event::OperationFinished) => S::Ready,

            // Faults
            (
                S::Connected | S::Homed | S::Ready | S::Busy | S::Faulted(_),
                Event::FaultDetected(kind),
            ) => S::Faulted(kind),

            // Default: stay in current state
            _ => self,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => f.write_str("disconnected"),
            SessionState::Connected => f.write_str("connected"),
            SessionState::Homed => f.write_str("homed"),
            SessionState::Ready => f.write_str("ready"),
            SessionState::Busy => f.write_str("busy"),
            SessionState::Faulted(kind) => write!(f, "faulted ({kind})"),
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Device => f.write_str("device fault"),
            FaultKind::Timeout => f.write_str("timeout"),
            FaultKind::Link => f.write_str("link failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_flow() {
        let state = SessionState::Disconnected;
        let state = state.transition(Event::Connected);
        assert_eq!(state, SessionState::Connected);
        let state = state.transition(Event::Homed);
        assert_eq!(state, SessionState::Homed);
        let state = state.transition(Event::Initialized);
        assert_eq!(state, SessionState::Ready);
    }

    #[test]
    fn test_operation_cycle() {
        let busy = SessionState::Ready.transition(Event::OperationStarted);
        assert_eq!(busy, SessionState::Busy);
        assert_eq!(busy.transition(Event::OperationFinished), SessionState::Ready);

        // An operation started right after homing ends in Ready as well
        let busy = SessionState::Homed.transition(Event::OperationStarted);
        assert_eq!(busy.transition(Event::OperationFinished), SessionState::Ready);
    }

    #[test]
    fn test_fault_from_any_live_state() {
        let states = [
            SessionState::Connected,
            SessionState::Homed,
            SessionState::Ready,
            SessionState::Busy,
        ];

        for state in states {
            let next = state.transition(Event::FaultDetected(FaultKind::Timeout));
            assert_eq!(next, SessionState::Faulted(FaultKind::Timeout));
        }
    }

    #[test]
    fn test_faulted_requires_homing() {
        let faulted = SessionState::Faulted(FaultKind::Device);
        assert_eq!(faulted.transition(Event::OperationStarted), faulted);
        assert_eq!(faulted.transition(Event::OperationFinished), faulted);
        assert_eq!(faulted.transition(Event::Initialized), faulted);
        assert_eq!(faulted.transition(Event::Homed), SessionState::Homed);
    }

    #[test]
    fn test_disconnected_ignores_operations() {
        let state = SessionState::Disconnected;
        assert_eq!(state.transition(Event::Homed), state);
        assert_eq!(state.transition(Event::OperationStarted), state);
        assert!(!state.accepts_operations());
        assert!(!state.accepts_homing());
    }

    #[test]
    fn test_disconnect_from_any_state() {
        for state in [
            SessionState::Ready,
            SessionState::Busy,
            SessionState::Faulted(FaultKind::Link),
        ] {
            assert_eq!(state.transition(Event::Disconnected), SessionState::Disconnected);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::Ready.to_string(), "ready");
        assert_eq!(
            SessionState::Faulted(FaultKind::Device).to_string(),
            "faulted (device fault)"
        );
    }
}
