//! Events that trigger session transitions

use super::machine::FaultKind;

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Link events
    /// Transport opened
    Connected,
    /// Transport closed
    Disconnected,

    // Homing
    /// Arm homing finished (or trusted from an earlier session)
    Homed,
    /// Startup sequence finished: pump primed with its system air gap
    Initialized,

    // Operation lifecycle
    /// An operation started issuing commands
    OperationStarted,
    /// The operation finished or was rejected without a device fault
    OperationFinished,

    // Faults
    /// Device fault, timeout or link failure
    FaultDetected(FaultKind),
}

impl Event {
    /// Check if this event reports a failure
    pub fn is_fault(&self) -> bool {
        matches!(self, Event::FaultDetected(_))
    }
}
