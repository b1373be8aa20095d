//! Command link trait
//!
//! A link performs exactly one GSIOC exchange per call, selecting the target
//! device first when needed. It never retries: a failure is returned to the
//! caller as is.

use std::time::Duration;

use ampoule_protocol::{BufferedCommand, ImmediateCommand};

use crate::error::LinkError;

/// One request/response channel to the devices on a GSIOC bus
pub trait CommandLink {
    /// Send an immediate command and return the decoded response text
    fn immediate(
        &mut self,
        device_id: u8,
        command: &ImmediateCommand,
    ) -> Result<String, LinkError>;

    /// Send a buffered command and wait for its echo handshake to finish
    ///
    /// Returning `Ok` means the device accepted the command, not that the
    /// physical action has completed.
    fn buffered(&mut self, device_id: u8, command: &BufferedCommand) -> Result<(), LinkError>;

    /// Wait between settle polls and for timed pauses
    ///
    /// Simulated links override this to keep dry runs fast.
    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<L: CommandLink + ?Sized> CommandLink for Box<L> {
    fn immediate(
        &mut self,
        device_id: u8,
        command: &ImmediateCommand,
    ) -> Result<String, LinkError> {
        (**self).immediate(device_id, command)
    }

    fn buffered(&mut self, device_id: u8, command: &BufferedCommand) -> Result<(), LinkError> {
        (**self).buffered(device_id, command)
    }

    fn pause(&mut self, duration: Duration) {
        (**self).pause(duration)
    }
}

impl<L: CommandLink + ?Sized> CommandLink for &mut L {
    fn immediate(
        &mut self,
        device_id: u8,
        command: &ImmediateCommand,
    ) -> Result<String, LinkError> {
        (**self).immediate(device_id, command)
    }

    fn buffered(&mut self, device_id: u8, command: &BufferedCommand) -> Result<(), LinkError> {
        (**self).buffered(device_id, command)
    }

    fn pause(&mut self, duration: Duration) {
        (**self).pause(duration)
    }
}
