//! Scoped ownership of a GSIOC bus
//!
//! A [`DeviceSession`] is the only handle to an open port. Dropping it
//! deselects every device and closes the port, whether the caller returns
//! normally, bails out with `?`, or unwinds from a panic.

use std::time::Duration;

use ampoule_core::{CommandLink, LinkError};
use ampoule_hal::Uart;
use ampoule_protocol::{BufferedCommand, ImmediateCommand};
use log::{info, warn};

use crate::error::TransportError;
use crate::gsioc::GsiocChannel;
use crate::serial::{resolve_port, SerialPort, SerialSettings};

/// An open bus, released on drop
#[derive(Debug)]
pub struct DeviceSession<U: Uart> {
    channel: GsiocChannel<U>,
    port_name: String,
}

impl DeviceSession<SerialPort> {
    /// Find and open the configured port
    pub fn open(settings: &SerialSettings) -> Result<Self, TransportError> {
        let port_name = resolve_port(&settings.selector())?;
        let port = SerialPort::open(&port_name, settings.timeout())?;
        Ok(Self::new(port_name, GsiocChannel::new(port)))
    }
}

impl<U: Uart> DeviceSession<U> {
    pub fn new(port_name: impl Into<String>, channel: GsiocChannel<U>) -> Self {
        Self {
            channel,
            port_name: port_name.into(),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn channel(&self) -> &GsiocChannel<U> {
        &self.channel
    }
}

impl<U: Uart> CommandLink for DeviceSession<U> {
    fn immediate(
        &mut self,
        device_id: u8,
        command: &ImmediateCommand,
    ) -> Result<String, LinkError> {
        self.channel.immediate(device_id, command)
    }

    fn buffered(&mut self, device_id: u8, command: &BufferedCommand) -> Result<(), LinkError> {
        self.channel.buffered(device_id, command)
    }

    fn pause(&mut self, duration: Duration) {
        self.channel.pause(duration)
    }
}

impl<U: Uart> Drop for DeviceSession<U> {
    fn drop(&mut self) {
        if let Err(e) = self.channel.disconnect_all() {
            warn!("Could not release the bus on {}: {e}", self.port_name);
        }
        info!("Connection closed");
    }
}
