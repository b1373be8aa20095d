//! Host transport for GSIOC devices
//!
//! This crate turns a serial port into the [`ampoule_core::CommandLink`]
//! the device backend talks through:
//!
//! - [`serial`]: `serialport`-backed UART with the fixed GSIOC framing,
//!   port discovery by USB descriptor
//! - [`gsioc`]: device selection and the two exchange kinds over any UART
//! - [`session`]: scoped ownership of the bus, released on every exit path

#![deny(unsafe_code)]

pub mod error;
pub mod gsioc;
pub mod serial;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use error::TransportError;
pub use gsioc::{GsiocChannel, GsiocTiming};
pub use serial::{list_ports, resolve_port, PortInfo, PortSelector, SerialPort, SerialSettings};
pub use session::DeviceSession;
