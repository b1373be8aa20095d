//! GSIOC command codec
//!
//! This crate encodes the commands understood by Gilson GSIOC devices (the
//! GX-241 arm, the syringe pump and the direct injector), decodes their
//! responses, and drives the two byte-level exchanges the bus defines.
//!
//! # Protocol Overview
//!
//! A single RS-232 line is shared by up to 64 devices. The master selects a
//! device by id, then issues one of two command kinds:
//!
//! ```text
//! Immediate (query, data response)
//!   master: 'M'
//!   slave:  'P'      master: ACK
//!   slave:  'P'      master: ACK
//!   slave:  'P'|0x80                 (high bit marks the last byte)
//!
//! Buffered (action, echo acknowledged)
//!   master: '\n'     slave: '\n'
//!   master: 'H'      slave: 'H'      ('#' = busy, resend)
//!   master: '\r'     slave: '\r'     (done)
//! ```
//!
//! Encoding validates every parameter, so a malformed command never reaches
//! the wire.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

pub mod arm;
pub mod command;
pub mod device;
pub mod exchange;
pub mod injector;
pub mod pump;
pub mod response;

pub use arm::{ArmCommand, ArmQuery, Axis, AxisMove, MotorPower};
pub use command::{format_decimal, BufferedCommand, CommandError, ImmediateCommand, MAX_BUFFERED_LEN};
pub use device::{DeviceKind, UNKNOWN_FAULT};
pub use exchange::{
    connect_byte, BufferedHandshake, EchoStep, ImmediateResponse, ImmediateStep, MAX_DEVICE_ID,
    MAX_RESPONSE_LEN,
};
pub use injector::{InjectorCommand, InjectorQuery};
pub use pump::{PumpCommand, PumpQuery, Valve, SYRINGE_SIZES};
pub use response::{
    parse_settle, AxisRange, DeviceStatus, InjectorPosition, MotorStatus, ProtocolError, Settle,
    StatusSummary, SyringeSize, SyringeStatus,
};
