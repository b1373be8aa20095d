//! Device families on the bus and their fault tables

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arm::{ArmQuery, DEFAULT_ARM_ID};
use crate::command::ImmediateCommand;
use crate::injector::{InjectorQuery, DEFAULT_INJECTOR_ID};
use crate::pump::{PumpQuery, DEFAULT_PUMP_ID};

/// GX-241 arm fault codes
const ARM_ERRORS: &[(u16, &str)] = &[
    (0, "No Error"),
    (10, "Unknown command"),
    (11, "Invalid NV-RAM address"),
    (12, "Safety stop activated"),
    (13, "Bad parameter entered"),
    (14, "FIFO Full"),
    (15, "FIFO Add"),
    (16, "Character limit"),
    (17, "X Axis park location"),
    (18, "Y Axis park location"),
    (20, "X Axis not homed"),
    (21, "Y Axis not homed"),
    (22, "Z Axis not homed"),
    (24, "X Axis moving"),
    (25, "Y Axis moving"),
    (26, "Z Axis moving"),
    (28, "X Axis stall"),
    (29, "Y Axis stall"),
    (30, "Z Axis stall"),
    (32, "X Axis encoder"),
    (33, "Y Axis encoder"),
    (34, "Z Axis encoder"),
    (36, "X Axis speed range"),
    (37, "Y Axis speed range"),
    (38, "Z Axis speed range"),
    (40, "X Axis target range"),
    (41, "Y Axis target range"),
    (42, "Z Axis target range"),
    (99, "Accessory Error"),
];

/// Pump fault codes
const PUMP_ERRORS: &[(u16, &str)] = &[
    (0, "No Error"),
    (10, "Unknown buffered command"),
    (11, "Invalid NV-RAM address"),
    (12, "Safety stop activated"),
    (16, "Character limit"),
    (20, "Pump command while not homed"),
    (22, "Pump command while busy"),
    (24, "Invalid syringe position"),
    (26, "Invalid syringe volume"),
    (28, "Invalid flow rate"),
    (30, "Invalid syringe size"),
    (32, "Invalid valve position"),
    (34, "Missing valve encoder"),
    (88, "Error unknown"),
];

/// Direct injector fault codes
const INJECTOR_ERRORS: &[(u16, &str)] = &[
    (0, "No Error"),
    (1, "Unknown command"),
    (2, "Invalid NV-RAM address"),
    (3, "Previous move not complete"),
    (4, "Invalid position requested"),
];

/// Description used for codes missing from a table
pub const UNKNOWN_FAULT: &str = "Unlisted fault code";

/// A device family sharing the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceKind {
    /// GX-241 XYZ arm
    Arm,
    /// Syringe pump
    Pump,
    /// Direct injection valve
    Injector,
}

impl DeviceKind {
    /// Factory-set bus id
    pub const fn default_id(self) -> u8 {
        match self {
            DeviceKind::Arm => DEFAULT_ARM_ID,
            DeviceKind::Pump => DEFAULT_PUMP_ID,
            DeviceKind::Injector => DEFAULT_INJECTOR_ID,
        }
    }

    /// Vendor description of a fault code
    pub fn describe_error(self, code: u16) -> &'static str {
        let table = match self {
            DeviceKind::Arm => ARM_ERRORS,
            DeviceKind::Pump => PUMP_ERRORS,
            DeviceKind::Injector => INJECTOR_ERRORS,
        };
        table
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, text)| *text)
            .unwrap_or(UNKNOWN_FAULT)
    }

    /// Query polled after a buffered command until the device settles
    pub const fn settle_query(self) -> ImmediateCommand {
        match self {
            DeviceKind::Arm => ArmQuery::MotorStatus.command(),
            DeviceKind::Pump => PumpQuery::MotorStatus.command(),
            DeviceKind::Injector => InjectorQuery::Status.command(),
        }
    }

    /// Number of status characters in the settle response
    pub const fn settle_width(self) -> usize {
        match self {
            DeviceKind::Arm => 3,
            DeviceKind::Pump => 2,
            DeviceKind::Injector => 1,
        }
    }

    /// Query returning the current fault code
    pub const fn read_error_query(self) -> ImmediateCommand {
        match self {
            DeviceKind::Arm => ArmQuery::ReadError.command(),
            DeviceKind::Pump => PumpQuery::ReadError.command(),
            DeviceKind::Injector => InjectorQuery::ReadError.command(),
        }
    }

    /// Lower-case name
    pub const fn name(self) -> &'static str {
        match self {
            DeviceKind::Arm => "arm",
            DeviceKind::Pump => "pump",
            DeviceKind::Injector => "injector",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
