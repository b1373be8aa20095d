//! GX-241 arm commands
//!
//! Immediate queries return status and positions; buffered commands move
//! the gantry and needle. Z grows upward (Z=125 is higher than Z=25).

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::command::{require_finite, BufferedCommand, CommandError, CommandText, ImmediateCommand};

/// Factory device id of the arm
pub const DEFAULT_ARM_ID: u8 = 30;

/// Firmware ceiling for X/Y speed (mm/s); firmware default is 300
pub const MAX_XY_SPEED: f64 = 350.0;

/// Firmware ceiling for Z speed (mm/s); firmware default is 125
pub const MAX_Z_SPEED: f64 = 150.0;

/// Drive power ceiling (%)
pub const MAX_DRIVE: u8 = 100;

/// Motion axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// Speed ceiling for this axis
    pub const fn max_speed(self) -> f64 {
        match self {
            Axis::X | Axis::Y => MAX_XY_SPEED,
            Axis::Z => MAX_Z_SPEED,
        }
    }

    /// Axis letter
    pub const fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Arm queries (immediate commands)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmQuery {
    /// `%` - firmware identification, e.g. `GX-241 II v1.2.3.4`
    ModuleId,
    /// `$` - master reset
    Reset,
    /// `*` - `PPPP 100/20/125 VI E0`
    StatusSummary,
    /// `e` - current error number
    ReadError,
    /// `M` - one status character per axis (x, y, z)
    MotorStatus,
    /// `P` - `X/Y/Z` in mm
    Position,
    /// `Q` - `Axis=min/max` per axis
    TravelRanges,
    /// `X` - `xxx.xx/yyy.yy`
    XyPosition,
    /// `Z` - `zzz.zz`
    ZPosition,
}

impl ArmQuery {
    /// Wire command for this query
    pub const fn command(self) -> ImmediateCommand {
        let code = match self {
            ArmQuery::ModuleId => b'%',
            ArmQuery::Reset => b'$',
            ArmQuery::StatusSummary => b'*',
            ArmQuery::ReadError => b'e',
            ArmQuery::MotorStatus => b'M',
            ArmQuery::Position => b'P',
            ArmQuery::TravelRanges => b'Q',
            ArmQuery::XyPosition => b'X',
            ArmQuery::ZPosition => b'Z',
        };
        ImmediateCommand::from_table(code)
    }
}

/// Motor power request for one axis in the `E` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MotorPower {
    /// Energize
    On,
    /// Release
    Off,
    /// Leave as is
    #[default]
    Unchanged,
}

impl MotorPower {
    const fn wire(self) -> char {
        match self {
            MotorPower::On => '1',
            MotorPower::Off => '0',
            MotorPower::Unchanged => 'x',
        }
    }
}

/// One axis of a move: target and optional speed/drive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisMove {
    /// Target position in mm
    pub target: f64,
    /// Speed in mm/s (firmware default when absent)
    pub speed: Option<f64>,
    /// Drive power in % (requires a speed)
    pub drive: Option<u8>,
}

impl AxisMove {
    /// Move to `target` at the firmware default speed
    pub const fn to(target: f64) -> Self {
        Self {
            target,
            speed: None,
            drive: None,
        }
    }

    /// Set the speed (mm/s)
    pub fn at(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Set the drive power (%)
    pub fn with_drive(mut self, drive: u8) -> Self {
        self.drive = Some(drive);
        self
    }

    /// Append `{target}[:{speed}[:{drive}]]`
    fn encode_into(&self, axis: Axis, text: &mut CommandText) -> Result<(), CommandError> {
        let field = match axis {
            Axis::X => "x target",
            Axis::Y => "y target",
            Axis::Z => "z target",
        };
        let target = require_finite(field, self.target)?;
        if target < 0.0 {
            return Err(CommandError::Negative {
                field,
                value: target,
            });
        }
        text.push_decimal(target, 2)?;

        match (self.speed, self.drive) {
            (None, Some(_)) => return Err(CommandError::DriveWithoutSpeed(axis)),
            (None, None) => {}
            (Some(speed), drive) => {
                if !speed.is_finite() || speed <= 0.0 || speed > axis.max_speed() {
                    return Err(CommandError::SpeedOutOfRange {
                        axis,
                        value: speed,
                        max: axis.max_speed(),
                    });
                }
                text.push_char(':')?.push_decimal(speed, 2)?;
                if let Some(drive) = drive {
                    if drive == 0 || drive > MAX_DRIVE {
                        return Err(CommandError::DriveOutOfRange { axis, value: drive });
                    }
                    text.push_char(':')?.push_uint(drive as u32)?;
                }
            }
        }
        Ok(())
    }
}

/// Arm actions (buffered commands)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArmCommand {
    /// `E{x}{y}{z}` - energize or release motors
    SetMotorPower {
        x: MotorPower,
        y: MotorPower,
        z: MotorPower,
    },
    /// `e` - clear the current error
    ClearError,
    /// `e{n}` - raise an error (diagnostics)
    RaiseError(u16),
    /// `H` - home all axes (Z goes to its top first)
    Home,
    /// `X{px}[:sx[:dx]]/{py}[:sy[:dy]]`
    MoveXy { x: AxisMove, y: AxisMove },
    /// `Z{pz}[:sz[:dz]]`
    MoveZ(AxisMove),
}

impl ArmCommand {
    /// Encode into a buffered command frame
    pub fn encode(&self) -> Result<BufferedCommand, CommandError> {
        let mut text = CommandText::new();
        match self {
            ArmCommand::SetMotorPower { x, y, z } => {
                text.push_char('E')?
                    .push_char(x.wire())?
                    .push_char(y.wire())?
                    .push_char(z.wire())?;
            }
            ArmCommand::ClearError => {
                text.push_char('e')?;
            }
            ArmCommand::RaiseError(code) => {
                text.push_char('e')?.push_uint(*code as u32)?;
            }
            ArmCommand::Home => {
                text.push_char('H')?;
            }
            ArmCommand::MoveXy { x, y } => {
                text.push_char('X')?;
                x.encode_into(Axis::X, &mut text)?;
                text.push_char('/')?;
                y.encode_into(Axis::Y, &mut text)?;
            }
            ArmCommand::MoveZ(z) => {
                text.push_char('Z')?;
                z.encode_into(Axis::Z, &mut text)?;
            }
        }
        text.finish()
    }
}
