//! Response decoding
//!
//! Every immediate command has a fixed response grammar. Decoders here turn
//! the raw ASCII text into typed values and reject anything else with a
//! [`ProtocolError`], which is distinct from a fault the device reports on
//! purpose.

use core::str::FromStr;

use heapless::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arm::Axis;
use crate::device::DeviceKind;
use crate::pump::Valve;

/// Framing and decoding failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Device answered with the unrecognized-command marker
    #[error("command {0:?} not recognized by the device")]
    Unrecognized(char),
    /// Status response of the wrong width
    #[error("expected {expected} status characters, got {actual}")]
    UnexpectedLength {
        /// Characters expected
        expected: usize,
        /// Characters received
        actual: usize,
    },
    /// Status character outside `E R U P`
    #[error("unknown status character {0:?}")]
    InvalidStatus(char),
    /// Response text does not match its grammar
    #[error("malformed {0} response")]
    Malformed(&'static str),
    /// Buffered handshake echoed the wrong byte
    #[error("expected echo {expected:#04x}, got {actual:#04x}")]
    UnexpectedEcho {
        /// Byte sent
        expected: u8,
        /// Byte echoed
        actual: u8,
    },
    /// Immediate response longer than the receive buffer
    #[error("response longer than {0} characters")]
    ResponseTooLong(usize),
}

/// Status character reported per motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceStatus {
    /// `E` - faulted
    Error,
    /// `R` - running
    Busy,
    /// `U` - unpowered
    Unpowered,
    /// `P` - parked (idle)
    Parked,
}

impl DeviceStatus {
    /// Decode one status character
    pub fn from_char(c: char) -> Result<Self, ProtocolError> {
        match c {
            'E' => Ok(DeviceStatus::Error),
            'R' => Ok(DeviceStatus::Busy),
            'U' => Ok(DeviceStatus::Unpowered),
            'P' => Ok(DeviceStatus::Parked),
            other => Err(ProtocolError::InvalidStatus(other)),
        }
    }

    /// Wire character
    pub const fn as_char(self) -> char {
        match self {
            DeviceStatus::Error => 'E',
            DeviceStatus::Busy => 'R',
            DeviceStatus::Unpowered => 'U',
            DeviceStatus::Parked => 'P',
        }
    }
}

/// Per-motor status (arm: x, y, z; pump: valve, syringe)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotorStatus {
    motors: Vec<DeviceStatus, 4>,
}

impl MotorStatus {
    /// Decode a status response of exactly `width` characters
    pub fn parse(response: &str, width: usize) -> Result<Self, ProtocolError> {
        let text = response.trim();
        let actual = text.chars().count();
        if actual != width || width > 4 {
            return Err(ProtocolError::UnexpectedLength {
                expected: width,
                actual,
            });
        }
        let mut motors = Vec::new();
        for c in text.chars() {
            motors
                .push(DeviceStatus::from_char(c)?)
                .map_err(|_| ProtocolError::UnexpectedLength {
                    expected: width,
                    actual,
                })?;
        }
        Ok(Self { motors })
    }

    /// Status of each motor in response order
    pub fn motors(&self) -> &[DeviceStatus] {
        &self.motors
    }

    /// Any motor still running
    pub fn is_busy(&self) -> bool {
        self.motors.contains(&DeviceStatus::Busy)
    }

    /// Any motor faulted
    pub fn has_error(&self) -> bool {
        self.motors.contains(&DeviceStatus::Error)
    }
}

/// Injector valve position (`X` query)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InjectorPosition {
    /// `R` - valve rotating
    Moving,
    /// `L` - load position
    Load,
    /// `I` - inject position
    Inject,
}

impl InjectorPosition {
    /// Decode the injector status response
    pub fn parse(response: &str) -> Result<Self, ProtocolError> {
        let text = response.trim();
        let mut chars = text.chars();
        let (Some(c), None) = (chars.next(), chars.next()) else {
            return Err(ProtocolError::UnexpectedLength {
                expected: 1,
                actual: text.chars().count(),
            });
        };
        match c {
            'R' => Ok(InjectorPosition::Moving),
            'L' => Ok(InjectorPosition::Load),
            'I' => Ok(InjectorPosition::Inject),
            other => Err(ProtocolError::InvalidStatus(other)),
        }
    }
}

/// Outcome of one settle poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// Still moving
    Busy,
    /// Finished
    Idle,
    /// A motor reports a fault; read the error code next
    Fault,
}

/// Interpret the response to [`DeviceKind::settle_query`]
pub fn parse_settle(kind: DeviceKind, response: &str) -> Result<Settle, ProtocolError> {
    match kind {
        DeviceKind::Arm | DeviceKind::Pump => {
            let status = MotorStatus::parse(response, kind.settle_width())?;
            if status.has_error() {
                Ok(Settle::Fault)
            } else if status.is_busy() {
                Ok(Settle::Busy)
            } else {
                Ok(Settle::Idle)
            }
        }
        DeviceKind::Injector => match InjectorPosition::parse(response)? {
            InjectorPosition::Moving => Ok(Settle::Busy),
            InjectorPosition::Load | InjectorPosition::Inject => Ok(Settle::Idle),
        },
    }
}

/// Decode an `e` response (error number)
pub fn parse_error_code(response: &str) -> Result<u16, ProtocolError> {
    parse_number(response.trim(), "error code")
}

/// Decode `xxx.xx/yyy.yy`
pub fn parse_xy(response: &str) -> Result<(f64, f64), ProtocolError> {
    let (x, y) = response
        .trim()
        .split_once('/')
        .ok_or(ProtocolError::Malformed("xy position"))?;
    Ok((
        parse_number(x, "xy position")?,
        parse_number(y, "xy position")?,
    ))
}

/// Decode `zzz.zz`
pub fn parse_z(response: &str) -> Result<f64, ProtocolError> {
    parse_number(response.trim(), "z position")
}

/// Decode `X/Y/Z`
pub fn parse_xyz(response: &str) -> Result<(f64, f64, f64), ProtocolError> {
    let mut parts = response.trim().split('/');
    let (Some(x), Some(y), Some(z), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ProtocolError::Malformed("xyz position"));
    };
    Ok((
        parse_number(x, "xyz position")?,
        parse_number(y, "xyz position")?,
        parse_number(z, "xyz position")?,
    ))
}

/// Valve position and syringe content (`P` pump query)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyringeStatus {
    /// Current valve position
    pub valve: Valve,
    /// Syringe content in uL, `None` when the pump reports `?` (not homed)
    pub volume_ul: Option<f64>,
}

impl SyringeStatus {
    /// Decode `n:v.vvv`
    pub fn parse(response: &str) -> Result<Self, ProtocolError> {
        let (valve, volume) = response
            .trim()
            .split_once(':')
            .ok_or(ProtocolError::Malformed("syringe status"))?;
        let mut letters = valve.chars();
        let valve = match (letters.next(), letters.next()) {
            (Some(c), None) => {
                Valve::from_letter(c).ok_or(ProtocolError::Malformed("syringe status"))?
            }
            _ => return Err(ProtocolError::Malformed("syringe status")),
        };
        let volume_ul = match volume.trim() {
            "?" => None,
            text => Some(parse_number(text, "syringe status")?),
        };
        Ok(Self { valve, volume_ul })
    }
}

/// Syringe description (`F` pump query): `size[uL] min-max (default)[mL/min]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyringeSize {
    /// Syringe volume in uL
    pub size_ul: u32,
    /// Flow rate range in mL/min, when reported
    pub flow_range: Option<(f64, f64)>,
    /// Default flow rate in mL/min, when reported
    pub default_flow: Option<f64>,
}

impl SyringeSize {
    /// Decode the syringe size response
    pub fn parse(response: &str) -> Result<Self, ProtocolError> {
        let mut tokens = response.split_whitespace();
        let size_ul = tokens
            .next()
            .map(|t| parse_number::<u32>(t, "syringe size"))
            .ok_or(ProtocolError::Malformed("syringe size"))??;
        let flow_range = match tokens.next() {
            Some(range) => {
                let (min, max) = range
                    .split_once('-')
                    .ok_or(ProtocolError::Malformed("syringe size"))?;
                Some((
                    parse_number(min, "syringe size")?,
                    parse_number(max, "syringe size")?,
                ))
            }
            None => None,
        };
        let default_flow = match tokens.next() {
            Some(token) => {
                let inner = token.trim_start_matches('(').trim_end_matches(')');
                Some(parse_number(inner, "syringe size")?)
            }
            None => None,
        };
        Ok(Self {
            size_ul,
            flow_range,
            default_flow,
        })
    }
}

/// One axis limit from the `Q` arm query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    /// Axis the limit applies to
    pub axis: Axis,
    /// Lower limit in mm
    pub min: f64,
    /// Upper limit in mm
    pub max: f64,
}

/// Decode `X=min/max Y=min/max Z=min/max` (whitespace or comma separated)
pub fn parse_travel_ranges(response: &str) -> Result<Vec<AxisRange, 3>, ProtocolError> {
    let mut ranges = Vec::new();
    for entry in response
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
    {
        let (name, limits) = entry
            .split_once('=')
            .ok_or(ProtocolError::Malformed("travel ranges"))?;
        let axis = match name.trim() {
            "X" | "x" => Axis::X,
            "Y" | "y" => Axis::Y,
            "Z" | "z" => Axis::Z,
            _ => return Err(ProtocolError::Malformed("travel ranges")),
        };
        let (min, max) = limits
            .split_once('/')
            .ok_or(ProtocolError::Malformed("travel ranges"))?;
        ranges
            .push(AxisRange {
                axis,
                min: parse_number(min, "travel ranges")?,
                max: parse_number(max, "travel ranges")?,
            })
            .map_err(|_| ProtocolError::Malformed("travel ranges"))?;
    }
    if ranges.is_empty() {
        return Err(ProtocolError::Malformed("travel ranges"));
    }
    Ok(ranges)
}

/// Arm status summary (`*` query), e.g. `PPPP 100/20/125 VI E0`
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSummary {
    /// Motor status characters as reported
    pub motors: MotorStatus,
    /// Position in mm
    pub position: (f64, f64, f64),
    /// Accessory valve position, when reported
    pub valve: Option<InjectorPosition>,
    /// Current error number
    pub error: u16,
}

impl StatusSummary {
    /// Decode the status summary response
    pub fn parse(response: &str) -> Result<Self, ProtocolError> {
        let mut tokens = response.split_whitespace();
        let motors_text = tokens.next().ok_or(ProtocolError::Malformed("status summary"))?;
        let motors = MotorStatus::parse(motors_text, motors_text.chars().count())?;
        let position = parse_xyz(tokens.next().ok_or(ProtocolError::Malformed("status summary"))?)?;

        let mut valve = None;
        let mut error = None;
        for token in tokens {
            if let Some(code) = token.strip_prefix('E') {
                error = Some(parse_number(code, "status summary")?);
            } else if let Some(position) = token.strip_prefix('V') {
                valve = Some(InjectorPosition::parse(position)?);
            } else {
                return Err(ProtocolError::Malformed("status summary"));
            }
        }
        Ok(Self {
            motors,
            position,
            valve,
            error: error.ok_or(ProtocolError::Malformed("status summary"))?,
        })
    }
}

/// Reject the unrecognized-command marker
pub fn check_recognized(command: char, response: &str) -> Result<(), ProtocolError> {
    if response == "#" {
        Err(ProtocolError::Unrecognized(command))
    } else {
        Ok(())
    }
}

fn parse_number<T: FromStr>(text: &str, what: &'static str) -> Result<T, ProtocolError> {
    text.trim().parse().map_err(|_| ProtocolError::Malformed(what))
}
