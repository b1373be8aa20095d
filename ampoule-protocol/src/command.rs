//! Immediate and buffered command frames
//!
//! - Immediate: one 7-bit ASCII character, answered with data
//! - Buffered: a short printable ASCII string, answered only by echo
//!
//! Both are immutable once built. Device-specific builders in [`crate::arm`],
//! [`crate::pump`] and [`crate::injector`] validate their parameters before
//! producing a frame.

use core::fmt::{self, Write};

use heapless::String;

use crate::arm::Axis;

/// Longest buffered command accepted (the devices reject longer input with
/// a "character limit" fault)
pub const MAX_BUFFERED_LEN: usize = 40;

/// Scratch size for rendering one number
pub const NUMBER_BUF_LEN: usize = 24;

/// Errors raised while encoding a command
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum CommandError {
    /// Device ids live in [0, 64)
    #[error("device id {0} is outside [0, 64)")]
    DeviceIdOutOfRange(u8),
    /// Immediate command codes are 7-bit
    #[error("command code {0:#04x} is not 7-bit ASCII")]
    NonAsciiCode(u8),
    /// Buffered command with no text
    #[error("buffered command is empty")]
    Empty,
    /// Buffered command longer than the device buffer
    #[error("buffered command exceeds {} characters", MAX_BUFFERED_LEN)]
    TooLong,
    /// Control or non-ASCII character in a buffered command
    #[error("character {0:?} is not allowed in a buffered command")]
    InvalidCharacter(char),
    /// NaN or infinite parameter
    #[error("{field} must be a finite number")]
    NonFinite {
        /// Parameter name
        field: &'static str,
    },
    /// Negative position
    #[error("{field} must not be negative (got {value})")]
    Negative {
        /// Parameter name
        field: &'static str,
        /// Offending value
        value: f64,
    },
    /// Axis speed outside the firmware range
    #[error("{axis} speed {value} mm/s is outside (0, {max}]")]
    SpeedOutOfRange {
        /// Axis the speed applies to
        axis: Axis,
        /// Requested speed
        value: f64,
        /// Firmware maximum
        max: f64,
    },
    /// Drive power requires an explicit speed in the grammar
    #[error("{0} drive given without a speed")]
    DriveWithoutSpeed(Axis),
    /// Drive power is a percentage
    #[error("{axis} drive {value}% is outside 1..=100")]
    DriveOutOfRange {
        /// Axis the drive applies to
        axis: Axis,
        /// Requested drive
        value: u8,
    },
    /// Pump firmware only knows a fixed set of syringes
    #[error("syringe size {0} uL is not supported")]
    InvalidSyringeSize(u32),
    /// The reservoir valve only aspirates
    #[error("cannot dispense into the reservoir")]
    ReservoirDispense,
    /// Below the pump resolution (includes zero)
    #[error("pump volume {0} uL is below the 0.001 uL resolution")]
    VolumeTooSmall(f64),
    /// Flow rates are strictly positive
    #[error("flow rate {0} mL/min must be positive")]
    InvalidFlowRate(f64),
}

/// A single-character query command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImmediateCommand(u8);

impl ImmediateCommand {
    /// Build from an ASCII code
    pub const fn new(code: u8) -> Result<Self, CommandError> {
        if code >= 0x80 {
            return Err(CommandError::NonAsciiCode(code));
        }
        Ok(Self(code))
    }

    /// Build from a known-good code character (crate internal tables)
    pub(crate) const fn from_table(code: u8) -> Self {
        Self(code & 0x7F)
    }

    /// Wire byte
    pub const fn code(&self) -> u8 {
        self.0
    }

    /// Wire byte as a character
    pub fn as_char(&self) -> char {
        self.0 as char
    }
}

impl fmt::Display for ImmediateCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char(self.as_char())
    }
}

/// An action command, sent with an echo handshake
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferedCommand {
    text: String<MAX_BUFFERED_LEN>,
}

impl BufferedCommand {
    /// Build from raw text
    ///
    /// The text must be non-empty printable ASCII and fit the device buffer.
    /// The trailing carriage return is added by the handshake, not here.
    pub fn new(text: &str) -> Result<Self, CommandError> {
        if text.is_empty() {
            return Err(CommandError::Empty);
        }
        if let Some(c) = text.chars().find(|c| !is_printable(*c)) {
            return Err(CommandError::InvalidCharacter(c));
        }
        let mut owned = String::new();
        owned.push_str(text).map_err(|_| CommandError::TooLong)?;
        Ok(Self { text: owned })
    }

    /// Command text as sent (without terminator)
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Command bytes as sent (without terminator)
    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    /// Number of characters (without terminator)
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Always false for a constructed command
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl fmt::Display for BufferedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn is_printable(c: char) -> bool {
    c.is_ascii() && !c.is_ascii_control()
}

/// Incremental builder used by the device command families
pub(crate) struct CommandText {
    text: String<MAX_BUFFERED_LEN>,
}

impl CommandText {
    pub(crate) fn new() -> Self {
        Self {
            text: String::new(),
        }
    }

    pub(crate) fn push_str(&mut self, s: &str) -> Result<&mut Self, CommandError> {
        self.text.push_str(s).map_err(|_| CommandError::TooLong)?;
        Ok(self)
    }

    pub(crate) fn push_char(&mut self, c: char) -> Result<&mut Self, CommandError> {
        self.text.push(c).map_err(|_| CommandError::TooLong)?;
        Ok(self)
    }

    pub(crate) fn push_uint(&mut self, value: u32) -> Result<&mut Self, CommandError> {
        write!(self.text, "{}", value).map_err(|_| CommandError::TooLong)?;
        Ok(self)
    }

    /// Append `value` with at most `places` decimals, trailing zeros trimmed
    pub(crate) fn push_decimal(
        &mut self,
        value: f64,
        places: usize,
    ) -> Result<&mut Self, CommandError> {
        let rendered = format_decimal(value, places)?;
        self.push_str(&rendered)
    }

    pub(crate) fn finish(self) -> Result<BufferedCommand, CommandError> {
        BufferedCommand::new(&self.text)
    }
}

/// Render a number with at most `places` decimals, trimming trailing zeros
/// and a dangling decimal point (`50.000` -> `50`, `0.500` -> `0.5`)
pub fn format_decimal(value: f64, places: usize) -> Result<String<NUMBER_BUF_LEN>, CommandError> {
    if !value.is_finite() {
        return Err(CommandError::NonFinite { field: "value" });
    }
    let mut out: String<NUMBER_BUF_LEN> = String::new();
    write!(out, "{:.*}", places, value).map_err(|_| CommandError::TooLong)?;
    if out.contains('.') {
        while out.ends_with('0') {
            out.pop();
        }
        if out.ends_with('.') {
            out.pop();
        }
    }
    if out.as_str() == "-0" {
        out.clear();
        out.push('0').map_err(|_| CommandError::TooLong)?;
    }
    Ok(out)
}

/// Reject NaN and infinities for a named parameter
pub(crate) fn require_finite(field: &'static str, value: f64) -> Result<f64, CommandError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CommandError::NonFinite { field })
    }
}
