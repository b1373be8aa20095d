//! Byte-level exchange state machines
//!
//! These types hold no I/O. A channel feeds them the bytes it reads and
//! writes whatever they ask for, so the same logic runs against a serial
//! port or a scripted test device.

use heapless::{String, Vec};

use crate::command::{BufferedCommand, CommandError, ImmediateCommand};
use crate::response::ProtocolError;

/// Deselects every device on the bus
pub const DISCONNECT_ALL: u8 = 0xFF;
/// Master acknowledgement between immediate response bytes
pub const ACK: u8 = 0x06;
/// Busy echo during a buffered handshake, or an unrecognized immediate command
pub const UNRECOGNIZED: u8 = b'#';
/// Opens a buffered command
pub const START_BUFFERED: u8 = b'\n';
/// Closes a buffered command
pub const END_BUFFERED: u8 = b'\r';
/// High bit marking the last byte of an immediate response
pub const LAST_BYTE_FLAG: u8 = 0x80;
/// Device ids live in [0, MAX_DEVICE_ID)
pub const MAX_DEVICE_ID: u8 = 64;
/// Longest immediate response accepted
pub const MAX_RESPONSE_LEN: usize = 64;
/// Pause after the disconnect byte before selecting a device
pub const DISCONNECT_SETTLE_MS: u64 = 20;
/// Pause after a device acknowledges selection
pub const CONNECT_SETTLE_MS: u64 = 200;
/// Time allowed per character of a buffered handshake
pub const BUFFERED_CHAR_WINDOW_MS: u64 = 200;

/// Byte that selects device `id`
pub fn connect_byte(id: u8) -> Result<u8, CommandError> {
    if id >= MAX_DEVICE_ID {
        return Err(CommandError::DeviceIdOutOfRange(id));
    }
    Ok(id | LAST_BYTE_FLAG)
}

/// What the channel does after feeding an immediate response byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImmediateStep {
    /// Send [`ACK`] and read the next byte
    Acknowledge,
    /// Response complete
    Complete(String<MAX_RESPONSE_LEN>),
}

/// Assembles an immediate response one byte at a time
#[derive(Debug, Clone)]
pub struct ImmediateResponse {
    command: char,
    text: String<MAX_RESPONSE_LEN>,
}

impl ImmediateResponse {
    /// Start collecting the response to `command`
    pub fn new(command: &ImmediateCommand) -> Self {
        Self {
            command: command.as_char(),
            text: String::new(),
        }
    }

    /// Feed one received byte
    pub fn feed(&mut self, byte: u8) -> Result<ImmediateStep, ProtocolError> {
        let last = byte & LAST_BYTE_FLAG != 0;
        let value = byte & !LAST_BYTE_FLAG;

        if self.text.is_empty() && byte == UNRECOGNIZED {
            return Err(ProtocolError::Unrecognized(self.command));
        }

        self.text
            .push(value as char)
            .map_err(|_| ProtocolError::ResponseTooLong(MAX_RESPONSE_LEN))?;

        if !last {
            return Ok(ImmediateStep::Acknowledge);
        }
        if self.text.as_str() == "#" {
            return Err(ProtocolError::Unrecognized(self.command));
        }
        Ok(ImmediateStep::Complete(core::mem::take(&mut self.text)))
    }

    /// Bytes received so far
    pub fn partial(&self) -> &str {
        &self.text
    }
}

/// What the channel does after an echo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoStep {
    /// Send this byte next (the same byte again after a busy echo)
    Next(u8),
    /// Terminator echoed, command accepted
    Done,
}

/// Echo handshake for one buffered command
///
/// The channel sends [`START_BUFFERED`] and waits for it to come back
/// before starting the handshake.
#[derive(Debug, Clone)]
pub struct BufferedHandshake {
    bytes: Vec<u8, { crate::command::MAX_BUFFERED_LEN + 1 }>,
    index: usize,
}

impl BufferedHandshake {
    /// Prepare the handshake for `command` followed by [`END_BUFFERED`]
    pub fn new(command: &BufferedCommand) -> Self {
        let mut bytes = Vec::new();
        // BufferedCommand guarantees the text plus terminator fits
        let _ = bytes.extend_from_slice(command.as_bytes());
        let _ = bytes.push(END_BUFFERED);
        Self { bytes, index: 0 }
    }

    /// Byte to send now
    pub fn current(&self) -> u8 {
        self.bytes[self.index]
    }

    /// Feed the echo of the byte just sent
    pub fn on_echo(&mut self, echo: u8) -> Result<EchoStep, ProtocolError> {
        let expected = self.current();
        if echo == expected {
            if expected == END_BUFFERED {
                return Ok(EchoStep::Done);
            }
            self.index += 1;
            return Ok(EchoStep::Next(self.current()));
        }
        if echo == UNRECOGNIZED {
            return Ok(EchoStep::Next(expected));
        }
        Err(ProtocolError::UnexpectedEcho {
            expected,
            actual: echo,
        })
    }

    /// Total time allowed for the handshake
    pub fn time_budget_ms(&self) -> u64 {
        BUFFERED_CHAR_WINDOW_MS * self.bytes.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_immediate(cmd: u8, wire: &[u8]) -> Result<std::string::String, ProtocolError> {
        let cmd = ImmediateCommand::new(cmd).unwrap();
        let mut response = ImmediateResponse::new(&cmd);
        for (i, byte) in wire.iter().enumerate() {
            match response.feed(*byte)? {
                ImmediateStep::Acknowledge => assert!(i + 1 < wire.len()),
                ImmediateStep::Complete(text) => return Ok(text.as_str().into()),
            }
        }
        panic!("response never completed");
    }

    #[test]
    fn test_connect_byte() {
        assert_eq!(connect_byte(30).unwrap(), 158);
        assert_eq!(connect_byte(0).unwrap(), 128);
        assert_eq!(connect_byte(64), Err(CommandError::DeviceIdOutOfRange(64)));
    }

    #[test]
    fn test_immediate_assembly() {
        let wire = [b'P', b'P', b'P' | LAST_BYTE_FLAG];
        assert_eq!(run_immediate(b'M', &wire).unwrap(), "PPP");
    }

    #[test]
    fn test_immediate_single_byte() {
        let wire = [b'L' | LAST_BYTE_FLAG];
        assert_eq!(run_immediate(b'X', &wire).unwrap(), "L");
    }

    #[test]
    fn test_immediate_unrecognized() {
        assert_eq!(
            run_immediate(b'Q', &[b'#']),
            Err(ProtocolError::Unrecognized('Q'))
        );
        assert_eq!(
            run_immediate(b'Q', &[b'#' | LAST_BYTE_FLAG]),
            Err(ProtocolError::Unrecognized('Q'))
        );
    }

    #[test]
    fn test_immediate_hash_inside_response() {
        let wire = [b'1', b'#' | LAST_BYTE_FLAG];
        assert_eq!(run_immediate(b'%', &wire).unwrap(), "1#");
    }

    #[test]
    fn test_immediate_overflow() {
        let cmd = ImmediateCommand::new(b'%').unwrap();
        let mut response = ImmediateResponse::new(&cmd);
        for _ in 0..MAX_RESPONSE_LEN {
            assert_eq!(response.feed(b'a').unwrap(), ImmediateStep::Acknowledge);
        }
        assert_eq!(
            response.feed(b'a'),
            Err(ProtocolError::ResponseTooLong(MAX_RESPONSE_LEN))
        );
    }

    #[test]
    fn test_buffered_echo_sequence() {
        let cmd = BufferedCommand::new("H").unwrap();
        let mut handshake = BufferedHandshake::new(&cmd);
        assert_eq!(handshake.current(), b'H');
        assert_eq!(handshake.on_echo(b'H').unwrap(), EchoStep::Next(b'\r'));
        assert_eq!(handshake.on_echo(b'\r').unwrap(), EchoStep::Done);
        assert_eq!(handshake.time_budget_ms(), 400);
    }

    #[test]
    fn test_buffered_busy_resends() {
        let cmd = BufferedCommand::new("Z90").unwrap();
        let mut handshake = BufferedHandshake::new(&cmd);
        assert_eq!(handshake.on_echo(b'#').unwrap(), EchoStep::Next(b'Z'));
        assert_eq!(handshake.on_echo(b'Z').unwrap(), EchoStep::Next(b'9'));
        assert_eq!(handshake.on_echo(b'#').unwrap(), EchoStep::Next(b'9'));
        assert_eq!(handshake.on_echo(b'9').unwrap(), EchoStep::Next(b'0'));
    }

    #[test]
    fn test_buffered_hash_in_command_is_echo() {
        let cmd = BufferedCommand::new("#").unwrap();
        let mut handshake = BufferedHandshake::new(&cmd);
        assert_eq!(handshake.on_echo(b'#').unwrap(), EchoStep::Next(b'\r'));
    }

    #[test]
    fn test_buffered_mismatch() {
        let cmd = BufferedCommand::new("H").unwrap();
        let mut handshake = BufferedHandshake::new(&cmd);
        assert_eq!(
            handshake.on_echo(b'X'),
            Err(ProtocolError::UnexpectedEcho {
                expected: b'H',
                actual: b'X'
            })
        );
    }
}
