//! GSIOC channel over a UART
//!
//! # Device selection
//!
//! ```text
//! master: 0xFF          (everyone off the bus)
//!         ... 20 ms ...
//! master: id | 0x80
//! slave:  one byte      (silence: wrong id dial or nothing attached)
//!         ... 200 ms, then drop whatever else arrived ...
//! ```
//!
//! The selected id is cached; consecutive exchanges with the same device
//! skip reselection. Exchanges are never retried here: a timeout or a bad
//! echo goes straight back to the caller.

use std::thread;
use std::time::{Duration, Instant};

use ampoule_core::{CommandLink, LinkError};
use ampoule_hal::{Uart, UartError, UartErrorKind};
use ampoule_protocol::exchange::{
    ACK, BUFFERED_CHAR_WINDOW_MS, CONNECT_SETTLE_MS, DISCONNECT_ALL, DISCONNECT_SETTLE_MS,
    START_BUFFERED,
};
use ampoule_protocol::{
    connect_byte, BufferedCommand, BufferedHandshake, EchoStep, ImmediateCommand,
    ImmediateResponse, ImmediateStep,
};
use log::{debug, trace, warn};

/// Pause before each immediate command
const IMMEDIATE_GAP_MS: u64 = 20;

/// Bus timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GsiocTiming {
    /// Wait after the disconnect byte
    pub disconnect_settle: Duration,
    /// Wait after a device acknowledges selection
    pub connect_settle: Duration,
    /// Time allowed per byte of a buffered handshake
    pub char_window: Duration,
    /// Wait before each immediate command
    pub immediate_gap: Duration,
}

impl Default for GsiocTiming {
    fn default() -> Self {
        Self {
            disconnect_settle: Duration::from_millis(DISCONNECT_SETTLE_MS),
            connect_settle: Duration::from_millis(CONNECT_SETTLE_MS),
            char_window: Duration::from_millis(BUFFERED_CHAR_WINDOW_MS),
            immediate_gap: Duration::from_millis(IMMEDIATE_GAP_MS),
        }
    }
}

impl GsiocTiming {
    /// No settle pauses; for in-memory devices
    pub fn instant() -> Self {
        Self {
            disconnect_settle: Duration::ZERO,
            connect_settle: Duration::ZERO,
            immediate_gap: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Master side of a GSIOC bus
#[derive(Debug)]
pub struct GsiocChannel<U> {
    uart: U,
    timing: GsiocTiming,
    connected: Option<u8>,
}

impl<U: Uart> GsiocChannel<U> {
    pub fn new(uart: U) -> Self {
        Self::with_timing(uart, GsiocTiming::default())
    }

    pub fn with_timing(uart: U, timing: GsiocTiming) -> Self {
        Self {
            uart,
            timing,
            connected: None,
        }
    }

    /// Id of the device currently selected, if any
    pub fn connected(&self) -> Option<u8> {
        self.connected
    }

    pub fn uart(&self) -> &U {
        &self.uart
    }

    /// Select `device_id`, unless it is already selected
    pub fn connect(&mut self, device_id: u8) -> Result<(), LinkError> {
        if self.connected == Some(device_id) {
            return Ok(());
        }
        let select = connect_byte(device_id)?;
        self.connected = None;

        self.send(DISCONNECT_ALL, device_id)?;
        thread::sleep(self.timing.disconnect_settle);
        self.send(select, device_id)?;
        let reply = self.receive(device_id)?;
        thread::sleep(self.timing.connect_settle);
        self.discard(device_id)?;

        debug!("Connected to device {device_id} <{reply:#04x}>");
        self.connected = Some(device_id);
        Ok(())
    }

    /// Deselect every device on the bus
    pub fn disconnect_all(&mut self) -> Result<(), LinkError> {
        let device_id = self.connected.take().unwrap_or_default();
        self.uart
            .write_blocking(&[DISCONNECT_ALL])
            .and_then(|()| self.uart.flush())
            .map_err(|e| link_error(e, device_id))
    }

    fn send(&mut self, byte: u8, device_id: u8) -> Result<(), LinkError> {
        self.uart
            .write_blocking(&[byte])
            .map_err(|e| link_error(e, device_id))
    }

    fn receive(&mut self, device_id: u8) -> Result<u8, LinkError> {
        self.uart.read_byte().map_err(|e| link_error(e, device_id))
    }

    fn discard(&mut self, device_id: u8) -> Result<(), LinkError> {
        self.uart
            .discard_pending()
            .map_err(|e| link_error(e, device_id))
    }

    /// Drop the selection and any leftover input after a broken handshake
    ///
    /// The next exchange reselects the device from a clean slate.
    fn recover(&mut self, device_id: u8, command: &str) {
        self.connected = None;
        match self.discard(device_id) {
            Ok(()) => warn!("Discarded pending input from device {device_id} after {command:?}"),
            Err(e) => warn!("Could not discard input from device {device_id}: {e}"),
        }
    }

    fn run_immediate(
        &mut self,
        device_id: u8,
        command: &ImmediateCommand,
    ) -> Result<String, LinkError> {
        self.send(command.code(), device_id)?;
        let mut response = ImmediateResponse::new(command);
        loop {
            let byte = self.receive(device_id)?;
            match response.feed(byte)? {
                ImmediateStep::Acknowledge => self.send(ACK, device_id)?,
                ImmediateStep::Complete(text) => return Ok(text.as_str().to_owned()),
            }
        }
    }

    fn run_buffered(&mut self, device_id: u8, command: &BufferedCommand) -> Result<(), LinkError> {
        let mut handshake = BufferedHandshake::new(command);
        let budget = self.timing.char_window * (command.len() as u32 + 1);
        let started = Instant::now();

        self.send(START_BUFFERED, device_id)?;
        while self.receive(device_id)? != START_BUFFERED {
            if started.elapsed() >= budget {
                return Err(LinkError::Timeout { device_id });
            }
        }

        let mut byte = handshake.current();
        loop {
            if started.elapsed() >= budget {
                return Err(LinkError::Timeout { device_id });
            }
            self.send(byte, device_id)?;
            let echo = self.receive(device_id)?;
            match handshake.on_echo(echo)? {
                EchoStep::Next(next) => byte = next,
                EchoStep::Done => return Ok(()),
            }
        }
    }
}

impl<U: Uart> CommandLink for GsiocChannel<U> {
    fn immediate(
        &mut self,
        device_id: u8,
        command: &ImmediateCommand,
    ) -> Result<String, LinkError> {
        self.connect(device_id)?;
        thread::sleep(self.timing.immediate_gap);
        debug!("[{device_id:>2}] ? {command}");
        let result = self.run_immediate(device_id, command);
        match &result {
            Ok(text) => trace!("[{device_id:>2}] {command} -> {text:?}"),
            Err(LinkError::Protocol(_)) => self.recover(device_id, &command.to_string()),
            Err(_) => self.connected = None,
        }
        result
    }

    fn buffered(&mut self, device_id: u8, command: &BufferedCommand) -> Result<(), LinkError> {
        self.connect(device_id)?;
        debug!("[{device_id:>2}] > {}", command.as_str());
        let result = self.run_buffered(device_id, command);
        match &result {
            Ok(()) => {}
            Err(LinkError::Protocol(_)) => self.recover(device_id, command.as_str()),
            Err(_) => self.connected = None,
        }
        result
    }
}

fn link_error<E: UartError>(err: E, device_id: u8) -> LinkError {
    match err.kind() {
        UartErrorKind::Timeout => LinkError::Timeout { device_id },
        UartErrorKind::Other => LinkError::Io(format!("{err:?}")),
    }
}
