//! In-memory GSIOC device for channel tests
//!
//! Answers the byte-level handshakes the way a single unit on the bus does:
//! it listens only while selected, echoes buffered bytes (or `#` while
//! busy), and hands out an immediate response one byte per ACK.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use ampoule_hal::{UartError, UartErrorKind, UartRx, UartTx};
use parking_lot::Mutex;

const ACK: u8 = 0x06;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeError {
    Timeout,
    Unplugged,
}

impl UartError for FakeError {
    fn kind(&self) -> UartErrorKind {
        match self {
            FakeError::Timeout => UartErrorKind::Timeout,
            FakeError::Unplugged => UartErrorKind::Other,
        }
    }
}

#[derive(Debug, Default)]
struct Bus {
    id: u8,
    selected: bool,
    unplugged: bool,
    /// Bytes waiting to be read by the master
    pending: VecDeque<u8>,
    /// Rest of the immediate response, released on ACK
    reply: VecDeque<u8>,
    responses: HashMap<u8, String>,
    in_buffered: bool,
    text: Vec<u8>,
    busy_echoes: usize,
    wrong_echo: Option<u8>,
    written: Vec<u8>,
    accepted: Vec<String>,
    discarded: usize,
}

impl Bus {
    fn receive(&mut self, byte: u8) {
        self.written.push(byte);
        if byte == 0xFF {
            self.selected = false;
            self.in_buffered = false;
            return;
        }
        if byte & 0x80 != 0 {
            self.selected = byte & 0x7F == self.id;
            if self.selected {
                self.pending.push_back(byte);
            }
            return;
        }
        if !self.selected {
            return;
        }
        if self.in_buffered {
            if self.busy_echoes > 0 {
                self.busy_echoes -= 1;
                self.pending.push_back(b'#');
                return;
            }
            if let Some(wrong) = self.wrong_echo.take() {
                self.pending.push_back(wrong);
                return;
            }
            self.pending.push_back(byte);
            if byte == b'\r' {
                self.in_buffered = false;
                let text = String::from_utf8_lossy(&self.text).into_owned();
                self.accepted.push(text);
                self.text.clear();
            } else {
                self.text.push(byte);
            }
            return;
        }
        match byte {
            b'\n' => {
                self.in_buffered = true;
                self.pending.push_back(b'\n');
            }
            ACK => {
                if let Some(next) = self.reply.pop_front() {
                    self.pending.push_back(next);
                }
            }
            code => match self.responses.get(&code) {
                Some(text) if !text.is_empty() => {
                    let bytes = text.as_bytes();
                    let (last, head) = bytes.split_last().map(|(l, h)| (*l, h)).unwrap_or((0, &[]));
                    self.reply = head.iter().copied().collect();
                    self.reply.push_back(last | 0x80);
                    if let Some(first) = self.reply.pop_front() {
                        self.pending.push_back(first);
                    }
                }
                _ => self.pending.push_back(b'#' | 0x80),
            },
        }
    }
}

/// Scripted unit answering on one id; clones share state
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    bus: Arc<Mutex<Bus>>,
}

impl FakeDevice {
    pub fn new(id: u8) -> Self {
        let device = Self::default();
        device.bus.lock().id = id;
        device
    }

    /// Answer immediate `code` with `text`
    pub fn respond(&self, code: u8, text: &str) -> &Self {
        self.bus.lock().responses.insert(code, text.to_owned());
        self
    }

    /// Echo `#` for the next `count` buffered bytes
    pub fn busy_for(&self, count: usize) {
        self.bus.lock().busy_echoes = count;
    }

    /// Echo `byte` instead of the next buffered byte
    pub fn garble_next_echo(&self, byte: u8) {
        self.bus.lock().wrong_echo = Some(byte);
    }

    pub fn unplug(&self) {
        self.bus.lock().unplugged = true;
    }

    /// Every byte the master wrote
    pub fn written(&self) -> Vec<u8> {
        self.bus.lock().written.clone()
    }

    /// Buffered commands completed with a `\r` echo
    pub fn accepted(&self) -> Vec<String> {
        self.bus.lock().accepted.clone()
    }

    pub fn is_selected(&self) -> bool {
        self.bus.lock().selected
    }

    pub fn discard_count(&self) -> usize {
        self.bus.lock().discarded
    }

    /// Queue unsolicited bytes (line noise)
    pub fn inject(&self, bytes: &[u8]) {
        self.bus.lock().pending.extend(bytes);
    }
}

impl UartTx for FakeDevice {
    type Error = FakeError;

    fn write_blocking(&mut self, data: &[u8]) -> Result<(), FakeError> {
        let mut bus = self.bus.lock();
        if bus.unplugged {
            return Err(FakeError::Unplugged);
        }
        for byte in data {
            bus.receive(*byte);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), FakeError> {
        Ok(())
    }
}

impl UartRx for FakeDevice {
    type Error = FakeError;

    fn read_blocking(&mut self, buf: &mut [u8]) -> Result<usize, FakeError> {
        let mut bus = self.bus.lock();
        if bus.unplugged {
            return Err(FakeError::Unplugged);
        }
        let mut n = 0;
        while n < buf.len() {
            match bus.pending.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        if n == 0 {
            return Err(FakeError::Timeout);
        }
        Ok(n)
    }

    fn discard_pending(&mut self) -> Result<(), FakeError> {
        let mut bus = self.bus.lock();
        bus.discarded += bus.pending.len();
        bus.pending.clear();
        Ok(())
    }
}
