//! Simulated GSIOC bus
//!
//! [`SimulatedLink`] answers like an arm, a pump and an injector sitting on
//! the configured ids. It records every exchange so dry runs can print the
//! command stream and tests can assert on it, and it can be told to fault,
//! time out, or stay busy for a while.
//!
//! Clones share one bus: keep a clone as a handle after moving the link into
//! a backend.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ampoule_protocol::{BufferedCommand, DeviceKind, ImmediateCommand, InjectorPosition, Valve};
use log::trace;
use parking_lot::Mutex;

use crate::config::DeviceIds;
use crate::deck::Point3D;
use crate::error::LinkError;
use crate::traits::CommandLink;

/// Z the arm reports after homing
pub const HOME_Z: f64 = 125.0;

/// Syringe size reported until `@4=` changes it (uL)
pub const DEFAULT_SYRINGE_UL: u32 = 1000;

/// Exchange type of a logged command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Immediate,
    Buffered,
}

/// One exchange as the master sent it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedCommand {
    pub device_id: u8,
    pub kind: ExchangeKind,
    pub text: String,
}

impl fmt::Display for LoggedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ExchangeKind::Immediate => "?",
            ExchangeKind::Buffered => ">",
        };
        write!(f, "[{:>2}] {kind} {}", self.device_id, self.text)
    }
}

/// Shared, append-only record of every exchange
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    entries: Arc<Mutex<Vec<LoggedCommand>>>,
}

impl CommandLog {
    fn push(&self, device_id: u8, kind: ExchangeKind, text: impl Into<String>) {
        self.entries.lock().push(LoggedCommand {
            device_id,
            kind,
            text: text.into(),
        });
    }

    /// Snapshot of all exchanges so far
    pub fn entries(&self) -> Vec<LoggedCommand> {
        self.entries.lock().clone()
    }

    /// Text of every buffered command, in order
    pub fn buffered(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|c| c.kind == ExchangeKind::Buffered)
            .map(|c| c.text.clone())
            .collect()
    }

    /// Text of the buffered commands sent to one device id
    pub fn buffered_to(&self, device_id: u8) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|c| c.kind == ExchangeKind::Buffered && c.device_id == device_id)
            .map(|c| c.text.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[derive(Debug)]
struct Bus {
    devices: HashMap<u8, DeviceKind>,
    arm: Point3D,
    valve: Valve,
    syringe_ul: f64,
    syringe_size: u32,
    injector: InjectorPosition,
    errors: HashMap<DeviceKind, u16>,
    pending_faults: HashMap<DeviceKind, u16>,
    pending_timeouts: Vec<DeviceKind>,
    busy_polls: u32,
    busy_remaining: HashMap<DeviceKind, u32>,
    paused: Duration,
}

impl Bus {
    fn new(ids: DeviceIds) -> Self {
        let devices = [DeviceKind::Arm, DeviceKind::Pump, DeviceKind::Injector]
            .into_iter()
            .map(|kind| (ids.get(kind), kind))
            .collect();
        Self {
            devices,
            arm: Point3D::new(0.0, 0.0, 0.0),
            valve: Valve::Needle,
            syringe_ul: 0.0,
            syringe_size: DEFAULT_SYRINGE_UL,
            injector: InjectorPosition::Load,
            errors: HashMap::new(),
            pending_faults: HashMap::new(),
            pending_timeouts: Vec::new(),
            busy_polls: 0,
            busy_remaining: HashMap::new(),
            paused: Duration::ZERO,
        }
    }

    /// Resolve the addressed device, consuming a pending timeout
    fn select(&mut self, device_id: u8) -> Result<DeviceKind, LinkError> {
        let kind = self
            .devices
            .get(&device_id)
            .copied()
            .ok_or(LinkError::Timeout { device_id })?;
        if let Some(pos) = self.pending_timeouts.iter().position(|k| *k == kind) {
            self.pending_timeouts.remove(pos);
            return Err(LinkError::Timeout { device_id });
        }
        Ok(kind)
    }

    fn error(&self, kind: DeviceKind) -> u16 {
        self.errors.get(&kind).copied().unwrap_or(0)
    }

    fn status_char(&mut self, kind: DeviceKind) -> char {
        if self.error(kind) != 0 {
            return 'E';
        }
        match self.busy_remaining.get_mut(&kind) {
            Some(n) if *n > 0 => {
                *n -= 1;
                'R'
            }
            _ => 'P',
        }
    }

    fn respond(&mut self, kind: DeviceKind, code: char) -> String {
        match (kind, code) {
            (_, '%') => format!("{} (simulated)", module_name(kind)),
            (_, '$') => "$".into(),
            (_, 'e') => self.error(kind).to_string(),
            (DeviceKind::Arm, 'M') => self.status_char(kind).to_string().repeat(3),
            (DeviceKind::Arm, '*') => {
                let motors = self.status_char(kind).to_string().repeat(4);
                format!(
                    "{motors} {}/{}/{} V{} E{}",
                    self.arm.x,
                    self.arm.y,
                    self.arm.z,
                    injector_letter(self.injector),
                    self.error(kind)
                )
            }
            (DeviceKind::Arm, 'P') => format!("{}/{}/{}", self.arm.x, self.arm.y, self.arm.z),
            (DeviceKind::Arm, 'X') => format!("{}/{}", self.arm.x, self.arm.y),
            (DeviceKind::Arm, 'Z') => self.arm.z.to_string(),
            (DeviceKind::Arm, 'Q') => "X=0/162 Y=0/249 Z=0/125".into(),
            (DeviceKind::Pump, 'M') => self.status_char(kind).to_string().repeat(2),
            (DeviceKind::Pump, 'F') => format!("{} 0.01-10 (1)", self.syringe_size),
            (DeviceKind::Pump, 'P') => format!("{}:{:.3}", self.valve.letter(), self.syringe_ul),
            (DeviceKind::Injector, 'X') => {
                if self.error(kind) != 0 {
                    // Valve never reaches a position while faulted
                    "R".into()
                } else {
                    match self.status_char(kind) {
                        'R' => "R".into(),
                        _ => injector_letter(self.injector).to_string(),
                    }
                }
            }
            _ => "#".into(),
        }
    }

    fn execute(&mut self, kind: DeviceKind, text: &str) {
        if let Some(code) = self.pending_faults.remove(&kind) {
            self.errors.insert(kind, code);
            return;
        }
        if let Some(rest) = text.strip_prefix('e') {
            match rest {
                "" => {
                    self.errors.remove(&kind);
                }
                code => match code.parse() {
                    Ok(code) => {
                        self.errors.insert(kind, code);
                    }
                    Err(_) => self.reject(kind),
                },
            }
            return;
        }
        let accepted = match kind {
            DeviceKind::Arm => self.execute_arm(text),
            DeviceKind::Pump => self.execute_pump(text),
            DeviceKind::Injector => self.execute_injector(text),
        };
        if accepted {
            if self.busy_polls > 0 {
                self.busy_remaining.insert(kind, self.busy_polls);
            }
        } else {
            self.reject(kind);
        }
    }

    fn reject(&mut self, kind: DeviceKind) {
        let code = match kind {
            DeviceKind::Injector => 1,
            _ => 10,
        };
        self.errors.insert(kind, code);
    }

    fn execute_arm(&mut self, text: &str) -> bool {
        if text == "H" {
            self.errors.remove(&DeviceKind::Arm);
            self.arm = Point3D::new(0.0, 0.0, HOME_Z);
            return true;
        }
        if let Some(rest) = text.strip_prefix('X') {
            let Some((x, y)) = rest.split_once('/') else {
                return false;
            };
            match (axis_target(x), axis_target(y)) {
                (Some(x), Some(y)) => {
                    self.arm.x = x;
                    self.arm.y = y;
                    true
                }
                _ => false,
            }
        } else if let Some(rest) = text.strip_prefix('Z') {
            match axis_target(rest) {
                Some(z) => {
                    self.arm.z = z;
                    true
                }
                None => false,
            }
        } else if let Some(rest) = text.strip_prefix('E') {
            rest.len() == 3 && rest.chars().all(|c| matches!(c, '0' | '1' | 'x'))
        } else {
            false
        }
    }

    fn execute_pump(&mut self, text: &str) -> bool {
        match text {
            "p" => {
                self.errors.remove(&DeviceKind::Pump);
                self.syringe_ul = 0.0;
                return true;
            }
            "PX" => return true,
            _ => {}
        }
        if let Some(size) = text.strip_prefix("@4=") {
            return match size.parse() {
                Ok(size) => {
                    self.syringe_size = size;
                    true
                }
                Err(_) => false,
            };
        }
        let Some(rest) = text.strip_prefix('P') else {
            return false;
        };
        let mut fields = rest.split(':');
        let valve = fields
            .next()
            .and_then(|v| v.chars().next())
            .and_then(Valve::from_letter);
        let volume = fields.next().and_then(|v| v.parse::<f64>().ok());
        let (Some(valve), Some(volume)) = (valve, volume) else {
            return false;
        };
        let content = self.syringe_ul + volume;
        if content < -1e-6 || content > f64::from(self.syringe_size) + 1e-6 {
            // Invalid syringe volume
            self.errors.insert(DeviceKind::Pump, 26);
            return true;
        }
        self.valve = valve;
        self.syringe_ul = content.max(0.0);
        true
    }

    fn execute_injector(&mut self, text: &str) -> bool {
        match text {
            "VI" => self.injector = InjectorPosition::Inject,
            "VL" => self.injector = InjectorPosition::Load,
            _ => return false,
        }
        true
    }
}

fn axis_target(field: &str) -> Option<f64> {
    field.split(':').next()?.parse().ok()
}

fn module_name(kind: DeviceKind) -> &'static str {
    match kind {
        DeviceKind::Arm => "GX-241 II",
        DeviceKind::Pump => "GX D Inject pump",
        DeviceKind::Injector => "GX Direct Injection Module",
    }
}

fn injector_letter(position: InjectorPosition) -> char {
    match position {
        InjectorPosition::Moving => 'R',
        InjectorPosition::Load => 'L',
        InjectorPosition::Inject => 'I',
    }
}

/// In-memory arm, pump and injector
#[derive(Debug, Clone)]
pub struct SimulatedLink {
    bus: Arc<Mutex<Bus>>,
    log: CommandLog,
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self::new(DeviceIds::default())
    }
}

impl SimulatedLink {
    pub fn new(ids: DeviceIds) -> Self {
        Self {
            bus: Arc::new(Mutex::new(Bus::new(ids))),
            log: CommandLog::default(),
        }
    }

    /// Handle to the exchange record
    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }

    /// Latch `code` on `kind` instead of executing its next buffered command
    pub fn inject_fault(&self, kind: DeviceKind, code: u16) {
        self.bus.lock().pending_faults.insert(kind, code);
    }

    /// Make the next exchange with `kind` go unanswered
    pub fn inject_timeout(&self, kind: DeviceKind) {
        self.bus.lock().pending_timeouts.push(kind);
    }

    /// Report busy this many times after every accepted buffered command
    pub fn set_busy_polls(&self, polls: u32) {
        self.bus.lock().busy_polls = polls;
    }

    pub fn arm_position(&self) -> Point3D {
        self.bus.lock().arm
    }

    pub fn syringe_volume(&self) -> f64 {
        self.bus.lock().syringe_ul
    }

    /// Start with liquid already in the syringe, as left by an earlier session
    pub fn load_syringe(&self, volume_ul: f64) {
        self.bus.lock().syringe_ul = volume_ul;
    }

    pub fn injector_position(&self) -> InjectorPosition {
        self.bus.lock().injector
    }

    pub fn error_code(&self, kind: DeviceKind) -> u16 {
        self.bus.lock().error(kind)
    }

    /// Total time callers asked to pause
    pub fn paused(&self) -> Duration {
        self.bus.lock().paused
    }
}

impl CommandLink for SimulatedLink {
    fn immediate(
        &mut self,
        device_id: u8,
        command: &ImmediateCommand,
    ) -> Result<String, LinkError> {
        self.log
            .push(device_id, ExchangeKind::Immediate, command.as_char());
        let mut bus = self.bus.lock();
        let kind = bus.select(device_id)?;
        let response = bus.respond(kind, command.as_char());
        trace!("sim {kind} {command} -> {response}");
        Ok(response)
    }

    fn buffered(&mut self, device_id: u8, command: &BufferedCommand) -> Result<(), LinkError> {
        self.log
            .push(device_id, ExchangeKind::Buffered, command.as_str());
        let mut bus = self.bus.lock();
        let kind = bus.select(device_id)?;
        bus.execute(kind, command.as_str());
        trace!("sim {kind} <- {command}");
        Ok(())
    }

    fn pause(&mut self, duration: Duration) {
        self.bus.lock().paused += duration;
    }
}
