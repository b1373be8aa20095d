//! Device backend
//!
//! One method per atomic device command, addressed by the configured bus
//! ids. Nothing here checks bounds or volumes: this is the raw capability
//! surface the operation layer builds on.
//!
//! Every buffered command is followed by settle polling: the device's status
//! query is repeated until no motor reports busy. A fault marker turns into
//! [`Error::Device`] carrying the code read back from the device.

use std::time::Duration;

use ampoule_protocol::response::{
    check_recognized, parse_error_code, parse_travel_ranges, parse_xy, parse_xyz, parse_z,
};
use ampoule_protocol::{
    parse_settle, ArmCommand, ArmQuery, AxisMove, AxisRange, BufferedCommand, DeviceKind,
    ImmediateCommand, InjectorCommand, InjectorPosition, InjectorQuery, MotorPower, MotorStatus,
    PumpCommand, PumpQuery, Settle, StatusSummary, SyringeSize, SyringeStatus, Valve,
};
use log::{debug, warn};

use crate::config::{DeviceIds, HandlerConfig};
use crate::deck::{Point2D, Point3D};
use crate::error::{Error, Result};
use crate::traits::CommandLink;

/// How long to wait for a buffered command to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    /// Total polling budget
    pub timeout: Duration,
    /// Pause between polls
    pub poll: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(60_000),
            poll: Duration::from_millis(50),
        }
    }
}

impl SettlePolicy {
    pub fn from_config(config: &HandlerConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.settle_timeout_ms),
            poll: Duration::from_millis(config.settle_poll_ms.max(1)),
        }
    }
}

/// Raw access to the arm, pump and injector over one link
#[derive(Debug)]
pub struct DeviceBackend<L> {
    link: L,
    ids: DeviceIds,
    settle: SettlePolicy,
}

impl<L: CommandLink> DeviceBackend<L> {
    pub fn new(link: L, ids: DeviceIds) -> Self {
        Self {
            link,
            ids,
            settle: SettlePolicy::default(),
        }
    }

    pub fn with_settle(mut self, settle: SettlePolicy) -> Self {
        self.settle = settle;
        self
    }

    pub fn ids(&self) -> DeviceIds {
        self.ids
    }

    /// Rebind a device to a new bus id (field recalibration)
    pub fn set_id(&mut self, kind: DeviceKind, id: u8) {
        debug!("{kind} id {} -> {id}", self.ids.get(kind));
        self.ids.set(kind, id);
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Pause through the link (simulated links return immediately)
    pub fn pause(&mut self, duration: Duration) {
        self.link.pause(duration);
    }

    /// Send an immediate command and return its response text
    pub fn query(&mut self, kind: DeviceKind, command: ImmediateCommand) -> Result<String> {
        let id = self.ids.get(kind);
        let response = self
            .link
            .immediate(id, &command)
            .map_err(|e| Error::from_link(kind, e))?;
        check_recognized(command.as_char(), &response)
            .map_err(|source| Error::Protocol { device: kind, source })?;
        Ok(response)
    }

    /// Send a buffered command and wait for the device to settle
    pub fn send(&mut self, kind: DeviceKind, command: BufferedCommand) -> Result<()> {
        let id = self.ids.get(kind);
        debug!("{kind} <- {command}");
        self.link
            .buffered(id, &command)
            .map_err(|e| Error::from_link(kind, e))?;
        self.wait_settled(kind)
    }

    /// Poll the status query until the device is idle
    pub fn wait_settled(&mut self, kind: DeviceKind) -> Result<()> {
        let mut waited = Duration::ZERO;
        loop {
            let response = self.query(kind, kind.settle_query())?;
            match parse_settle(kind, &response)
                .map_err(|source| Error::Protocol { device: kind, source })?
            {
                Settle::Idle => return Ok(()),
                Settle::Fault => {
                    let code = self.read_error(kind)?;
                    let description = kind.describe_error(code);
                    warn!("{kind} reports fault {code}: {description}");
                    return Err(Error::Device {
                        device: kind,
                        code,
                        description,
                    });
                }
                Settle::Busy => {
                    if waited >= self.settle.timeout {
                        warn!("{kind} still busy after {} ms", waited.as_millis());
                        return Err(Error::Timeout { device: kind });
                    }
                    self.link.pause(self.settle.poll);
                    waited += self.settle.poll;
                }
            }
        }
    }

    // Commands shared by every device

    /// Firmware identification
    pub fn module_id(&mut self, kind: DeviceKind) -> Result<String> {
        let command = match kind {
            DeviceKind::Arm => ArmQuery::ModuleId.command(),
            DeviceKind::Pump => PumpQuery::ModuleId.command(),
            DeviceKind::Injector => InjectorQuery::ModuleId.command(),
        };
        self.query(kind, command)
    }

    /// Master reset
    pub fn reset(&mut self, kind: DeviceKind) -> Result<String> {
        let command = match kind {
            DeviceKind::Arm => ArmQuery::Reset.command(),
            DeviceKind::Pump => PumpQuery::Reset.command(),
            DeviceKind::Injector => InjectorQuery::Reset.command(),
        };
        self.query(kind, command)
    }

    /// Current fault code (0 when healthy)
    pub fn read_error(&mut self, kind: DeviceKind) -> Result<u16> {
        let response = self.query(kind, kind.read_error_query())?;
        parse_error_code(&response).map_err(|source| Error::Protocol { device: kind, source })
    }

    pub fn clear_error(&mut self, kind: DeviceKind) -> Result<()> {
        let command = match kind {
            DeviceKind::Arm => ArmCommand::ClearError.encode()?,
            DeviceKind::Pump => PumpCommand::ClearError.encode()?,
            DeviceKind::Injector => InjectorCommand::ClearError.encode()?,
        };
        let id = self.ids.get(kind);
        self.link
            .buffered(id, &command)
            .map_err(|e| Error::from_link(kind, e))
    }

    /// Raise a fault on purpose (diagnostics)
    pub fn raise_error(&mut self, kind: DeviceKind, code: u16) -> Result<()> {
        let command = match kind {
            DeviceKind::Arm => ArmCommand::RaiseError(code).encode()?,
            DeviceKind::Pump => PumpCommand::RaiseError(code).encode()?,
            DeviceKind::Injector => InjectorCommand::RaiseError(code).encode()?,
        };
        let id = self.ids.get(kind);
        self.link
            .buffered(id, &command)
            .map_err(|e| Error::from_link(kind, e))
    }

    // Arm

    /// Home all axes; Z goes to its top first
    pub fn home_arm(&mut self) -> Result<()> {
        self.send(DeviceKind::Arm, ArmCommand::Home.encode()?)
    }

    pub fn move_xy(&mut self, target: Point2D, speed: f64) -> Result<()> {
        let command = ArmCommand::MoveXy {
            x: AxisMove::to(target.x).at(speed),
            y: AxisMove::to(target.y).at(speed),
        };
        self.send(DeviceKind::Arm, command.encode()?)
    }

    pub fn move_z(&mut self, z: f64, speed: f64) -> Result<()> {
        let command = ArmCommand::MoveZ(AxisMove::to(z).at(speed));
        self.send(DeviceKind::Arm, command.encode()?)
    }

    pub fn set_motor_power(&mut self, x: MotorPower, y: MotorPower, z: MotorPower) -> Result<()> {
        self.send(
            DeviceKind::Arm,
            ArmCommand::SetMotorPower { x, y, z }.encode()?,
        )
    }

    pub fn arm_status(&mut self) -> Result<StatusSummary> {
        let response = self.query(DeviceKind::Arm, ArmQuery::StatusSummary.command())?;
        StatusSummary::parse(&response).map_err(|source| Error::Protocol {
            device: DeviceKind::Arm,
            source,
        })
    }

    pub fn arm_motor_status(&mut self) -> Result<MotorStatus> {
        let response = self.query(DeviceKind::Arm, ArmQuery::MotorStatus.command())?;
        MotorStatus::parse(&response, DeviceKind::Arm.settle_width()).map_err(|source| {
            Error::Protocol {
                device: DeviceKind::Arm,
                source,
            }
        })
    }

    pub fn arm_position(&mut self) -> Result<Point3D> {
        let response = self.query(DeviceKind::Arm, ArmQuery::Position.command())?;
        let (x, y, z) = parse_xyz(&response).map_err(|source| Error::Protocol {
            device: DeviceKind::Arm,
            source,
        })?;
        Ok(Point3D::new(x, y, z))
    }

    pub fn arm_xy(&mut self) -> Result<Point2D> {
        let response = self.query(DeviceKind::Arm, ArmQuery::XyPosition.command())?;
        let (x, y) = parse_xy(&response).map_err(|source| Error::Protocol {
            device: DeviceKind::Arm,
            source,
        })?;
        Ok(Point2D::new(x, y))
    }

    pub fn arm_z(&mut self) -> Result<f64> {
        let response = self.query(DeviceKind::Arm, ArmQuery::ZPosition.command())?;
        parse_z(&response).map_err(|source| Error::Protocol {
            device: DeviceKind::Arm,
            source,
        })
    }

    pub fn travel_ranges(&mut self) -> Result<Vec<AxisRange>> {
        let response = self.query(DeviceKind::Arm, ArmQuery::TravelRanges.command())?;
        let ranges = parse_travel_ranges(&response).map_err(|source| Error::Protocol {
            device: DeviceKind::Arm,
            source,
        })?;
        Ok(ranges.into_iter().collect())
    }

    // Pump

    /// Home the syringe, expelling its content
    pub fn home_pump(&mut self) -> Result<()> {
        self.send(DeviceKind::Pump, PumpCommand::Home.encode()?)
    }

    /// Run the syringe: positive volumes aspirate, negative dispense
    pub fn run_pump(&mut self, valve: Valve, volume_ul: f64, flow_rate_ml_min: f64) -> Result<()> {
        let command = PumpCommand::Run {
            valve,
            volume_ul,
            flow_rate_ml_min: Some(flow_rate_ml_min),
        };
        self.send(DeviceKind::Pump, command.encode()?)
    }

    pub fn stop_pump(&mut self) -> Result<()> {
        self.send(DeviceKind::Pump, PumpCommand::Stop.encode()?)
    }

    pub fn set_syringe_size(&mut self, size_ul: u32) -> Result<()> {
        self.send(DeviceKind::Pump, PumpCommand::SetSyringeSize(size_ul).encode()?)
    }

    pub fn syringe_size(&mut self) -> Result<SyringeSize> {
        let response = self.query(DeviceKind::Pump, PumpQuery::SyringeSize.command())?;
        SyringeSize::parse(&response).map_err(|source| Error::Protocol {
            device: DeviceKind::Pump,
            source,
        })
    }

    pub fn syringe_status(&mut self) -> Result<SyringeStatus> {
        let response = self.query(DeviceKind::Pump, PumpQuery::SyringeStatus.command())?;
        SyringeStatus::parse(&response).map_err(|source| Error::Protocol {
            device: DeviceKind::Pump,
            source,
        })
    }

    pub fn pump_motor_status(&mut self) -> Result<MotorStatus> {
        let response = self.query(DeviceKind::Pump, PumpQuery::MotorStatus.command())?;
        MotorStatus::parse(&response, DeviceKind::Pump.settle_width()).map_err(|source| {
            Error::Protocol {
                device: DeviceKind::Pump,
                source,
            }
        })
    }

    // Injector

    pub fn injector_load(&mut self) -> Result<()> {
        self.send(DeviceKind::Injector, InjectorCommand::Load.encode()?)
    }

    pub fn injector_inject(&mut self) -> Result<()> {
        self.send(DeviceKind::Injector, InjectorCommand::Inject.encode()?)
    }

    pub fn injector_status(&mut self) -> Result<InjectorPosition> {
        let response = self.query(DeviceKind::Injector, InjectorQuery::Status.command())?;
        InjectorPosition::parse(&response).map_err(|source| Error::Protocol {
            device: DeviceKind::Injector,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedLink;

    fn backend() -> (DeviceBackend<SimulatedLink>, SimulatedLink) {
        let sim = SimulatedLink::new(DeviceIds::default());
        let handle = sim.clone();
        (DeviceBackend::new(sim, DeviceIds::default()), handle)
    }

    #[test]
    fn test_move_commands_are_rendered() {
        let (mut backend, sim) = backend();
        backend.home_arm().unwrap();
        backend.move_z(125.0, 25.0).unwrap();
        backend.move_xy(Point2D::new(8.0, 248.0), 50.0).unwrap();
        assert_eq!(sim.log().buffered(), vec!["H", "Z125:25", "X8:50/248:50"]);
        assert_eq!(
            backend.arm_position().unwrap(),
            Point3D::new(8.0, 248.0, 125.0)
        );
    }

    #[test]
    fn test_settle_polls_until_idle() {
        let (mut backend, sim) = backend();
        sim.set_busy_polls(3);
        backend.move_z(100.0, 25.0).unwrap();
        let polls = sim
            .log()
            .entries()
            .iter()
            .filter(|c| c.text == "M")
            .count();
        assert_eq!(polls, 4);
    }

    #[test]
    fn test_settle_timeout() {
        let (backend, sim) = backend();
        let mut backend = backend.with_settle(SettlePolicy {
            timeout: Duration::from_millis(200),
            poll: Duration::from_millis(50),
        });
        sim.set_busy_polls(u32::MAX);
        assert!(matches!(
            backend.move_z(100.0, 25.0),
            Err(Error::Timeout {
                device: DeviceKind::Arm
            })
        ));
    }

    #[test]
    fn test_fault_reads_error_code() {
        let (mut backend, sim) = backend();
        sim.inject_fault(DeviceKind::Arm, 30);
        match backend.move_z(10.0, 25.0) {
            Err(Error::Device {
                device,
                code,
                description,
            }) => {
                assert_eq!(device, DeviceKind::Arm);
                assert_eq!(code, 30);
                assert_eq!(description, "Z Axis stall");
            }
            other => panic!("expected device fault, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_id_looks_like_timeout() {
        let (mut backend, _sim) = backend();
        backend.set_id(DeviceKind::Pump, 9);
        assert!(matches!(
            backend.home_pump(),
            Err(Error::Timeout {
                device: DeviceKind::Pump
            })
        ));
    }

    #[test]
    fn test_pump_queries() {
        let (mut backend, _sim) = backend();
        backend.run_pump(Valve::Needle, 20.0, 1.0).unwrap();
        let status = backend.syringe_status().unwrap();
        assert_eq!(status.valve, Valve::Needle);
        assert_eq!(status.volume_ul, Some(20.0));
        assert_eq!(backend.syringe_size().unwrap().size_ul, 1000);
    }

    #[test]
    fn test_encode_error_sends_nothing() {
        let (mut backend, sim) = backend();
        assert!(matches!(
            backend.move_z(-1.0, 25.0),
            Err(Error::Command(_))
        ));
        assert!(sim.log().is_empty());
    }

    #[test]
    fn test_injector_switch() {
        let (mut backend, _sim) = backend();
        backend.injector_inject().unwrap();
        assert_eq!(backend.injector_status().unwrap(), InjectorPosition::Inject);
        backend.injector_load().unwrap();
        assert_eq!(backend.injector_status().unwrap(), InjectorPosition::Load);
    }
}
