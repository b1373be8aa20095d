//! Device status reports and injector switching

use core::fmt;

use ampoule_protocol::{
    AxisRange, DeviceKind, InjectorPosition, MotorStatus, StatusSummary, SyringeSize,
    SyringeStatus,
};
use log::debug;

use super::LiquidHandler;
use crate::error::{Error, Result};
use crate::state::SessionState;
use crate::traits::CommandLink;

/// Snapshot of the arm
#[derive(Debug, Clone, PartialEq)]
pub struct ArmReport {
    pub module_id: String,
    pub summary: StatusSummary,
    pub ranges: Vec<AxisRange>,
}

/// Snapshot of the syringe pump
#[derive(Debug, Clone, PartialEq)]
pub struct PumpReport {
    pub module_id: String,
    pub error: u16,
    pub syringe: SyringeSize,
    pub motors: MotorStatus,
    pub status: SyringeStatus,
}

/// Snapshot of the injection valve
#[derive(Debug, Clone, PartialEq)]
pub struct InjectorReport {
    pub module_id: String,
    pub error: u16,
    pub position: InjectorPosition,
}

fn motor_chars(status: &MotorStatus) -> String {
    status.motors().iter().map(|m| m.as_char()).collect()
}

fn position_name(position: InjectorPosition) -> &'static str {
    match position {
        InjectorPosition::Moving => "moving",
        InjectorPosition::Load => "load",
        InjectorPosition::Inject => "inject",
    }
}

impl fmt::Display for ArmReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x, y, z) = self.summary.position;
        writeln!(f, "arm: {}", self.module_id)?;
        writeln!(f, "  motors:   {}", motor_chars(&self.summary.motors))?;
        writeln!(f, "  position: {x}/{y}/{z}")?;
        if let Some(valve) = self.summary.valve {
            writeln!(f, "  valve:    {}", position_name(valve))?;
        }
        write!(
            f,
            "  error:    {} ({})",
            self.summary.error,
            DeviceKind::Arm.describe_error(self.summary.error)
        )?;
        for range in &self.ranges {
            write!(f, "\n  {} range: {} to {}", range.axis, range.min, range.max)?;
        }
        Ok(())
    }
}

impl fmt::Display for PumpReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pump: {}", self.module_id)?;
        writeln!(f, "  syringe:  {} uL", self.syringe.size_ul)?;
        writeln!(f, "  motors:   {}", motor_chars(&self.motors))?;
        match self.status.volume_ul {
            Some(v) => writeln!(f, "  content:  {v} uL (valve {})", self.status.valve.letter())?,
            None => writeln!(f, "  content:  unknown (valve {})", self.status.valve.letter())?,
        }
        write!(
            f,
            "  error:    {} ({})",
            self.error,
            DeviceKind::Pump.describe_error(self.error)
        )
    }
}

impl fmt::Display for InjectorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "injector: {}", self.module_id)?;
        writeln!(f, "  position: {}", position_name(self.position))?;
        write!(
            f,
            "  error:    {} ({})",
            self.error,
            DeviceKind::Injector.describe_error(self.error)
        )
    }
}

impl<L: CommandLink> LiquidHandler<L> {
    /// Read the arm's identity, status summary and travel ranges
    ///
    /// Queries do not move anything and are allowed before homing.
    pub fn query_arm(&mut self) -> Result<ArmReport> {
        self.inspect(|h| {
            let backend = &mut h.backend;
            Ok(ArmReport {
                module_id: backend.module_id(DeviceKind::Arm)?,
                summary: backend.arm_status()?,
                ranges: backend.travel_ranges()?,
            })
        })
    }

    pub fn query_pump(&mut self) -> Result<PumpReport> {
        self.inspect(|h| {
            let backend = &mut h.backend;
            Ok(PumpReport {
                module_id: backend.module_id(DeviceKind::Pump)?,
                error: backend.read_error(DeviceKind::Pump)?,
                syringe: backend.syringe_size()?,
                motors: backend.pump_motor_status()?,
                status: backend.syringe_status()?,
            })
        })
    }

    pub fn query_injector(&mut self) -> Result<InjectorReport> {
        self.inspect(|h| {
            let backend = &mut h.backend;
            Ok(InjectorReport {
                module_id: backend.module_id(DeviceKind::Injector)?,
                error: backend.read_error(DeviceKind::Injector)?,
                position: backend.injector_status()?,
            })
        })
    }

    /// Switch the injection valve to load
    pub fn injector_load(&mut self) -> Result<()> {
        self.run("injector load", |h| {
            h.perform(|p| {
                p.injector(false);
                Ok(())
            })
        })
    }

    /// Switch the injection valve to inject
    pub fn injector_inject(&mut self) -> Result<()> {
        self.run("injector inject", |h| {
            h.perform(|p| {
                p.injector(true);
                Ok(())
            })
        })
    }

    /// Run read-only queries, faulting the session on timeouts and faults
    fn inspect<T>(&mut self, query: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if matches!(self.state, SessionState::Disconnected | SessionState::Busy) {
            return Err(Error::NotReady { state: self.state });
        }
        let result = query(self);
        if let Err(e) = &result {
            debug!("query failed: {e}");
            self.observe_failure(e);
        }
        result
    }
}
