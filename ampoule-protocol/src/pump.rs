//! Syringe pump commands
//!
//! The pump has a two-way valve: the reservoir side (system fluid) and the
//! needle side. Volumes are in uL, flow rates in mL/min.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::command::{require_finite, BufferedCommand, CommandError, CommandText, ImmediateCommand};

/// Factory device id of the pump
pub const DEFAULT_PUMP_ID: u8 = 2;

/// Syringe sizes the firmware accepts (uL)
pub const SYRINGE_SIZES: [u32; 6] = [100, 250, 500, 1000, 5000, 10000];

/// Smallest stroke the pump resolves (uL)
pub const MIN_STROKE_UL: f64 = 0.001;

/// Valve position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Valve {
    /// System fluid reservoir (aspirate only)
    Reservoir,
    /// Needle liquid line
    Needle,
}

impl Valve {
    /// Wire letter
    pub const fn letter(self) -> char {
        match self {
            Valve::Reservoir => 'R',
            Valve::Needle => 'N',
        }
    }

    /// Parse a wire letter
    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            'R' => Some(Valve::Reservoir),
            'N' => Some(Valve::Needle),
            _ => None,
        }
    }
}

/// Pump queries (immediate commands)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpQuery {
    /// `%` - firmware identification
    ModuleId,
    /// `$` - master reset
    Reset,
    /// `e` - current error number
    ReadError,
    /// `F` - `size[uL] min-max (default)[mL/min]`
    SyringeSize,
    /// `M` - valve and syringe motor status characters
    MotorStatus,
    /// `P` - `n:v.vvv` valve and syringe content
    SyringeStatus,
}

impl PumpQuery {
    /// Wire command for this query
    pub const fn command(self) -> ImmediateCommand {
        let code = match self {
            PumpQuery::ModuleId => b'%',
            PumpQuery::Reset => b'$',
            PumpQuery::ReadError => b'e',
            PumpQuery::SyringeSize => b'F',
            PumpQuery::MotorStatus => b'M',
            PumpQuery::SyringeStatus => b'P',
        };
        ImmediateCommand::from_table(code)
    }
}

/// Pump actions (buffered commands)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PumpCommand {
    /// `e` - clear the current error
    ClearError,
    /// `e{n}` - raise an error (diagnostics)
    RaiseError(u16),
    /// `@4={size}` - tell the firmware which syringe is fitted
    SetSyringeSize(u32),
    /// `P{valve}:{volume}[:{rate}]` - positive volume aspirates, negative dispenses
    Run {
        valve: Valve,
        volume_ul: f64,
        flow_rate_ml_min: Option<f64>,
    },
    /// `PX` - stop the syringe
    Stop,
    /// `p` - home the syringe (expels its content)
    Home,
}

impl PumpCommand {
    /// Aspirate through the needle
    pub fn aspirate(volume_ul: f64, flow_rate_ml_min: f64) -> Self {
        PumpCommand::Run {
            valve: Valve::Needle,
            volume_ul: volume_ul.abs(),
            flow_rate_ml_min: Some(flow_rate_ml_min),
        }
    }

    /// Dispense through the needle
    pub fn dispense(volume_ul: f64, flow_rate_ml_min: f64) -> Self {
        PumpCommand::Run {
            valve: Valve::Needle,
            volume_ul: -volume_ul.abs(),
            flow_rate_ml_min: Some(flow_rate_ml_min),
        }
    }

    /// Draw system fluid from the reservoir
    pub fn draw_reservoir(volume_ul: f64, flow_rate_ml_min: f64) -> Self {
        PumpCommand::Run {
            valve: Valve::Reservoir,
            volume_ul: volume_ul.abs(),
            flow_rate_ml_min: Some(flow_rate_ml_min),
        }
    }

    /// Encode into a buffered command frame
    pub fn encode(&self) -> Result<BufferedCommand, CommandError> {
        let mut text = CommandText::new();
        match self {
            PumpCommand::ClearError => {
                text.push_char('e')?;
            }
            PumpCommand::RaiseError(code) => {
                text.push_char('e')?.push_uint(*code as u32)?;
            }
            PumpCommand::SetSyringeSize(size) => {
                if !SYRINGE_SIZES.contains(size) {
                    return Err(CommandError::InvalidSyringeSize(*size));
                }
                text.push_str("@4=")?.push_uint(*size)?;
            }
            PumpCommand::Run {
                valve,
                volume_ul,
                flow_rate_ml_min,
            } => {
                let volume = require_finite("volume", *volume_ul)?;
                if volume.abs() < MIN_STROKE_UL {
                    return Err(CommandError::VolumeTooSmall(volume));
                }
                if *valve == Valve::Reservoir && volume < 0.0 {
                    return Err(CommandError::ReservoirDispense);
                }
                text.push_char('P')?
                    .push_char(valve.letter())?
                    .push_char(':')?
                    .push_decimal(volume, 3)?;
                if let Some(rate) = flow_rate_ml_min {
                    if !rate.is_finite() || *rate <= 0.0 {
                        return Err(CommandError::InvalidFlowRate(*rate));
                    }
                    text.push_char(':')?.push_decimal(*rate, 2)?;
                }
            }
            PumpCommand::Stop => {
                text.push_str("PX")?;
            }
            PumpCommand::Home => {
                text.push_char('p')?;
            }
        }
        text.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(cmd: PumpCommand) -> std::string::String {
        cmd.encode().unwrap().as_str().into()
    }

    #[test]
    fn test_aspirate_and_dispense_signs() {
        assert_eq!(encoded(PumpCommand::aspirate(50.0, 1.0)), "PN:50:1");
        assert_eq!(encoded(PumpCommand::dispense(50.0, 1.0)), "PN:-50:1");
        assert_eq!(encoded(PumpCommand::draw_reservoir(20.0, 5.0)), "PR:20:5");
    }

    #[test]
    fn test_volume_and_rate_precision() {
        let cmd = PumpCommand::Run {
            valve: Valve::Needle,
            volume_ul: 12.3456,
            flow_rate_ml_min: Some(0.555),
        };
        // three decimals for volume, two for rate
        let text = encoded(cmd);
        assert!(text.starts_with("PN:12.346:"));
    }

    #[test]
    fn test_run_without_rate() {
        let cmd = PumpCommand::Run {
            valve: Valve::Needle,
            volume_ul: 0.5,
            flow_rate_ml_min: None,
        };
        assert_eq!(encoded(cmd), "PN:0.5");
    }

    #[test]
    fn test_reservoir_dispense_rejected() {
        let cmd = PumpCommand::Run {
            valve: Valve::Reservoir,
            volume_ul: -10.0,
            flow_rate_ml_min: None,
        };
        assert_eq!(cmd.encode(), Err(CommandError::ReservoirDispense));
    }

    #[test]
    fn test_tiny_volume_rejected() {
        assert_eq!(
            PumpCommand::aspirate(0.0, 1.0).encode(),
            Err(CommandError::VolumeTooSmall(0.0))
        );
        assert!(PumpCommand::aspirate(0.0005, 1.0).encode().is_err());
        assert!(PumpCommand::aspirate(0.001, 1.0).encode().is_ok());
    }

    #[test]
    fn test_invalid_rate_rejected() {
        assert_eq!(
            PumpCommand::aspirate(10.0, 0.0).encode(),
            Err(CommandError::InvalidFlowRate(0.0))
        );
    }

    #[test]
    fn test_syringe_size() {
        assert_eq!(encoded(PumpCommand::SetSyringeSize(1000)), "@4=1000");
        assert_eq!(
            PumpCommand::SetSyringeSize(750).encode(),
            Err(CommandError::InvalidSyringeSize(750))
        );
    }

    #[test]
    fn test_fixed_commands() {
        assert_eq!(encoded(PumpCommand::Stop), "PX");
        assert_eq!(encoded(PumpCommand::Home), "p");
        assert_eq!(encoded(PumpCommand::ClearError), "e");
        assert_eq!(PumpQuery::SyringeStatus.command().as_char(), 'P');
    }

    #[test]
    fn test_valve_letters() {
        assert_eq!(Valve::from_letter('R'), Some(Valve::Reservoir));
        assert_eq!(Valve::from_letter('N'), Some(Valve::Needle));
        assert_eq!(Valve::from_letter('Q'), None);
    }
}
