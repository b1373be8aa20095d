//! Pre-flight planning
//!
//! Every operation is first expanded into a list of [`Action`]s against a
//! copy of the handler's [`Tracker`]. Bounds, volumes and command grammar are
//! all checked while planning, so a rejected request sends nothing. Executing
//! the plan replays the same actions against the devices and the real
//! tracker.

use core::fmt;
use std::time::Duration;

use ampoule_protocol::{ArmCommand, AxisMove, CommandError, PumpCommand};

use crate::config::{ArmSpeeds, HandlerConfig};
use crate::deck::{HandlerBed, Location, Placeable, Point2D};
use crate::error::{Error, Result};

/// Slack when comparing tracked volumes (uL)
const VOLUME_EPSILON: f64 = 1e-6;

/// Arm position and syringe content as far as this session knows
#[derive(Debug, Clone, PartialEq)]
pub struct Tracker {
    /// Last commanded XY, `None` after homing
    pub xy: Option<Point2D>,
    /// Last commanded Z
    pub z: Option<f64>,
    /// Travel height of the place the arm is over
    pub travel_z: f64,
    /// Syringe content since the last pump home (uL)
    pub content_ul: f64,
}

impl Tracker {
    pub fn new(bed_max_z: f64) -> Self {
        Self {
            xy: None,
            z: None,
            travel_z: bed_max_z,
            content_ul: 0.0,
        }
    }
}

/// One device-level step of an operation
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    MoveZ {
        z: f64,
        speed: f64,
    },
    MoveXy {
        target: Point2D,
        speed: f64,
        /// Travel height of the place being moved over
        travel_z: f64,
    },
    /// Needle stroke; positive aspirates, negative dispenses
    Needle {
        volume_ul: f64,
        rate: f64,
    },
    /// Draw system fluid from the reservoir
    DrawReservoir {
        volume_ul: f64,
        rate: f64,
    },
    HomePump,
    HomeArm,
    InjectorLoad,
    InjectorInject,
    Comment(String),
    Wait(Duration),
}

impl Action {
    /// Update `tracker` as if this action had completed
    pub fn apply_to(&self, tracker: &mut Tracker, bed_max_z: f64) {
        match self {
            Action::MoveZ { z, .. } => tracker.z = Some(*z),
            Action::MoveXy {
                target, travel_z, ..
            } => {
                tracker.xy = Some(*target);
                tracker.travel_z = *travel_z;
            }
            Action::Needle { volume_ul, .. } | Action::DrawReservoir { volume_ul, .. } => {
                tracker.content_ul = (tracker.content_ul + volume_ul).max(0.0);
            }
            Action::HomePump => tracker.content_ul = 0.0,
            Action::HomeArm => {
                tracker.xy = None;
                tracker.z = Some(bed_max_z);
                tracker.travel_z = bed_max_z;
            }
            Action::InjectorLoad
            | Action::InjectorInject
            | Action::Comment(_)
            | Action::Wait(_) => {}
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::MoveZ { z, speed } => write!(f, "move z {z} @ {speed} mm/s"),
            Action::MoveXy { target, speed, .. } => write!(f, "move xy {target} @ {speed} mm/s"),
            Action::Needle { volume_ul, rate } if *volume_ul >= 0.0 => {
                write!(f, "aspirate {volume_ul} uL @ {rate} mL/min")
            }
            Action::Needle { volume_ul, rate } => {
                write!(f, "dispense {} uL @ {rate} mL/min", -volume_ul)
            }
            Action::DrawReservoir { volume_ul, rate } => {
                write!(f, "draw {volume_ul} uL from reservoir @ {rate} mL/min")
            }
            Action::HomePump => f.write_str("home pump"),
            Action::HomeArm => f.write_str("home arm"),
            Action::InjectorLoad => f.write_str("injector load"),
            Action::InjectorInject => f.write_str("injector inject"),
            Action::Comment(text) => write!(f, "# {text}"),
            Action::Wait(d) => write!(f, "wait {:.1} s", d.as_secs_f64()),
        }
    }
}

/// Builds and validates an action list
pub struct Planner<'a> {
    bed: &'a HandlerBed,
    config: &'a HandlerConfig,
    speeds: ArmSpeeds,
    tracker: Tracker,
    actions: Vec<Action>,
}

impl<'a> Planner<'a> {
    pub fn new(bed: &'a HandlerBed, config: &'a HandlerConfig, tracker: Tracker) -> Self {
        Self {
            bed,
            config,
            speeds: config.speeds(),
            tracker,
            actions: Vec::new(),
        }
    }

    pub fn bed(&self) -> &'a HandlerBed {
        self.bed
    }

    pub fn config(&self) -> &'a HandlerConfig {
        self.config
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }

    pub fn max_z(&self) -> f64 {
        self.bed.bounds().max_z()
    }

    /// Flow rate, falling back to the configured default
    pub fn rate(&self, rate: Option<f64>) -> f64 {
        rate.unwrap_or(self.config.default_flow_rate_ml_min)
    }

    pub fn locate(&self, place: &Placeable) -> Result<Location> {
        self.bed.locate(place)
    }

    fn push(&mut self, action: Action) {
        action.apply_to(&mut self.tracker, self.bed.bounds().max_z());
        self.actions.push(action);
    }

    // Primitives

    pub fn move_z(&mut self, z: f64) -> Result<()> {
        let z = self.bed.bounds().check_z(z)?;
        ArmCommand::MoveZ(AxisMove::to(z).at(self.speeds.z)).encode()?;
        self.push(Action::MoveZ {
            z,
            speed: self.speeds.z,
        });
        Ok(())
    }

    /// Horizontal move without changing height
    ///
    /// Callers are responsible for the current height: cross-location moves
    /// go through [`Planner::move_to`].
    pub fn move_xy(&mut self, target: Point2D, travel_z: f64) -> Result<()> {
        let target = self.bed.bounds().check_xy(target)?;
        ArmCommand::MoveXy {
            x: AxisMove::to(target.x).at(self.speeds.xy),
            y: AxisMove::to(target.y).at(self.speeds.xy),
        }
        .encode()?;
        self.push(Action::MoveXy {
            target,
            speed: self.speeds.xy,
            travel_z,
        });
        Ok(())
    }

    /// Needle stroke with capacity and content checks
    pub fn stroke(&mut self, volume_ul: f64, rate: f64) -> Result<()> {
        check_rate(rate)?;
        check_volume(volume_ul.abs())?;
        if volume_ul > 0.0 {
            self.check_capacity(volume_ul)?;
        } else if -volume_ul > self.tracker.content_ul + VOLUME_EPSILON {
            return Err(Error::Volume(format!(
                "cannot dispense {} uL, syringe holds {} uL",
                -volume_ul, self.tracker.content_ul
            )));
        }
        let command = if volume_ul > 0.0 {
            PumpCommand::aspirate(volume_ul, rate)
        } else {
            PumpCommand::dispense(volume_ul, rate)
        };
        command.encode()?;
        self.push(Action::Needle { volume_ul, rate });
        Ok(())
    }

    pub fn draw_reservoir(&mut self, volume_ul: f64, rate: f64) -> Result<()> {
        check_rate(rate)?;
        check_volume(volume_ul)?;
        self.check_capacity(volume_ul)?;
        PumpCommand::draw_reservoir(volume_ul, rate).encode()?;
        self.push(Action::DrawReservoir { volume_ul, rate });
        Ok(())
    }

    pub fn home_pump(&mut self) {
        self.push(Action::HomePump);
    }

    pub fn home_arm(&mut self) {
        self.push(Action::HomeArm);
    }

    pub fn injector(&mut self, inject: bool) {
        self.push(if inject {
            Action::InjectorInject
        } else {
            Action::InjectorLoad
        });
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.push(Action::Comment(text.into()));
    }

    pub fn wait(&mut self, duration: Duration) {
        self.push(Action::Wait(duration));
    }

    fn check_capacity(&self, volume_ul: f64) -> Result<()> {
        let max = self.config.max_syringe_volume_ul;
        if self.tracker.content_ul + volume_ul > max + VOLUME_EPSILON {
            return Err(Error::Volume(format!(
                "aspirating {volume_ul} uL would exceed the {max} uL syringe (holds {} uL)",
                self.tracker.content_ul
            )));
        }
        Ok(())
    }
}

/// Reject zero, negative and non-finite volumes
pub fn check_volume(volume_ul: f64) -> Result<()> {
    if volume_ul.is_finite() && volume_ul > 0.0 {
        Ok(())
    } else {
        Err(Error::Volume(format!(
            "volume must be positive, got {volume_ul}"
        )))
    }
}

pub fn check_rate(rate: f64) -> Result<()> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(Error::Command(CommandError::InvalidFlowRate(rate)))
    }
}
