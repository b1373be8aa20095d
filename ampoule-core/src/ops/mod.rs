//! Safety-constrained liquid handling
//!
//! [`LiquidHandler`] owns the device backend, the bed and the handler
//! configuration, and tracks the session state. Public operations:
//!
//! 1. check that the session accepts operations
//! 2. plan the full action list (bounds, volumes and grammar are checked here)
//! 3. execute it, updating the tracked arm position and syringe content
//!
//! A device fault or timeout moves the session to `Faulted`; anything
//! rejected during planning leaves it untouched and sends nothing.

mod composite;
mod droplet;
mod liquid;
mod motion;
pub mod plan;
mod query;
pub mod specs;

use ampoule_protocol::Valve;
use log::{debug, info, warn};

use crate::backend::{DeviceBackend, SettlePolicy};
use crate::config::HandlerConfig;
use crate::deck::{HandlerBed, FLUID_VOLUME_KEY};
use crate::error::{Error, Result};
use crate::state::{Event, FaultKind, SessionState};
use crate::traits::CommandLink;

pub use liquid::prime_chunks;
pub use plan::{Action, Planner, Tracker};
pub use query::{ArmReport, InjectorReport, PumpReport};
pub use specs::{
    AirGap, AspirateSpec, CleanSpec, Component, Destination, DispenseAllSpec, DispenseSpec,
    DistributeSpec, DropletSpec, InternalWashSpec, MixSpec, TipExit, VialSpec, WashSpec,
};

/// A connected liquid handler
pub struct LiquidHandler<L> {
    backend: DeviceBackend<L>,
    bed: HandlerBed,
    config: HandlerConfig,
    state: SessionState,
    tracker: Tracker,
}

impl<L: CommandLink> LiquidHandler<L> {
    /// Wrap a backend whose link is already open
    ///
    /// The session starts in `Connected`; home the arm (or call
    /// [`LiquidHandler::initialize`]) before running operations.
    pub fn new(backend: DeviceBackend<L>, bed: HandlerBed, config: HandlerConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|reason| Error::descriptor("handler configuration", reason))?;
        let backend = backend.with_settle(SettlePolicy::from_config(&config));
        let tracker = Tracker::new(bed.bounds().max_z());
        Ok(Self {
            backend,
            bed,
            config,
            state: SessionState::Disconnected.transition(Event::Connected),
            tracker,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn bed(&self) -> &HandlerBed {
        &self.bed
    }

    pub fn bed_mut(&mut self) -> &mut HandlerBed {
        &mut self.bed
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn backend(&self) -> &DeviceBackend<L> {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut DeviceBackend<L> {
        &mut self.backend
    }

    /// Tracked arm position and syringe content
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Mark the link as gone; every later operation fails with `NotReady`
    pub fn disconnect(&mut self) {
        self.apply_event(Event::Disconnected);
    }

    pub fn into_backend(self) -> DeviceBackend<L> {
        self.backend
    }

    /// Home the arm; the only way out of `Faulted`
    pub fn home_arm(&mut self) -> Result<()> {
        if !self.state.accepts_homing() {
            return Err(Error::NotReady { state: self.state });
        }
        info!("Homing arm");
        let result = self.apply(&Action::HomeArm);
        match &result {
            Ok(()) => self.apply_event(Event::Homed),
            Err(e) => self.observe_failure(e),
        }
        result
    }

    /// Bring a fresh session to `Ready`
    ///
    /// Homes the arm (unless configured not to), then either homes the pump
    /// or reads back what the syringe already holds, and draws the system
    /// air gap. A faulted session is always homed first.
    pub fn initialize(&mut self) -> Result<()> {
        let state = self.state;
        match state {
            _ if self.config.home_arm_on_startup => self.home_arm()?,
            SessionState::Faulted(_) => {
                info!("Session faulted, homing arm before initializing");
                self.home_arm()?;
            }
            SessionState::Connected => {
                warn!("Arm not homed on startup, trusting its current position");
                self.apply_event(Event::Homed);
            }
            SessionState::Homed | SessionState::Ready => {}
            _ => return Err(Error::NotReady { state }),
        }
        if !self.config.home_pump_on_startup {
            self.sync_syringe()?;
        }
        self.run("initialize", |h| {
            h.perform(|p| {
                if p.config().home_pump_on_startup {
                    p.home_pump();
                }
                let gap = p.config().system_air_gap_ul;
                if gap > 0.0 {
                    p.aspirate_air(&AirGap::new(gap))?;
                }
                Ok(())
            })
        })?;
        self.apply_event(Event::Initialized);
        Ok(())
    }

    /// Take the tracked syringe content from the pump's own status
    fn sync_syringe(&mut self) -> Result<()> {
        let status = match self.backend.syringe_status() {
            Ok(status) => status,
            Err(e) => {
                self.observe_failure(&e);
                return Err(e);
            }
        };
        match status.volume_ul {
            Some(volume_ul) => {
                debug!("Syringe holds {volume_ul} uL");
                self.tracker.content_ul = volume_ul;
            }
            None => warn!("Syringe position unknown, home the pump before dispensing"),
        }
        Ok(())
    }

    /// Home the syringe, expelling its content where the needle is
    pub fn home_pump(&mut self) -> Result<()> {
        self.run("home pump", |h| {
            h.perform(|p| {
                p.home_pump();
                Ok(())
            })
        })
    }

    /// Plan an action list against the tracked state without executing it
    pub fn plan<T>(&self, build: impl FnOnce(&mut Planner<'_>) -> Result<T>) -> Result<(T, Vec<Action>)> {
        let mut planner = Planner::new(&self.bed, &self.config, self.tracker.clone());
        let value = build(&mut planner)?;
        Ok((value, planner.into_actions()))
    }

    /// Plan, then execute
    fn perform<T>(&mut self, build: impl FnOnce(&mut Planner<'_>) -> Result<T>) -> Result<T> {
        let (value, actions) = self.plan(build)?;
        for action in &actions {
            self.apply(action)?;
        }
        Ok(value)
    }

    /// Run an operation under the session guard
    pub(crate) fn run<T>(&mut self, name: &str, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if !self.state.accepts_operations() {
            return Err(Error::NotReady { state: self.state });
        }
        info!("{name}");
        self.apply_event(Event::OperationStarted);
        let result = op(self);
        match &result {
            Ok(_) => self.apply_event(Event::OperationFinished),
            Err(e) if fault_kind(e).is_some() => self.observe_failure(e),
            Err(e) => {
                debug!("{name} rejected: {e}");
                self.apply_event(Event::OperationFinished);
            }
        }
        result
    }

    /// Execute one action and update the tracker
    pub(crate) fn apply(&mut self, action: &Action) -> Result<()> {
        debug!("{action}");
        match action {
            Action::MoveZ { z, speed } => self.backend.move_z(*z, *speed)?,
            Action::MoveXy { target, speed, .. } => self.backend.move_xy(*target, *speed)?,
            Action::Needle { volume_ul, rate } => {
                self.backend.run_pump(Valve::Needle, *volume_ul, *rate)?
            }
            Action::DrawReservoir { volume_ul, rate } => {
                self.backend.run_pump(Valve::Reservoir, *volume_ul, *rate)?
            }
            Action::HomePump => self.backend.home_pump()?,
            Action::HomeArm => self.backend.home_arm()?,
            Action::InjectorLoad => self.backend.injector_load()?,
            Action::InjectorInject => self.backend.injector_inject()?,
            Action::Comment(text) => info!("{text}"),
            Action::Wait(duration) => {
                info!("Waiting {:.1} s", duration.as_secs_f64());
                self.backend.pause(*duration);
            }
        }
        action.apply_to(&mut self.tracker, self.bed.bounds().max_z());
        if let Action::DrawReservoir { volume_ul, .. } = action {
            self.debit_system_fluid(*volume_ul)?;
        }
        Ok(())
    }

    /// Take a reservoir draw off the persisted system fluid volume
    fn debit_system_fluid(&mut self, volume_ul: f64) -> Result<()> {
        let drawn_ml = volume_ul / 1000.0;
        let left = self
            .bed
            .resources()
            .update_f64(FLUID_VOLUME_KEY, |ml| ml - drawn_ml)?;
        match left {
            Some(ml) => debug!("System fluid left: {ml:.3} mL"),
            None => warn!("Resource file has no {FLUID_VOLUME_KEY}, not tracking system fluid"),
        }
        Ok(())
    }

    fn observe_failure(&mut self, err: &Error) {
        if let Some(kind) = fault_kind(err) {
            warn!("Session faulted: {err}");
            self.apply_event(Event::FaultDetected(kind));
        }
    }

    fn apply_event(&mut self, event: Event) {
        let next = self.state.transition(event);
        if next != self.state {
            debug!("session {} -> {next}", self.state);
        }
        self.state = next;
    }
}

/// Which fault, if any, an error puts the session in
fn fault_kind(err: &Error) -> Option<FaultKind> {
    match err {
        Error::Device { .. } => Some(FaultKind::Device),
        Error::Timeout { .. } => Some(FaultKind::Timeout),
        Error::Io(_) => Some(FaultKind::Link),
        Error::ChainStep { source, .. } => fault_kind(source),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::DeviceIds;
    use crate::deck::{Placeable, Point2D, Rack, Vial, WellId};
    use crate::safety::BedBounds;
    use crate::sim::SimulatedLink;

    /// 4 x 4 rack at (8, 20), every slot filled
    ///
    /// Heights: travel 85, access 81, transfer 53. Edges sit 4 mm from the
    /// center toward the middle of the rack.
    pub fn rack() -> Rack {
        let mut rack = Rack::new(
            Point2D::new(8.0, 20.0),
            Point2D::new(18.0, 12.8),
            4,
            4,
            50.0,
            60.0,
        );
        for row in 1..=4 {
            for col in 1..=4 {
                let well = WellId::new(row, col).unwrap();
                rack.place_vial(well, Vial::new(30.0, 2.0, 30.0, 10.0, 10.0).unwrap())
                    .unwrap();
            }
        }
        rack
    }

    pub fn handler() -> (LiquidHandler<SimulatedLink>, SimulatedLink) {
        let mut bed = HandlerBed::new(BedBounds::default());
        bed.insert_rack("samples", rack());
        let sim = SimulatedLink::new(DeviceIds::default());
        let handle = sim.clone();
        let backend = DeviceBackend::new(sim, DeviceIds::default());
        let handler = LiquidHandler::new(backend, bed, HandlerConfig::default()).unwrap();
        (handler, handle)
    }

    pub fn ready() -> (LiquidHandler<SimulatedLink>, SimulatedLink) {
        let (mut handler, sim) = handler();
        handler.home_arm().unwrap();
        sim.log().clear();
        (handler, sim)
    }

    pub fn sample(well: &str) -> Placeable {
        Placeable::named("samples", well)
    }
}
