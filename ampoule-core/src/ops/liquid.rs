//! Single-stroke liquid operations and priming

use log::info;

use super::plan::{check_volume, Planner};
use super::specs::{AirGap, AspirateSpec, DispenseAllSpec, DispenseSpec};
use super::LiquidHandler;
use crate::deck::{Location, Placeable};
use crate::error::Result;
use crate::traits::CommandLink;

/// Remainders below this are treated as float noise when chunking (uL)
const CHUNK_EPSILON: f64 = 1e-6;

/// Split a priming volume into syringe-sized strokes
///
/// Every chunk is full except the last, which takes the remainder.
pub fn prime_chunks(volume_ul: f64, chunk_ul: f64) -> Vec<f64> {
    let mut chunks = Vec::new();
    if !(volume_ul > 0.0 && chunk_ul > 0.0) {
        return chunks;
    }
    let mut left = volume_ul;
    while left > CHUNK_EPSILON {
        let stroke = left.min(chunk_ul);
        chunks.push(stroke);
        left -= stroke;
    }
    chunks
}

impl Planner<'_> {
    /// Move in, lower to the transfer height, draw, exit
    pub fn aspirate(&mut self, spec: &AspirateSpec) -> Result<Location> {
        check_volume(spec.volume_ul)?;
        let rate = self.rate(spec.flow_rate_ml_min);
        let location = self.move_to(&spec.location, false)?;
        self.move_z(location.transfer_z)?;
        self.stroke(spec.volume_ul, rate)?;
        self.tip_exit(spec.tip_exit, &location)?;
        Ok(location)
    }

    pub fn dispense(&mut self, spec: &DispenseSpec) -> Result<Location> {
        check_volume(spec.volume_ul)?;
        let rate = self.rate(spec.flow_rate_ml_min);
        let location = self.move_to(&spec.location, spec.on_edge)?;
        self.move_z(if spec.free_dispense {
            location.access_z
        } else {
            location.transfer_z
        })?;
        self.stroke(-spec.volume_ul, rate)?;
        self.tip_exit(spec.tip_exit, &location)?;
        Ok(location)
    }

    /// Dispense by homing the syringe
    pub fn dispense_all(&mut self, spec: &DispenseAllSpec) -> Result<Location> {
        let location = self.move_to(&spec.location, spec.on_edge)?;
        self.move_z(if spec.free_dispense {
            location.access_z
        } else {
            location.transfer_z
        })?;
        self.home_pump();
        self.tip_exit(spec.tip_exit, &location)?;
        Ok(location)
    }

    /// Draw air above a place, or at the bed's top Z
    ///
    /// A zero-volume gap is skipped.
    pub fn aspirate_air(&mut self, gap: &AirGap) -> Result<()> {
        self.air(gap, 1.0)
    }

    pub fn dispense_air(&mut self, gap: &AirGap) -> Result<()> {
        self.air(gap, -1.0)
    }

    fn air(&mut self, gap: &AirGap, sign: f64) -> Result<()> {
        if gap.volume_ul == 0.0 {
            return Ok(());
        }
        check_volume(gap.volume_ul)?;
        let rate = self.rate(gap.flow_rate_ml_min);
        match &gap.location {
            Some(place) => {
                self.move_to(place, false)?;
            }
            None => self.move_z(self.max_z())?,
        }
        self.stroke(sign * gap.volume_ul, rate)
    }

    /// Draw system fluid from the reservoir into the syringe
    pub fn aspirate_system(&mut self, volume_ul: f64, rate: Option<f64>) -> Result<()> {
        let rate = self.rate(rate);
        self.draw_reservoir(volume_ul, rate)
    }

    /// Flush system fluid through the needle into the waste
    ///
    /// The pump is homed over the waste first, then each chunk is drawn from
    /// the reservoir and pushed out of the needle.
    pub fn prime(&mut self, volume_ul: f64, chunk_ul: Option<f64>, rate: Option<f64>) -> Result<()> {
        let chunk_ul = chunk_ul.unwrap_or(self.config().max_syringe_volume_ul);
        check_volume(volume_ul)?;
        check_volume(chunk_ul)?;
        let rate = rate.unwrap_or(self.config().priming_flow_rate_ml_min);
        let waste = self.config().waste.clone();
        self.move_to(&waste, false)?;
        self.home_pump();
        for stroke in prime_chunks(volume_ul, chunk_ul) {
            self.draw_reservoir(stroke, rate)?;
            self.stroke(-stroke, rate)?;
        }
        Ok(())
    }
}

impl<L: CommandLink> LiquidHandler<L> {
    /// Aspirate `volume_ul` from `place` with a centered tip exit
    pub fn aspirate(&mut self, volume_ul: f64, place: &Placeable, rate: Option<f64>) -> Result<()> {
        let mut spec = AspirateSpec::new(place.clone(), volume_ul);
        spec.flow_rate_ml_min = rate;
        self.aspirate_with(&spec)
    }

    pub fn aspirate_with(&mut self, spec: &AspirateSpec) -> Result<()> {
        info!("Aspirating {} uL from {}", spec.volume_ul, spec.location);
        self.run("aspirate", |h| h.perform(|p| p.aspirate(spec).map(drop)))
    }

    /// Dispense `volume_ul` into `place` at the transfer height
    pub fn dispense(&mut self, volume_ul: f64, place: &Placeable, rate: Option<f64>) -> Result<()> {
        let mut spec = DispenseSpec::new(place.clone(), volume_ul);
        spec.flow_rate_ml_min = rate;
        self.dispense_with(&spec)
    }

    pub fn dispense_with(&mut self, spec: &DispenseSpec) -> Result<()> {
        info!("Dispensing {} uL into {}", spec.volume_ul, spec.location);
        self.run("dispense", |h| h.perform(|p| p.dispense(spec).map(drop)))
    }

    pub fn dispense_all(&mut self, spec: &DispenseAllSpec) -> Result<()> {
        info!("Emptying syringe into {}", spec.location);
        self.run("dispense all", |h| h.perform(|p| p.dispense_all(spec).map(drop)))
    }

    pub fn aspirate_air(&mut self, gap: &AirGap) -> Result<()> {
        self.run("aspirate air", |h| h.perform(|p| p.aspirate_air(gap)))
    }

    pub fn dispense_air(&mut self, gap: &AirGap) -> Result<()> {
        self.run("dispense air", |h| h.perform(|p| p.dispense_air(gap)))
    }

    /// Draw system fluid; the tracked reservoir volume goes down with it
    pub fn aspirate_from_reservoir(&mut self, volume_ul: f64, rate: Option<f64>) -> Result<()> {
        self.run("aspirate system fluid", |h| {
            h.perform(|p| p.aspirate_system(volume_ul, rate))
        })
    }

    /// Prime the liquid line over the configured waste
    pub fn prime(&mut self, volume_ul: f64, chunk_ul: Option<f64>, rate: Option<f64>) -> Result<()> {
        info!("Priming {volume_ul} uL");
        self.run("prime", |h| h.perform(|p| p.prime(volume_ul, chunk_ul, rate)))
    }
}
