//! Multi-stroke operations: mixing, washing and cleaning the needle

use log::info;

use super::plan::{check_volume, Planner};
use super::specs::{CleanSpec, InternalWashSpec, MixSpec, WashSpec};
use super::LiquidHandler;
use crate::error::Result;
use crate::traits::CommandLink;

impl Planner<'_> {
    /// Stroke back and forth, in a place or in air at the top of travel
    ///
    /// The blowout is drawn before mixing at the default rate and pushed
    /// out after it. A zero displacement or zero cycles is a no-op.
    pub fn mix(&mut self, spec: &MixSpec) -> Result<()> {
        if spec.displacement_ul == 0.0 || spec.cycles == 0 {
            return Ok(());
        }
        check_volume(spec.displacement_ul)?;
        let rate = self.rate(spec.flow_rate_ml_min);
        let blowout_rate = self.rate(None);

        let location = match &spec.location {
            Some(place) => {
                let location = self.move_to(place, false)?;
                self.move_z(location.access_z)?;
                Some(location)
            }
            None => {
                self.move_z(self.max_z())?;
                None
            }
        };
        if spec.blowout_ul > 0.0 {
            self.stroke(spec.blowout_ul, blowout_rate)?;
        }
        if let Some(location) = &location {
            self.move_z(location.transfer_z)?;
        }
        for _ in 0..spec.cycles {
            self.stroke(spec.displacement_ul, rate)?;
            self.stroke(-spec.displacement_ul, rate)?;
        }
        if let Some(location) = &location {
            self.tip_exit(spec.tip_exit, location)?;
        }
        if spec.blowout_ul > 0.0 {
            self.stroke(-spec.blowout_ul, blowout_rate)?;
        }
        Ok(())
    }

    /// Dip the needle into each position to rinse its outside
    ///
    /// An air gap without its own location is drawn and expelled above the
    /// position being washed.
    pub fn wash(&mut self, spec: &WashSpec) -> Result<()> {
        for place in &spec.positions {
            let gap = spec.air_gap.as_ref().map(|gap| {
                let mut gap = gap.clone();
                gap.location.get_or_insert_with(|| place.clone());
                gap
            });
            if let Some(gap) = &gap {
                self.aspirate_air(gap)?;
            }
            let location = self.move_to(place, false)?;
            for _ in 0..spec.cycles {
                self.move_z(location.transfer_z)?;
                self.tip_exit(spec.tip_exit, &location)?;
            }
            if let Some(gap) = &gap {
                self.dispense_air(gap)?;
            }
        }
        Ok(())
    }

    /// Flush system fluid out of the needle into a place
    ///
    /// Ends with the system air gap drawn back at the default rate.
    pub fn clean(&mut self, spec: &CleanSpec) -> Result<()> {
        check_volume(spec.volume_ul)?;
        let rate = self.rate(spec.flow_rate_ml_min);
        let location = self.move_to(&spec.location, spec.on_edge)?;
        self.move_z(if spec.free_dispense {
            location.access_z
        } else {
            location.transfer_z
        })?;
        if spec.pre_flush {
            self.home_pump();
        }
        for _ in 0..spec.cycles {
            self.draw_reservoir(spec.volume_ul, rate)?;
            self.stroke(-spec.volume_ul, rate)?;
        }
        self.tip_exit(spec.tip_exit, &location)?;
        let gap = self.config().system_air_gap_ul;
        if gap > 0.0 {
            let rate = self.rate(None);
            self.stroke(gap, rate)?;
        }
        Ok(())
    }
}

impl<L: CommandLink> LiquidHandler<L> {
    pub fn mix(&mut self, spec: &MixSpec) -> Result<()> {
        info!(
            "Mixing {} uL x{} {}",
            spec.displacement_ul,
            spec.cycles,
            match &spec.location {
                Some(place) => format!("in {place}"),
                None => "in air".to_owned(),
            }
        );
        self.run("mix", |h| h.perform(|p| p.mix(spec)))
    }

    pub fn wash(&mut self, spec: &WashSpec) -> Result<()> {
        self.run("wash", |h| h.perform(|p| p.wash(spec)))
    }

    /// Rinse the inside of the needle by mixing in a wash place
    pub fn internal_wash(&mut self, spec: &InternalWashSpec) -> Result<()> {
        self.run("internal wash", |h| h.perform(|p| p.mix(&spec.to_mix())))
    }

    pub fn clean(&mut self, spec: &CleanSpec) -> Result<()> {
        info!("Cleaning with {} uL x{} into {}", spec.volume_ul, spec.cycles, spec.location);
        self.run("clean", |h| h.perform(|p| p.clean(spec)))
    }
}
