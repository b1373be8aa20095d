//! Droplet assembly in the liquid line
//!
//! A droplet is a train of components drawn one after another into the
//! needle, fenced by a back air gap (toward the system fluid) and a front
//! air gap (toward the needle tip):
//!
//! ```text
//! system fluid | back gap | component 1 | component 2 | ... | front gap | tip
//! ```
//!
//! A vial is the same ingredient list pooled in a destination vial instead,
//! one source at a time.

use log::info;

use super::plan::{check_volume, Planner};
use super::specs::{
    AirGap, AspirateSpec, DispenseSpec, DistributeSpec, DropletSpec, MixSpec, TipExit, VialSpec,
    WashSpec,
};
use super::LiquidHandler;
use crate::error::{Error, Result};
use crate::traits::CommandLink;

impl Planner<'_> {
    /// Draw every positive component, then mix them in the line
    ///
    /// Returns the droplet volume (uL), air gaps excluded.
    pub fn prepare_droplet(&mut self, spec: &DropletSpec) -> Result<f64> {
        let components: Vec<_> = spec.components.iter().filter(|c| c.volume_ul > 0.0).collect();
        if components.is_empty() {
            return Err(Error::Volume("droplet has no positive component".into()));
        }
        let droplet: f64 = components.iter().map(|c| c.volume_ul).sum();
        let mix_ul = if spec.mix_displacement_ul < 0.0 {
            -spec.mix_displacement_ul * droplet
        } else {
            spec.mix_displacement_ul
        };
        let total = spec.back_air_gap_ul + spec.front_air_gap_ul + mix_ul + droplet;
        let max = self.config().max_syringe_volume_ul;
        if total > max {
            return Err(Error::Volume(format!(
                "droplet needs {total} uL with gaps and mixing, syringe holds {max} uL"
            )));
        }

        self.aspirate_air(&AirGap::new(spec.back_air_gap_ul).at_rate(spec.air_rate_ml_min))?;
        for (i, component) in components.iter().enumerate() {
            if i > 0 {
                self.rinse_between(spec.dip.as_ref(), spec.dab.as_ref())?;
            }
            if spec.backlash_ul > 0.0 {
                let backlash = DispenseSpec {
                    flow_rate_ml_min: spec.aspirate_rate_ml_min,
                    tip_exit: TipExit::None,
                    ..DispenseSpec::new(component.location.clone(), spec.backlash_ul)
                };
                self.dispense(&backlash)?;
            }
            let draw = AspirateSpec {
                flow_rate_ml_min: spec.aspirate_rate_ml_min,
                tip_exit: spec.tip_exit,
                ..AspirateSpec::new(component.location.clone(), component.volume_ul)
            };
            self.aspirate(&draw)?;
        }
        self.aspirate_air(&AirGap::new(spec.front_air_gap_ul).at_rate(spec.air_rate_ml_min))?;

        if components.len() > 1 {
            self.mix(&MixSpec {
                displacement_ul: mix_ul,
                flow_rate_ml_min: spec.mix_rate_ml_min,
                cycles: spec.mix_cycles,
                location: None,
                tip_exit: TipExit::Center,
                blowout_ul: 0.0,
            })?;
        }
        Ok(droplet)
    }

    /// Dispense the droplet in portions across destinations
    ///
    /// The front air gap is pushed out into the first destination before
    /// any liquid and drawn back at the end. Returns the volume delivered.
    pub fn distribute_droplet(&mut self, spec: &DistributeSpec) -> Result<f64> {
        let destinations: Vec<_> = spec
            .destinations
            .iter()
            .filter(|d| d.volume_ul > 0.0)
            .collect();
        let mut ejected = false;
        for (i, destination) in destinations.iter().enumerate() {
            if i > 0 {
                self.rinse_between(spec.dip.as_ref(), spec.dab.as_ref())?;
            } else if spec.front_air_gap_ul > 0.0 {
                let gap = DispenseSpec {
                    flow_rate_ml_min: spec.air_rate_ml_min,
                    tip_exit: TipExit::None,
                    free_dispense: true,
                    ..DispenseSpec::new(destination.location.clone(), spec.front_air_gap_ul)
                };
                self.dispense(&gap)?;
                ejected = true;
            }
            let portion = DispenseSpec {
                flow_rate_ml_min: spec.dispense_rate_ml_min,
                tip_exit: spec.tip_exit,
                free_dispense: destination.free_dispense,
                ..DispenseSpec::new(destination.location.clone(), destination.volume_ul)
            };
            self.dispense(&portion)?;
        }
        if ejected {
            self.aspirate_air(&AirGap::new(spec.front_air_gap_ul).at_rate(spec.air_rate_ml_min))?;
        }
        Ok(destinations.iter().map(|d| d.volume_ul).sum())
    }

    /// Carry each positive component into the destination and mix there
    ///
    /// Returns the pooled volume (uL).
    pub fn prepare_vial(&mut self, spec: &VialSpec) -> Result<f64> {
        let components: Vec<_> = spec.components.iter().filter(|c| c.volume_ul > 0.0).collect();
        if components.is_empty() {
            return Err(Error::Volume("vial has no positive component".into()));
        }
        self.aspirate_air(&AirGap::new(spec.back_air_gap_ul).at_rate(spec.air_rate_ml_min))?;
        let mut pooled = 0.0;
        for (i, component) in components.iter().enumerate() {
            if i > 0 {
                self.rinse_between(spec.dip.as_ref(), spec.dab.as_ref())?;
            }
            let draw = AspirateSpec {
                flow_rate_ml_min: spec.aspirate_rate_ml_min,
                tip_exit: spec.tip_exit,
                ..AspirateSpec::new(component.location.clone(), component.volume_ul)
            };
            self.aspirate(&draw)?;
            let add = DispenseSpec {
                flow_rate_ml_min: spec.aspirate_rate_ml_min,
                tip_exit: spec.tip_exit,
                free_dispense: spec.free_dispense,
                ..DispenseSpec::new(spec.destination.clone(), component.volume_ul)
            };
            self.dispense(&add)?;
            pooled += component.volume_ul;

            if spec.mix_each || i + 1 == components.len() {
                let displacement_ul = if spec.mix_displacement_ul < 0.0 {
                    -spec.mix_displacement_ul * pooled
                } else {
                    spec.mix_displacement_ul
                };
                self.mix(&MixSpec {
                    displacement_ul,
                    flow_rate_ml_min: spec.mix_rate_ml_min,
                    cycles: spec.mix_cycles,
                    location: Some(spec.destination.clone()),
                    tip_exit: spec.tip_exit,
                    blowout_ul: spec.blowout_ul,
                })?;
            }
        }
        Ok(pooled)
    }

    fn rinse_between(&mut self, dip: Option<&WashSpec>, dab: Option<&WashSpec>) -> Result<()> {
        if let Some(dip) = dip {
            self.wash(dip)?;
        }
        if let Some(dab) = dab {
            self.wash(dab)?;
        }
        Ok(())
    }
}

impl<L: CommandLink> LiquidHandler<L> {
    /// Build a droplet; returns its volume (uL)
    pub fn prepare_droplet(&mut self, spec: &DropletSpec) -> Result<f64> {
        let volume = self.run("prepare droplet", |h| h.perform(|p| p.prepare_droplet(spec)))?;
        info!("Prepared {volume} uL droplet from {} components", spec.components.len());
        Ok(volume)
    }

    /// Deliver the droplet; returns the volume dispensed (uL)
    pub fn distribute_droplet(&mut self, spec: &DistributeSpec) -> Result<f64> {
        let volume = self.run("distribute droplet", |h| {
            h.perform(|p| p.distribute_droplet(spec))
        })?;
        info!("Distributed {volume} uL to {} destinations", spec.destinations.len());
        Ok(volume)
    }

    /// Pool the components in the destination; returns the pooled volume (uL)
    pub fn prepare_vial(&mut self, spec: &VialSpec) -> Result<f64> {
        info!("Preparing vial {} from {} components", spec.destination, spec.components.len());
        self.run("prepare vial", |h| h.perform(|p| p.prepare_vial(spec)))
    }

    /// Push the droplet forward, run `measure`, then pull it back
    ///
    /// Both strokes run at half the default flow rate with the needle where
    /// it is. The measurement runs between them and its result is returned.
    pub fn center_droplet<T>(&mut self, volume_ul: f64, measure: impl FnOnce() -> T) -> Result<T> {
        self.run("center droplet", |h| {
            let rate = h.config.default_flow_rate_ml_min * 0.5;
            h.perform(|p| {
                check_volume(volume_ul)?;
                p.stroke(volume_ul, rate)
            })?;
            let value = measure();
            h.perform(|p| p.stroke(-volume_ul, rate))?;
            Ok(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::specs::{Component, Destination};
    use super::super::testing::*;
    use super::*;

    fn two_components() -> DropletSpec {
        DropletSpec {
            components: vec![
                Component {
                    location: sample("A1"),
                    volume_ul: 20.0,
                },
                Component {
                    location: sample("A2"),
                    volume_ul: 30.0,
                },
                Component {
                    location: sample("A3"),
                    volume_ul: 0.0,
                },
            ],
            back_air_gap_ul: 10.0,
            front_air_gap_ul: 5.0,
            air_rate_ml_min: None,
            aspirate_rate_ml_min: None,
            mix_displacement_ul: -1.0,
            mix_rate_ml_min: None,
            mix_cycles: 2,
            dip: None,
            dab: None,
            tip_exit: TipExit::Center,
            backlash_ul: 0.0,
        }
    }

    fn strokes(sim: &crate::sim::SimulatedLink) -> Vec<String> {
        sim.log()
            .buffered()
            .into_iter()
            .filter(|c| c.starts_with('P'))
            .collect()
    }

    #[test]
    fn test_prepare_droplet_strokes() {
        let (mut handler, sim) = ready();
        let volume = handler.prepare_droplet(&two_components()).unwrap();
        assert_eq!(volume, 50.0);
        assert_eq!(
            strokes(&sim),
            vec![
                "PN:10:1", "PN:20:1", "PN:30:1", "PN:5:1", "PN:50:1", "PN:-50:1", "PN:50:1",
                "PN:-50:1"
            ]
        );
        assert_eq!(handler.tracker().content_ul, 65.0);
    }

    #[test]
    fn test_single_component_is_not_mixed() {
        let (mut handler, sim) = ready();
        let mut spec = two_components();
        spec.components.truncate(1);
        assert_eq!(handler.prepare_droplet(&spec).unwrap(), 20.0);
        assert_eq!(strokes(&sim), vec!["PN:10:1", "PN:20:1", "PN:5:1"]);
    }

    #[test]
    fn test_oversized_droplet_sends_nothing() {
        let (mut handler, sim) = ready();
        let mut spec = two_components();
        spec.components[0].volume_ul = 400.0;
        spec.components[1].volume_ul = 200.0;
        // 600 uL droplet mixed with 600 uL displacement overflows the syringe
        assert!(matches!(
            handler.prepare_droplet(&spec),
            Err(Error::Volume(_))
        ));
        assert!(sim.log().is_empty());
    }

    #[test]
    fn test_dip_between_components() {
        let (mut handler, sim) = ready();
        let mut spec = two_components();
        spec.dip = Some(WashSpec {
            positions: vec![sample("D4")],
            cycles: 1,
            tip_exit: TipExit::Center,
            air_gap: None,
        });
        handler.prepare_droplet(&spec).unwrap();
        let log = sim.log().buffered();
        let dips = log.iter().filter(|c| *c == "X62:50/58.4:50").count();
        assert_eq!(dips, 1);
        // the dip sits between the two component moves
        let dip = log.iter().position(|c| c == "X62:50/58.4:50").unwrap();
        let second = log.iter().position(|c| c == "X26:50/20:50").unwrap();
        assert!(dip < second);
    }

    #[test]
    fn test_distribute_droplet() {
        let (mut handler, sim) = ready();
        handler.prepare_droplet(&two_components()).unwrap();
        sim.log().clear();
        let spec = DistributeSpec {
            destinations: vec![
                Destination {
                    location: sample("C1"),
                    volume_ul: 25.0,
                    free_dispense: true,
                },
                Destination {
                    location: sample("C2"),
                    volume_ul: 25.0,
                    free_dispense: false,
                },
            ],
            front_air_gap_ul: 5.0,
            air_rate_ml_min: None,
            dispense_rate_ml_min: None,
            dip: None,
            dab: None,
            tip_exit: TipExit::Center,
        };
        assert_eq!(handler.distribute_droplet(&spec).unwrap(), 50.0);
        assert_eq!(
            strokes(&sim),
            vec!["PN:-5:1", "PN:-25:1", "PN:-25:1", "PN:5:1"]
        );
        assert_eq!(handler.tracker().content_ul, 15.0);
    }

    fn pooled_vial() -> VialSpec {
        VialSpec {
            components: two_components().components,
            destination: sample("C1"),
            back_air_gap_ul: 10.0,
            blowout_ul: 0.0,
            air_rate_ml_min: None,
            aspirate_rate_ml_min: None,
            mix_displacement_ul: -1.0,
            mix_rate_ml_min: None,
            mix_cycles: 1,
            mix_each: false,
            dip: None,
            dab: None,
            tip_exit: TipExit::Center,
            free_dispense: false,
        }
    }

    #[test]
    fn test_prepare_vial_mixes_at_end() {
        let (mut handler, sim) = ready();
        assert_eq!(handler.prepare_vial(&pooled_vial()).unwrap(), 50.0);
        assert_eq!(
            strokes(&sim),
            vec!["PN:10:1", "PN:20:1", "PN:-20:1", "PN:30:1", "PN:-30:1", "PN:50:1", "PN:-50:1"]
        );
        // only the back air gap stays in the line
        assert_eq!(handler.tracker().content_ul, 10.0);

        let log = sim.log().buffered();
        let mix = log.iter().position(|c| c == "PN:50:1").unwrap();
        let last_xy = log[..mix].iter().rev().find(|c| c.starts_with('X'));
        assert_eq!(last_xy.map(String::as_str), Some("X8:50/45.6:50"));
    }

    #[test]
    fn test_prepare_vial_mixes_each_addition() {
        let (mut handler, sim) = ready();
        let spec = VialSpec {
            mix_each: true,
            blowout_ul: 5.0,
            ..pooled_vial()
        };
        handler.prepare_vial(&spec).unwrap();
        assert_eq!(
            strokes(&sim),
            vec![
                "PN:10:1", "PN:20:1", "PN:-20:1", "PN:5:1", "PN:20:1", "PN:-20:1", "PN:-5:1",
                "PN:30:1", "PN:-30:1", "PN:5:1", "PN:50:1", "PN:-50:1", "PN:-5:1"
            ]
        );
    }

    #[test]
    fn test_prepare_vial_without_components_sends_nothing() {
        let (mut handler, sim) = ready();
        let spec = VialSpec {
            components: vec![],
            ..pooled_vial()
        };
        assert!(matches!(handler.prepare_vial(&spec), Err(Error::Volume(_))));
        assert!(sim.log().is_empty());
    }

    #[test]
    fn test_center_droplet_measures_between_strokes() {
        let (mut handler, sim) = ready();
        handler.aspirate_air(&AirGap::new(20.0)).unwrap();
        sim.log().clear();
        let reading = handler.center_droplet(10.0, || 42).unwrap();
        assert_eq!(reading, 42);
        assert_eq!(sim.log().buffered(), vec!["PN:10:0.5", "PN:-10:0.5"]);
        assert_eq!(handler.tracker().content_ul, 20.0);
    }
}
