//! Operation parameter sets
//!
//! These are plain data, deserializable so that chains can carry them. Flow
//! rates left out fall back to the configured default.

use serde::{Deserialize, Serialize};

use crate::deck::Placeable;

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

/// How the needle leaves a vial after a stroke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipExit {
    /// Straight up to the access height
    #[default]
    Center,
    /// Up to just below the rim, touch the wall, back to center, up
    TipTouch,
    /// Slide to the wall, up, back to center
    Drag,
    /// Leave the needle where it is
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspirateSpec {
    pub location: Placeable,
    pub volume_ul: f64,
    #[serde(default)]
    pub flow_rate_ml_min: Option<f64>,
    #[serde(default)]
    pub tip_exit: TipExit,
}

impl AspirateSpec {
    pub fn new(location: Placeable, volume_ul: f64) -> Self {
        Self {
            location,
            volume_ul,
            flow_rate_ml_min: None,
            tip_exit: TipExit::Center,
        }
    }

    pub fn at_rate(mut self, rate: f64) -> Self {
        self.flow_rate_ml_min = Some(rate);
        self
    }

    pub fn exit(mut self, tip_exit: TipExit) -> Self {
        self.tip_exit = tip_exit;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispenseSpec {
    pub location: Placeable,
    pub volume_ul: f64,
    #[serde(default)]
    pub flow_rate_ml_min: Option<f64>,
    #[serde(default)]
    pub tip_exit: TipExit,
    /// Dispense from the access height instead of the transfer height
    #[serde(default)]
    pub free_dispense: bool,
    /// Go to the edge point instead of the center
    #[serde(default)]
    pub on_edge: bool,
}

impl DispenseSpec {
    pub fn new(location: Placeable, volume_ul: f64) -> Self {
        Self {
            location,
            volume_ul,
            flow_rate_ml_min: None,
            tip_exit: TipExit::Center,
            free_dispense: false,
            on_edge: false,
        }
    }

    pub fn at_rate(mut self, rate: f64) -> Self {
        self.flow_rate_ml_min = Some(rate);
        self
    }

    pub fn exit(mut self, tip_exit: TipExit) -> Self {
        self.tip_exit = tip_exit;
        self
    }

    pub fn free(mut self, free_dispense: bool) -> Self {
        self.free_dispense = free_dispense;
        self
    }
}

/// Empty the syringe by homing the pump over a place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispenseAllSpec {
    pub location: Placeable,
    #[serde(default)]
    pub tip_exit: TipExit,
    #[serde(default)]
    pub free_dispense: bool,
    #[serde(default)]
    pub on_edge: bool,
}

/// Air drawn or expelled at the top of travel or above a place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirGap {
    pub volume_ul: f64,
    /// Above this place (access height) instead of at the bed's top Z
    #[serde(default)]
    pub location: Option<Placeable>,
    #[serde(default)]
    pub flow_rate_ml_min: Option<f64>,
}

impl AirGap {
    pub fn new(volume_ul: f64) -> Self {
        Self {
            volume_ul,
            location: None,
            flow_rate_ml_min: None,
        }
    }

    pub fn at_rate(mut self, rate: Option<f64>) -> Self {
        self.flow_rate_ml_min = rate;
        self
    }
}

/// Repeated aspirate/dispense in place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixSpec {
    pub displacement_ul: f64,
    #[serde(default)]
    pub flow_rate_ml_min: Option<f64>,
    #[serde(default = "one")]
    pub cycles: u32,
    /// Mix inside this place; mixes air at the bed's top Z when absent
    #[serde(default)]
    pub location: Option<Placeable>,
    #[serde(default)]
    pub tip_exit: TipExit,
    /// Air drawn before and expelled after mixing (uL)
    #[serde(default)]
    pub blowout_ul: f64,
}

/// Mix inside a wash place (internal wash of the needle)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalWashSpec {
    pub displacement_ul: f64,
    pub location: Placeable,
    #[serde(default = "one")]
    pub cycles: u32,
    #[serde(default)]
    pub flow_rate_ml_min: Option<f64>,
    #[serde(default)]
    pub blowout_ul: f64,
    #[serde(default)]
    pub tip_exit: TipExit,
}

impl InternalWashSpec {
    pub fn to_mix(&self) -> MixSpec {
        MixSpec {
            displacement_ul: self.displacement_ul,
            flow_rate_ml_min: self.flow_rate_ml_min,
            cycles: self.cycles,
            location: Some(self.location.clone()),
            tip_exit: self.tip_exit,
            blowout_ul: self.blowout_ul,
        }
    }
}

/// Dip the needle into one or more places to clean its outside
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WashSpec {
    pub positions: Vec<Placeable>,
    #[serde(default = "one")]
    pub cycles: u32,
    #[serde(default)]
    pub tip_exit: TipExit,
    /// Protective air gap drawn before each place and expelled after it,
    /// above that place unless the gap names its own location
    #[serde(default)]
    pub air_gap: Option<AirGap>,
}

/// Flush system fluid through the needle into a place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanSpec {
    pub volume_ul: f64,
    pub location: Placeable,
    #[serde(default = "one")]
    pub cycles: u32,
    #[serde(default)]
    pub flow_rate_ml_min: Option<f64>,
    #[serde(default)]
    pub free_dispense: bool,
    #[serde(default)]
    pub on_edge: bool,
    /// Home the pump before flushing
    #[serde(default = "yes")]
    pub pre_flush: bool,
    #[serde(default)]
    pub tip_exit: TipExit,
}

/// One ingredient of a droplet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub location: Placeable,
    /// Zero and negative volumes are skipped
    pub volume_ul: f64,
}

/// Build a mixed droplet in the liquid line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropletSpec {
    pub components: Vec<Component>,
    /// Air between the system fluid and the droplet
    pub back_air_gap_ul: f64,
    /// Air at the needle end of the droplet
    pub front_air_gap_ul: f64,
    #[serde(default)]
    pub air_rate_ml_min: Option<f64>,
    #[serde(default)]
    pub aspirate_rate_ml_min: Option<f64>,
    /// Mix stroke; a negative value is a multiple of the droplet volume
    #[serde(default)]
    pub mix_displacement_ul: f64,
    #[serde(default)]
    pub mix_rate_ml_min: Option<f64>,
    #[serde(default)]
    pub mix_cycles: u32,
    /// Outside wash between components
    #[serde(default)]
    pub dip: Option<WashSpec>,
    /// Tip dab between components
    #[serde(default)]
    pub dab: Option<WashSpec>,
    #[serde(default)]
    pub tip_exit: TipExit,
    /// Dispensed into each source before aspirating from it (uL)
    #[serde(default)]
    pub backlash_ul: f64,
}

/// Pool several sources into one destination vial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VialSpec {
    pub components: Vec<Component>,
    pub destination: Placeable,
    /// Air protecting the system fluid, drawn once before the first source
    #[serde(default)]
    pub back_air_gap_ul: f64,
    /// Air drawn before each mix and expelled after it (uL)
    #[serde(default)]
    pub blowout_ul: f64,
    #[serde(default)]
    pub air_rate_ml_min: Option<f64>,
    /// Rate for both drawing a source and adding it to the destination
    #[serde(default)]
    pub aspirate_rate_ml_min: Option<f64>,
    /// Mix stroke; a negative value is a multiple of the volume pooled so far
    #[serde(default)]
    pub mix_displacement_ul: f64,
    #[serde(default)]
    pub mix_rate_ml_min: Option<f64>,
    #[serde(default)]
    pub mix_cycles: u32,
    /// Mix after every addition instead of only after the last
    #[serde(default)]
    pub mix_each: bool,
    /// Outside wash between sources
    #[serde(default)]
    pub dip: Option<WashSpec>,
    #[serde(default)]
    pub dab: Option<WashSpec>,
    #[serde(default)]
    pub tip_exit: TipExit,
    #[serde(default)]
    pub free_dispense: bool,
}

/// One target of a droplet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub location: Placeable,
    /// Zero and negative volumes are skipped
    pub volume_ul: f64,
    #[serde(default)]
    pub free_dispense: bool,
}

/// Split the droplet in the needle across destinations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributeSpec {
    pub destinations: Vec<Destination>,
    pub front_air_gap_ul: f64,
    #[serde(default)]
    pub air_rate_ml_min: Option<f64>,
    #[serde(default)]
    pub dispense_rate_ml_min: Option<f64>,
    #[serde(default)]
    pub dip: Option<WashSpec>,
    #[serde(default)]
    pub dab: Option<WashSpec>,
    #[serde(default)]
    pub tip_exit: TipExit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tip_exit_names() {
        let exit: TipExit = serde_json::from_str("\"tip_touch\"").unwrap();
        assert_eq!(exit, TipExit::TipTouch);
        assert_eq!(serde_json::to_string(&TipExit::None).unwrap(), "\"none\"");
    }

    #[test]
    fn test_clean_defaults() {
        let spec: CleanSpec = serde_json::from_str(
            r#"{"volume_ul": 200, "location": {"kind": "named", "rack": "wash", "well": "A1"}}"#,
        )
        .unwrap();
        assert_eq!(spec.cycles, 1);
        assert!(spec.pre_flush);
        assert!(!spec.free_dispense);
        assert_eq!(spec.tip_exit, TipExit::Center);
    }

    #[test]
    fn test_internal_wash_is_located_mix() {
        let spec = InternalWashSpec {
            displacement_ul: 100.0,
            location: Placeable::named("wash", "A1"),
            cycles: 3,
            flow_rate_ml_min: None,
            blowout_ul: 0.0,
            tip_exit: TipExit::Drag,
        };
        let mix = spec.to_mix();
        assert_eq!(mix.location, Some(Placeable::named("wash", "A1")));
        assert_eq!(mix.cycles, 3);
        assert_eq!(mix.tip_exit, TipExit::Drag);
    }
}
