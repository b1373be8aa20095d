//! Handler configuration
//!
//! Every field has a default, so a configuration file only needs the values
//! that differ from a stock GX-241 with a 1 mL syringe.

use ampoule_protocol::DeviceKind;
use serde::{Deserialize, Serialize};

use crate::deck::Placeable;

/// Bus ids of the three devices
///
/// Each must match the id dial on the unit. A mismatch is not detectable:
/// the device simply never answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIds {
    pub arm: u8,
    pub pump: u8,
    pub injector: u8,
}

impl Default for DeviceIds {
    fn default() -> Self {
        Self {
            arm: DeviceKind::Arm.default_id(),
            pump: DeviceKind::Pump.default_id(),
            injector: DeviceKind::Injector.default_id(),
        }
    }
}

impl DeviceIds {
    pub fn get(&self, kind: DeviceKind) -> u8 {
        match kind {
            DeviceKind::Arm => self.arm,
            DeviceKind::Pump => self.pump,
            DeviceKind::Injector => self.injector,
        }
    }

    pub fn set(&mut self, kind: DeviceKind, id: u8) {
        match kind {
            DeviceKind::Arm => self.arm = id,
            DeviceKind::Pump => self.pump = id,
            DeviceKind::Injector => self.injector = id,
        }
    }
}

/// Arm speeds used for one motion sequence (mm/s)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmSpeeds {
    pub xy: f64,
    pub z: f64,
}

impl Default for ArmSpeeds {
    fn default() -> Self {
        Self { xy: 50.0, z: 25.0 }
    }
}

/// Liquid handling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Syringe capacity (uL)
    pub max_syringe_volume_ul: f64,
    /// Air gap kept between the system fluid and the sample (uL)
    pub system_air_gap_ul: f64,
    /// Flow rate for ordinary strokes (mL/min)
    pub default_flow_rate_ml_min: f64,
    /// Flow rate for priming (mL/min)
    pub priming_flow_rate_ml_min: f64,
    pub xy_speed_mm_s: f64,
    pub z_speed_mm_s: f64,
    /// Fraction of the center-to-edge vector travelled on a tip touch
    pub touch_fraction: f64,
    pub home_pump_on_startup: bool,
    pub home_arm_on_startup: bool,
    /// Where priming and emptying dispense to
    pub waste: Placeable,
    /// Longest wait for a device to finish a buffered command (ms)
    pub settle_timeout_ms: u64,
    /// Interval between settle polls (ms)
    pub settle_poll_ms: u64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            max_syringe_volume_ul: 1000.0,
            system_air_gap_ul: 20.0,
            default_flow_rate_ml_min: 1.0,
            priming_flow_rate_ml_min: 5.0,
            xy_speed_mm_s: 50.0,
            z_speed_mm_s: 25.0,
            touch_fraction: 1.0,
            home_pump_on_startup: false,
            home_arm_on_startup: true,
            waste: Placeable::xyz(100.0, 100.0, 90.0),
            settle_timeout_ms: 60_000,
            settle_poll_ms: 50,
        }
    }
}

impl HandlerConfig {
    /// Speeds from the configured defaults
    pub fn speeds(&self) -> ArmSpeeds {
        ArmSpeeds {
            xy: self.xy_speed_mm_s,
            z: self.z_speed_mm_s,
        }
    }

    /// Check values that would make every operation fail
    pub fn validate(&self) -> Result<(), String> {
        let positive = [
            ("max_syringe_volume_ul", self.max_syringe_volume_ul),
            ("default_flow_rate_ml_min", self.default_flow_rate_ml_min),
            ("priming_flow_rate_ml_min", self.priming_flow_rate_ml_min),
            ("xy_speed_mm_s", self.xy_speed_mm_s),
            ("z_speed_mm_s", self.z_speed_mm_s),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{name} must be positive, got {value}"));
            }
        }
        if !(0.0..=self.max_syringe_volume_ul).contains(&self.system_air_gap_ul) {
            return Err(format!(
                "system_air_gap_ul {} must lie within the syringe capacity",
                self.system_air_gap_ul
            ));
        }
        if !(0.0..=1.0).contains(&self.touch_fraction) {
            return Err(format!(
                "touch_fraction {} must lie within [0, 1]",
                self.touch_fraction
            ));
        }
        if self.settle_poll_ms == 0 {
            return Err("settle_poll_ms must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HandlerConfig::default();
        assert_eq!(config.max_syringe_volume_ul, 1000.0);
        assert_eq!(config.speeds(), ArmSpeeds { xy: 50.0, z: 25.0 });
        assert!(config.validate().is_ok());
        assert_eq!(DeviceIds::default(), DeviceIds { arm: 30, pump: 2, injector: 6 });
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: HandlerConfig =
            serde_json::from_str(r#"{"touch_fraction": 0.5, "home_pump_on_startup": true}"#)
                .unwrap();
        assert_eq!(config.touch_fraction, 0.5);
        assert!(config.home_pump_on_startup);
        assert_eq!(config.system_air_gap_ul, 20.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = HandlerConfig {
            touch_fraction: 1.5,
            ..HandlerConfig::default()
        };
        assert!(config.validate().is_err());
        let config = HandlerConfig {
            z_speed_mm_s: 0.0,
            ..HandlerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_ids_are_mutable() {
        let mut ids = DeviceIds::default();
        ids.set(DeviceKind::Pump, 4);
        assert_eq!(ids.get(DeviceKind::Pump), 4);
        assert_eq!(ids.get(DeviceKind::Arm), 30);
    }
}
