//! Configuration file loading
//!
//! `ampoule.toml` has four optional sections:
//!
//! ```toml
//! [serial]
//! port = "AUTO"            # or "/dev/ttyUSB0", "COM3"
//! device_name = "Prolific PL2303GS USB Serial COM Port"
//! timeout_ms = 1000
//!
//! [devices]
//! arm = 30
//! pump = 2
//! injector = 6
//!
//! [handler]
//! max_syringe_volume_ul = 1000
//! default_flow_rate_ml_min = 1.0
//!
//! [bed]
//! directory = "deck"
//! resource_file = "resources_cfg.json"
//! ```

use std::path::{Path, PathBuf};

use ampoule_core::deck::resources::RESOURCE_FILE;
use ampoule_core::deck::HandlerBed;
use ampoule_core::safety::BedBounds;
use ampoule_core::{DeviceIds, HandlerConfig};
use ampoule_drivers::SerialSettings;
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Configuration file used when `--config` is not given
pub const DEFAULT_CONFIG: &str = "ampoule.toml";

/// `[bed]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BedSettings {
    /// Directory holding the bed, rack and vial descriptors
    pub directory: Option<PathBuf>,
    /// Bed descriptor inside `directory`; the only `*.bed` file otherwise
    pub bed_file: Option<String>,
    pub resource_file: String,
}

impl Default for BedSettings {
    fn default() -> Self {
        Self {
            directory: None,
            bed_file: None,
            resource_file: RESOURCE_FILE.to_owned(),
        }
    }
}

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub serial: SerialSettings,
    pub devices: DeviceIds,
    pub handler: HandlerConfig,
    pub bed: BedSettings,
}

impl AppConfig {
    /// Load `path`
    ///
    /// A missing default file yields the built-in defaults; a missing file
    /// named explicitly is an error.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        if !path.exists() && !explicit {
            warn!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = Self::parse(&text).with_context(|| format!("parsing {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config
            .handler
            .validate()
            .map_err(|reason| anyhow::anyhow!("[handler] {reason}"))?;
        Ok(config)
    }

    /// Load the configured bed, or an empty default bed
    pub fn load_bed(&self) -> Result<HandlerBed> {
        match &self.bed.directory {
            Some(dir) => HandlerBed::load_with(
                dir,
                self.bed.bed_file.as_deref(),
                &self.bed.resource_file,
            )
            .with_context(|| format!("loading bed from {}", dir.display())),
            None => {
                info!("No bed directory configured, using an empty GX-241 bed");
                Ok(HandlerBed::new(BedBounds::default()))
            }
        }
    }

    /// One-screen summary for the log
    pub fn log_summary(&self) {
        info!(
            "Serial: port {} ({:?}), timeout {} ms",
            self.serial.port, self.serial.device_name, self.serial.timeout_ms
        );
        info!(
            "Devices: arm {}, pump {}, injector {}",
            self.devices.arm, self.devices.pump, self.devices.injector
        );
        info!(
            "Handler: syringe {} uL, air gap {} uL, flow {} mL/min (priming {})",
            self.handler.max_syringe_volume_ul,
            self.handler.system_air_gap_ul,
            self.handler.default_flow_rate_ml_min,
            self.handler.priming_flow_rate_ml_min
        );
        match &self.bed.directory {
            Some(dir) => info!("Bed: {}", dir.display()),
            None => info!("Bed: none"),
        }
    }
}
