//! Vial geometry descriptors (`vial_{ADDRESS}.vil`)

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A vessel the needle can reach, dimensions in mm
///
/// Immutable once loaded: swapping a vial replaces the whole descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vial {
    /// Height of the rim above the rack base
    pub access_height: f64,
    /// Thickness of the vial bottom
    pub base_offset: f64,
    /// Height that determines the internal volume
    pub volumetric_height: f64,
    /// Inner diameter that determines the internal volume
    pub volumetric_diameter: f64,
    /// Narrowest inner diameter the needle passes through
    pub access_diameter: f64,
    /// Free-form operator data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<serde_json::Value>,
}

impl Vial {
    /// Build a vial without metadata, checking its invariants
    pub fn new(
        access_height: f64,
        base_offset: f64,
        volumetric_height: f64,
        volumetric_diameter: f64,
        access_diameter: f64,
    ) -> Result<Self> {
        let vial = Self {
            access_height,
            base_offset,
            volumetric_height,
            volumetric_diameter,
            access_diameter,
            meta_data: None,
        };
        vial.validate().map_err(|reason| Error::descriptor("vial", reason))?;
        Ok(vial)
    }

    /// Check the geometric invariants
    pub fn validate(&self) -> core::result::Result<(), String> {
        let fields = [
            ("access_height", self.access_height),
            ("base_offset", self.base_offset),
            ("volumetric_height", self.volumetric_height),
            ("volumetric_diameter", self.volumetric_diameter),
            ("access_diameter", self.access_diameter),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be a non-negative number, got {value}"));
            }
        }
        if self.volumetric_height > self.access_height {
            return Err(format!(
                "volumetric_height {} exceeds access_height {}",
                self.volumetric_height, self.access_height
            ));
        }
        Ok(())
    }

    /// Load and validate a descriptor file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let vial: Vial = serde_json::from_str(&text)
            .map_err(|e| Error::descriptor(path.display().to_string(), e))?;
        vial.validate()
            .map_err(|reason| Error::descriptor(path.display().to_string(), reason))?;
        Ok(vial)
    }

    /// Write the descriptor as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| Error::descriptor(path.display().to_string(), e))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
