//! Racks: rectangular grids of vial slots (`*.rak` + `{rack}_vials/`)
//!
//! Row `A` sits at the rack origin and rows advance along +Y; columns
//! advance along +X. Every Z reference a slot exposes is derived from the
//! rack base height plus the vial geometry:
//!
//! ```text
//! travel_z   = max(base_z + tallest vial, travel_z_height) + 5
//! access_z   = base_z + access_height + 1
//! transfer_z = base_z + base_offset + 1
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use ampoule_protocol::Axis;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::placeable::Location;
use super::point::Point2D;
use super::vial::Vial;
use super::well::{row_letters, WellId};
use crate::error::{Error, Result};

/// Clearance added above the tallest thing in a rack for travel
pub const TRAVEL_Z_OFFSET: f64 = 5.0;

/// Clearance added to access and transfer heights
pub const PIPETTE_Z_OFFSET: f64 = 1.0;

/// Outer diameter of the needle cannula
pub const CANNULA_DIAMETER_MM: f64 = 1.44;

/// Extension of rack descriptor files
pub const RACK_EXTENSION: &str = "rak";

/// Extension of vial descriptor files
pub const VIAL_EXTENSION: &str = "vil";

/// On-disk rack descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RackDescriptor {
    pub origin_x: f64,
    pub origin_y: f64,
    pub rack_pos_x_spacing: f64,
    pub rack_pos_y_spacing: f64,
    pub num_rows: u32,
    pub num_cols: u32,
    pub base_z_height: f64,
    pub travel_z_height: f64,
    #[serde(default)]
    pub meta_data: Option<serde_json::Value>,
}

/// A grid of vial slots anchored at an origin
#[derive(Debug, Clone, PartialEq)]
pub struct Rack {
    /// Center of slot A1
    origin: Point2D,
    /// Center-to-center distance (column step in X, row step in Y)
    spacing: Point2D,
    num_rows: u32,
    num_cols: u32,
    /// Height the vials rest on
    base_z_height: f64,
    /// Highest point of the empty rack
    travel_z_height: f64,
    meta_data: Option<serde_json::Value>,
    vials: BTreeMap<WellId, Vial>,
}

impl Rack {
    /// Create an empty rack
    pub fn new(
        origin: Point2D,
        spacing: Point2D,
        num_rows: u32,
        num_cols: u32,
        base_z_height: f64,
        travel_z_height: f64,
    ) -> Self {
        Self {
            origin,
            spacing,
            num_rows,
            num_cols,
            base_z_height,
            travel_z_height,
            meta_data: None,
            vials: BTreeMap::new(),
        }
    }

    /// Create an empty rack from its descriptor
    pub fn from_descriptor(desc: RackDescriptor) -> Self {
        Self {
            origin: Point2D::new(desc.origin_x, desc.origin_y),
            spacing: Point2D::new(desc.rack_pos_x_spacing, desc.rack_pos_y_spacing),
            num_rows: desc.num_rows,
            num_cols: desc.num_cols,
            base_z_height: desc.base_z_height,
            travel_z_height: desc.travel_z_height,
            meta_data: desc.meta_data,
            vials: BTreeMap::new(),
        }
    }

    /// Descriptor for this rack (vials excluded)
    pub fn descriptor(&self) -> RackDescriptor {
        RackDescriptor {
            origin_x: self.origin.x,
            origin_y: self.origin.y,
            rack_pos_x_spacing: self.spacing.x,
            rack_pos_y_spacing: self.spacing.y,
            num_rows: self.num_rows,
            num_cols: self.num_cols,
            base_z_height: self.base_z_height,
            travel_z_height: self.travel_z_height,
            meta_data: self.meta_data.clone(),
        }
    }

    /// Load `{name}.rak` from `dir` together with `{name}_vials/`
    ///
    /// Vial files with an unexpected name or an address outside the grid are
    /// skipped with a warning.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(format!("{name}.{RACK_EXTENSION}"));
        let text = std::fs::read_to_string(&path)?;
        let desc: RackDescriptor = serde_json::from_str(&text)
            .map_err(|e| Error::descriptor(path.display().to_string(), e))?;
        let mut rack = Rack::from_descriptor(desc);

        let vial_dir = dir.join(format!("{name}_vials"));
        if !vial_dir.is_dir() {
            debug!("Rack {name} has no vial directory");
            return Ok(rack);
        }

        let mut entries: Vec<_> = std::fs::read_dir(&vial_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        entries.sort();

        for file in entries {
            let Some(file_name) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(address) = vial_file_address(file_name) else {
                if file_name.to_ascii_lowercase().ends_with(".vil") {
                    warn!(
                        "Vial file '{file_name}' is not named 'vial_<ADDRESS>.vil', ignoring"
                    );
                }
                continue;
            };
            let well = match address.parse::<WellId>() {
                Ok(well) => well,
                Err(_) => {
                    warn!("Vial file '{file_name}' has an invalid address, ignoring");
                    continue;
                }
            };
            if let Err(e) = rack.check_grid(well) {
                warn!("Vial {well} of rack {name} is outside the grid ({e}), ignoring");
                continue;
            }
            let vial = Vial::load(&file)?;
            rack.vials.insert(well, vial);
        }
        debug!("Rack {name}: {} vials loaded", rack.vials.len());
        Ok(rack)
    }

    /// Write `{name}.rak` and one file per vial into `dir`
    pub fn save(&self, dir: &Path, name: &str) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.{RACK_EXTENSION}"));
        let text = serde_json::to_string_pretty(&self.descriptor())
            .map_err(|e| Error::descriptor(path.display().to_string(), e))?;
        std::fs::write(&path, text)?;

        let vial_dir = dir.join(format!("{name}_vials"));
        std::fs::create_dir_all(&vial_dir)?;
        for (well, vial) in &self.vials {
            vial.save(&vial_dir.join(format!("vial_{well}.{VIAL_EXTENSION}")))?;
        }
        Ok(())
    }

    pub fn origin(&self) -> Point2D {
        self.origin
    }

    pub fn spacing(&self) -> Point2D {
        self.spacing
    }

    pub fn num_rows(&self) -> u32 {
        self.num_rows
    }

    pub fn num_cols(&self) -> u32 {
        self.num_cols
    }

    pub fn base_z_height(&self) -> f64 {
        self.base_z_height
    }

    /// Declared travel height of the empty rack
    pub fn travel_z_height(&self) -> f64 {
        self.travel_z_height
    }

    pub fn meta_data(&self) -> Option<&serde_json::Value> {
        self.meta_data.as_ref()
    }

    /// Occupied slots in row-major order
    pub fn vials(&self) -> impl Iterator<Item = (&WellId, &Vial)> {
        self.vials.iter()
    }

    /// Reject addresses outside the declared grid
    pub fn check_grid(&self, well: WellId) -> Result<()> {
        if well.row() > self.num_rows {
            return Err(Error::OutOfBounds {
                axis: Axis::Y,
                value: well.row() as f64,
                min: 1.0,
                max: self.num_rows as f64,
            });
        }
        if well.col() > self.num_cols {
            return Err(Error::OutOfBounds {
                axis: Axis::X,
                value: well.col() as f64,
                min: 1.0,
                max: self.num_cols as f64,
            });
        }
        Ok(())
    }

    /// Vial in a slot
    pub fn vial(&self, well: WellId) -> Result<&Vial> {
        self.check_grid(well)?;
        self.vials
            .get(&well)
            .ok_or_else(|| Error::ResourceNotFound(format!("vial {well}")))
    }

    /// Put a vial in a slot, returning the one it replaces
    pub fn place_vial(&mut self, well: WellId, vial: Vial) -> Result<Option<Vial>> {
        self.check_grid(well)?;
        vial.validate()
            .map_err(|reason| Error::descriptor(format!("vial {well}"), reason))?;
        Ok(self.vials.insert(well, vial))
    }

    /// Empty a slot
    pub fn remove_vial(&mut self, well: WellId) -> Option<Vial> {
        self.vials.remove(&well)
    }

    /// Safe travel height over this rack in its current state
    pub fn travel_z(&self) -> f64 {
        let tallest = self
            .vials
            .values()
            .map(|v| v.access_height)
            .fold(0.0, f64::max);
        (self.base_z_height + tallest).max(self.travel_z_height) + TRAVEL_Z_OFFSET
    }

    /// Center of a slot
    pub fn center(&self, well: WellId) -> Result<Point2D> {
        self.vial(well)?;
        let offset = Point2D::new(
            (well.col() - 1) as f64 * self.spacing.x,
            (well.row() - 1) as f64 * self.spacing.y,
        );
        Ok(self.origin + offset)
    }

    /// Height just above the rim of a vial
    pub fn access_z(&self, well: WellId) -> Result<f64> {
        let vial = self.vial(well)?;
        Ok(self.base_z_height + vial.access_height + PIPETTE_Z_OFFSET)
    }

    /// Height just above the bottom of a vial
    pub fn transfer_z(&self, well: WellId) -> Result<f64> {
        let vial = self.vial(well)?;
        Ok(self.base_z_height + vial.base_offset + PIPETTE_Z_OFFSET)
    }

    /// Middle of the rack footprint
    pub fn rack_center(&self) -> Point2D {
        self.origin
            + Point2D::new(
                self.num_cols as f64 * self.spacing.x,
                self.num_rows as f64 * self.spacing.y,
            ) / 2.0
    }

    /// Inner wall point of a vial on the side facing the rack center (Y only)
    pub fn edge(&self, well: WellId) -> Result<Point2D> {
        let center = self.center(well)?;
        let vial = self.vial(well)?;
        let reach = (vial.access_diameter / 2.0 - CANNULA_DIAMETER_MM / 2.0 + 0.5).trunc();
        let offset = Point2D::new(0.0, reach);
        if center.y > self.rack_center().y {
            Ok(center - offset)
        } else {
            Ok(center + offset)
        }
    }

    /// All references for one slot
    pub fn locate(&self, well: WellId) -> Result<Location> {
        Ok(Location {
            center: self.center(well)?,
            edge: self.edge(well)?,
            travel_z: self.travel_z(),
            access_z: self.access_z(well)?,
            transfer_z: self.transfer_z(well)?,
        })
    }

    /// ASCII grid of occupied (`o`) and empty (`.`) slots
    pub fn occupancy_map(&self) -> String {
        let row_width = row_letters(self.num_rows.max(1)).len();
        let col_width = self.num_cols.max(1).to_string().len() + 1;
        let mut out = String::new();

        let _ = write!(out, "{:row_width$}", "");
        for col in 1..=self.num_cols {
            let _ = write!(out, "{col:>col_width$}");
        }
        out.push('\n');

        for row in 1..=self.num_rows {
            let _ = write!(out, "{:<row_width$}", row_letters(row));
            for col in 1..=self.num_cols {
                let occupied = WellId::new(row, col)
                    .map(|w| self.vials.contains_key(&w))
                    .unwrap_or(false);
                let mark = if occupied { 'o' } else { '.' };
                let _ = write!(out, "{mark:>col_width$}");
            }
            out.push('\n');
        }
        out
    }
}

/// Address part of `vial_{ADDRESS}.vil` (case-insensitive)
fn vial_file_address(file_name: &str) -> Option<&str> {
    let lower = file_name.to_ascii_lowercase();
    if !lower.starts_with("vial_") || !lower.ends_with(".vil") {
        return None;
    }
    let address = &file_name[5..file_name.len() - 4];
    (!address.is_empty() && address.chars().all(|c| c.is_ascii_alphanumeric())).then_some(address)
}
