//! The handler bed: bounds, racks and resources
//!
//! A bed directory holds one `*.bed` file, any number of `*.rak` files with
//! their `{rack}_vials/` folders, and the resource file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::placeable::{Location, Placeable};
use super::point::Point2D;
use super::rack::{Rack, RACK_EXTENSION};
use super::resources::{ResourceStore, RESOURCE_FILE};
use super::well::WellId;
use crate::error::{Error, Result};
use crate::safety::BedBounds;

/// Bed descriptor extension
pub const BED_EXTENSION: &str = "bed";

/// Resource key holding the system fluid left in the reservoir (mL)
pub const FLUID_VOLUME_KEY: &str = "system_fluid_volume_mL";

/// Resource key prefix for persisted shifting-group cursors
pub const CURSOR_KEY_PREFIX: &str = "shifting_cursor.";

/// On-disk bed descriptor; unknown keys are kept as metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BedDescriptor {
    #[serde(flatten)]
    bounds: BedBounds,
    #[serde(flatten)]
    meta: Map<String, Value>,
}

/// The handler platform and everything placed on it
#[derive(Debug)]
pub struct HandlerBed {
    bounds: BedBounds,
    meta: Map<String, Value>,
    racks: BTreeMap<String, Rack>,
    resources: ResourceStore,
    directory: Option<PathBuf>,
}

impl HandlerBed {
    /// Empty bed with an in-memory resource map
    pub fn new(bounds: BedBounds) -> Self {
        Self {
            bounds,
            meta: Map::new(),
            racks: BTreeMap::new(),
            resources: ResourceStore::in_memory(),
            directory: None,
        }
    }

    /// Replace the resource store
    pub fn with_resources(mut self, resources: ResourceStore) -> Self {
        self.resources = resources;
        self
    }

    /// Load a bed directory using the first `*.bed` file found and the
    /// default resource file name
    pub fn load(dir: &Path) -> Result<Self> {
        Self::load_with(dir, None, RESOURCE_FILE)
    }

    /// Load a bed directory with an explicit bed file and resource file
    pub fn load_with(dir: &Path, bed_file: Option<&str>, resource_file: &str) -> Result<Self> {
        let bed_path = match bed_file {
            Some(name) => dir.join(name),
            None => find_bed_file(dir)?,
        };
        let text = std::fs::read_to_string(&bed_path)?;
        let desc: BedDescriptor = serde_json::from_str(&text)
            .map_err(|e| Error::descriptor(bed_path.display().to_string(), e))?;

        let resources = ResourceStore::open(dir.join(resource_file))?;
        let mut bed = HandlerBed::new(desc.bounds).with_resources(resources);
        bed.meta = desc.meta;
        bed.directory = Some(dir.to_path_buf());

        for name in rack_names(dir)? {
            let rack = Rack::load(dir, &name)?;
            bed.insert_rack(name, rack);
        }

        info!(
            "Bed loaded from {}: X {:?} Y {:?} Z {:?}, {} racks",
            dir.display(),
            [bed.bounds.x.min, bed.bounds.x.max],
            [bed.bounds.y.min, bed.bounds.y.max],
            [bed.bounds.z.min, bed.bounds.z.max],
            bed.racks.len()
        );
        Ok(bed)
    }

    /// Write the bed file and every rack into `dir`
    pub fn save(&self, dir: &Path, bed_file: &str) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let file_name = if bed_file.ends_with(&format!(".{BED_EXTENSION}")) {
            bed_file.to_owned()
        } else {
            format!("{bed_file}.{BED_EXTENSION}")
        };
        let path = dir.join(file_name);
        let desc = BedDescriptor {
            bounds: self.bounds,
            meta: self.meta.clone(),
        };
        let text = serde_json::to_string_pretty(&desc)
            .map_err(|e| Error::descriptor(path.display().to_string(), e))?;
        std::fs::write(&path, text)?;

        for (name, rack) in &self.racks {
            rack.save(dir, name)?;
        }
        Ok(())
    }

    pub fn bounds(&self) -> &BedBounds {
        &self.bounds
    }

    /// Directory the bed was loaded from
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Add or replace a rack; warns when its origin or travel height lies
    /// outside the bed
    pub fn insert_rack(&mut self, name: impl Into<String>, rack: Rack) -> Option<Rack> {
        let name = name.into();
        let anchor = rack.origin().with_z(rack.travel_z_height());
        if !self.bounds.contains(anchor) {
            warn!(
                "Rack {name} may not be compatible with the bed: {anchor} is outside \
                 X {:?} Y {:?} Z {:?}",
                [self.bounds.x.min, self.bounds.x.max],
                [self.bounds.y.min, self.bounds.y.max],
                [self.bounds.z.min, self.bounds.z.max],
            );
        }
        self.racks.insert(name, rack)
    }

    pub fn remove_rack(&mut self, name: &str) -> Option<Rack> {
        self.racks.remove(name)
    }

    pub fn rack(&self, name: &str) -> Result<&Rack> {
        self.racks
            .get(name)
            .ok_or_else(|| Error::ResourceNotFound(format!("rack {name}")))
    }

    pub fn rack_mut(&mut self, name: &str) -> Result<&mut Rack> {
        self.racks
            .get_mut(name)
            .ok_or_else(|| Error::ResourceNotFound(format!("rack {name}")))
    }

    pub fn racks(&self) -> impl Iterator<Item = (&str, &Rack)> {
        self.racks.iter().map(|(name, rack)| (name.as_str(), rack))
    }

    pub fn resources(&self) -> &ResourceStore {
        &self.resources
    }

    /// Resolve any placeable to its coordinates
    ///
    /// Fails with [`Error::OutOfBounds`] for an address outside the rack grid
    /// and [`Error::ResourceNotFound`] for a missing rack, vial or an
    /// exhausted shifting group. Bed bounds are checked by the caller when
    /// the coordinates are turned into moves.
    pub fn locate(&self, place: &Placeable) -> Result<Location> {
        match place {
            Placeable::Coordinate(c) => Ok(c.locate(self.bounds.max_z())),
            Placeable::Named(named) => {
                let rack = self.rack(&named.rack)?;
                let well: WellId = named.well.parse()?;
                rack.locate(well).map_err(|e| match e {
                    Error::ResourceNotFound(what) => {
                        Error::ResourceNotFound(format!("{what} in rack {}", named.rack))
                    }
                    other => other,
                })
            }
            Placeable::Shifting(group) => match group.current() {
                Some(inner) => self.locate(inner),
                None => Err(Error::ResourceNotFound(format!(
                    "place {} of group {}",
                    group.cursor(),
                    group.name
                ))),
            },
        }
    }

    /// Center point of a placeable
    pub fn center(&self, place: &Placeable) -> Result<Point2D> {
        Ok(self.locate(place)?.center)
    }

    /// Persist a shifting group's cursor
    pub fn save_cursor(&self, group: &super::ShiftingGroup) -> Result<()> {
        self.resources.set(
            &format!("{CURSOR_KEY_PREFIX}{}", group.name),
            Value::from(group.cursor() as i64),
        )
    }

    /// Restore a shifting group's cursor; returns whether it is valid
    ///
    /// A group with no persisted cursor keeps its current one.
    pub fn load_cursor(&self, group: &mut super::ShiftingGroup) -> bool {
        let key = format!("{CURSOR_KEY_PREFIX}{}", group.name);
        match self.resources.get(&key).and_then(|v| v.as_i64()) {
            Some(cursor) => group.set_cursor(cursor as isize),
            None => group.is_valid(),
        }
    }

    /// System fluid left in the reservoir (mL), when tracked
    pub fn system_fluid_ml(&self) -> Option<f64> {
        self.resources.get_f64(FLUID_VOLUME_KEY)
    }

    /// Operator summary: bounds, then each rack with its occupancy map
    pub fn summary(&self) -> String {
        let mut out = format!(
            "X:{:?}, Y:{:?}, Z:{:?}\n",
            [self.bounds.x.min, self.bounds.x.max],
            [self.bounds.y.min, self.bounds.y.max],
            [self.bounds.z.min, self.bounds.z.max],
        );
        for (name, rack) in &self.racks {
            out.push_str(&format!(
                "{name} @ {} ({}x{}, travel Z {})\n",
                rack.origin(),
                rack.num_rows(),
                rack.num_cols(),
                rack.travel_z()
            ));
            out.push_str(&rack.occupancy_map());
        }
        out
    }
}

/// Single `*.bed` file at the root of `dir`
fn find_bed_file(dir: &Path) -> Result<PathBuf> {
    let mut beds: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_extension(p, BED_EXTENSION))
        .collect();
    beds.sort();
    if beds.len() > 1 {
        warn!(
            "{} bed files in {}, using {}",
            beds.len(),
            dir.display(),
            beds[0].display()
        );
    }
    beds.into_iter()
        .next()
        .ok_or_else(|| Error::ResourceNotFound(format!("bed file in {}", dir.display())))
}

/// Names of the `*.rak` files at the root of `dir`, sorted
fn rack_names(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_extension(p, RACK_EXTENSION))
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_owned))
        .collect();
    names.sort();
    Ok(names)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::{ShiftingGroup, Vial};
    use crate::safety::AxisBounds;

    fn scenario_bed() -> HandlerBed {
        let mut rack = Rack::new(
            Point2D::new(8.0, 248.0),
            Point2D::new(18.0, 12.8),
            4,
            16,
            83.0,
            113.0,
        );
        rack.place_vial("A1".parse().unwrap(), Vial::new(30.0, 1.0, 25.0, 0.0, 4.0).unwrap())
            .unwrap();
        let mut bed = HandlerBed::new(BedBounds::default());
        bed.insert_rack("pos_1_rack", rack);
        bed
    }

    #[test]
    fn test_locate_named() {
        let bed = scenario_bed();
        let loc = bed.locate(&Placeable::named("pos_1_rack", "A1")).unwrap();
        assert_eq!(loc.center, Point2D::new(8.0, 248.0));
        assert_eq!(loc.access_z, 114.0);
        assert_eq!(loc.transfer_z, 85.0);
        assert_eq!(loc.travel_z, 118.0);
    }

    #[test]
    fn test_locate_missing_things() {
        let bed = scenario_bed();
        for place in [
            Placeable::named("nope", "A1"),
            Placeable::named("pos_1_rack", "B2"),
            Placeable::named("pos_1_rack", "1A"),
            Placeable::Shifting(ShiftingGroup::new("empty", vec![])),
        ] {
            assert!(
                matches!(bed.locate(&place), Err(Error::ResourceNotFound(_))),
                "{place:?}"
            );
        }
        assert!(matches!(
            bed.locate(&Placeable::named("pos_1_rack", "E1")),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_locate_coordinate_uses_bed_top() {
        let bed = scenario_bed();
        let loc = bed.locate(&Placeable::xyz(100.0, 100.0, 90.0)).unwrap();
        assert_eq!(loc.travel_z, 125.0);
        assert_eq!(loc.access_z, 90.0);
    }

    #[test]
    fn test_save_and_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        scenario_bed().save(dir.path(), "gilson_bed").unwrap();
        assert!(dir.path().join("gilson_bed.bed").is_file());
        assert!(dir.path().join("pos_1_rack.rak").is_file());
        assert!(dir.path().join("pos_1_rack_vials/vial_A1.vil").is_file());

        let bed = HandlerBed::load(dir.path()).unwrap();
        assert_eq!(bed.bounds(), &BedBounds::default());
        assert_eq!(
            bed.center(&Placeable::named("pos_1_rack", "a1")).unwrap(),
            Point2D::new(8.0, 248.0)
        );
        // resource file created on first load
        assert!(dir.path().join(RESOURCE_FILE).is_file());
    }

    #[test]
    fn test_load_without_bed_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            HandlerBed::load(dir.path()),
            Err(Error::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_bed_metadata_survives_save() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("lab.bed"),
            r#"{"x_bounds": [1, 162], "y_bounds": [1, 249], "z_bounds": [1, 125], "site": "B12"}"#,
        )
        .unwrap();
        let bed = HandlerBed::load(dir.path()).unwrap();
        let out = tempfile::tempdir().unwrap();
        bed.save(out.path(), "lab.bed").unwrap();
        let text = std::fs::read_to_string(out.path().join("lab.bed")).unwrap();
        assert!(text.contains("\"site\": \"B12\""));
    }

    #[test]
    fn test_cursor_persistence() {
        let bed = HandlerBed::new(BedBounds::new(
            AxisBounds::new(0.0, 200.0),
            AxisBounds::new(0.0, 200.0),
            AxisBounds::new(0.0, 125.0),
        ));
        let mut group = ShiftingGroup::new(
            "reservoirs",
            vec![Placeable::xyz(10.0, 10.0, 50.0), Placeable::xyz(20.0, 10.0, 50.0)],
        );
        group.next();
        bed.save_cursor(&group).unwrap();

        let mut fresh = ShiftingGroup::new("reservoirs", group.places().to_vec());
        assert!(bed.load_cursor(&mut fresh));
        assert_eq!(fresh.cursor(), 1);
        assert_eq!(
            bed.center(&Placeable::Shifting(fresh)).unwrap(),
            Point2D::new(20.0, 10.0)
        );
    }
}
