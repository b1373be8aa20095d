//! Anything the needle can be sent to
//!
//! A [`Placeable`] is a closed set of variants. Resolution against a
//! [`super::HandlerBed`] turns any of them into a [`Location`], which carries
//! every coordinate the operation layer needs.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::point::Point2D;
use crate::error::{Error, Result};

/// Resolved coordinates for one place
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    /// XY of the place center
    pub center: Point2D,
    /// XY used for tip touch and on-edge dispensing
    pub edge: Point2D,
    /// Minimum height for horizontal travel over the place
    pub travel_z: f64,
    /// Height just above the place
    pub access_z: f64,
    /// Height used for aspirating and dispensing
    pub transfer_z: f64,
}

/// A literal position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub xy: Point2D,
    /// Used as both access and transfer height
    pub z: f64,
    /// X offset of the edge point
    #[serde(default)]
    pub edge_offset: f64,
    /// Travel height, the bed maximum when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travel_z: Option<f64>,
}

impl Coordinate {
    pub fn new(xy: Point2D, z: f64) -> Self {
        Self {
            xy,
            z,
            edge_offset: 0.0,
            travel_z: None,
        }
    }

    pub fn with_edge_offset(mut self, edge_offset: f64) -> Self {
        self.edge_offset = edge_offset;
        self
    }

    pub fn with_travel_z(mut self, travel_z: f64) -> Self {
        self.travel_z = Some(travel_z);
        self
    }

    /// Resolve with the bed's top Z as default travel height
    pub fn locate(&self, bed_max_z: f64) -> Location {
        Location {
            center: self.xy,
            edge: self.xy + Point2D::new(self.edge_offset, 0.0),
            travel_z: self.travel_z.unwrap_or(bed_max_z),
            access_z: self.z,
            transfer_z: self.z,
        }
    }
}

/// A rack slot, resolved through the bed's rack registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedLocation {
    pub rack: String,
    pub well: String,
}

impl NamedLocation {
    pub fn new(rack: impl Into<String>, well: impl Into<String>) -> Self {
        Self {
            rack: rack.into(),
            well: well.into(),
        }
    }
}

/// An ordered set of places used one after another as a single resource
///
/// The cursor selects the active place. Every mutator reports whether the
/// cursor still points at a place; callers reset or refill the group when
/// it does not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftingGroup {
    pub name: String,
    places: Vec<Placeable>,
    #[serde(default)]
    cursor: isize,
}

impl ShiftingGroup {
    pub fn new(name: impl Into<String>, places: Vec<Placeable>) -> Self {
        Self {
            name: name.into(),
            places,
            cursor: 0,
        }
    }

    /// Active place, if the cursor is valid
    pub fn current(&self) -> Option<&Placeable> {
        usize::try_from(self.cursor)
            .ok()
            .and_then(|i| self.places.get(i))
    }

    pub fn cursor(&self) -> isize {
        self.cursor
    }

    /// Restore a persisted cursor
    pub fn set_cursor(&mut self, cursor: isize) -> bool {
        self.cursor = cursor;
        self.is_valid()
    }

    pub fn places(&self) -> &[Placeable] {
        &self.places
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.current().is_some()
    }

    pub fn next(&mut self) -> bool {
        self.cursor += 1;
        self.is_valid()
    }

    pub fn previous(&mut self) -> bool {
        self.cursor -= 1;
        self.is_valid()
    }

    pub fn reset(&mut self) -> bool {
        self.cursor = 0;
        self.is_valid()
    }

    pub fn last(&mut self) -> bool {
        self.cursor = self.places.len() as isize - 1;
        self.is_valid()
    }

    /// Remove the place at `index`
    ///
    /// Removing an element before the cursor shifts the cursor back so it
    /// keeps its element; removing the active element leaves the cursor on
    /// its successor.
    pub fn pop(&mut self, index: usize) -> Result<bool> {
        if index >= self.places.len() {
            return Err(Error::ResourceNotFound(format!(
                "place {index} of group {}",
                self.name
            )));
        }
        self.places.remove(index);
        if (index as isize) < self.cursor {
            self.cursor -= 1;
        }
        Ok(self.is_valid())
    }

    /// Insert before `index` (append when `None`), keeping the cursor on
    /// the same element
    pub fn insert(&mut self, place: Placeable, index: Option<usize>) -> bool {
        let index = index.unwrap_or(self.places.len()).min(self.places.len());
        self.places.insert(index, place);
        if (index as isize) <= self.cursor {
            self.cursor += 1;
        }
        self.is_valid()
    }

    pub fn extend(&mut self, places: impl IntoIterator<Item = Placeable>) -> bool {
        self.places.extend(places);
        self.is_valid()
    }
}

/// A place the needle can be sent to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Placeable {
    Coordinate(Coordinate),
    Named(NamedLocation),
    Shifting(ShiftingGroup),
}

impl Placeable {
    /// Literal position with default edge and travel height
    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Placeable::Coordinate(Coordinate::new(Point2D::new(x, y), z))
    }

    /// Rack slot
    pub fn named(rack: impl Into<String>, well: impl Into<String>) -> Self {
        Placeable::Named(NamedLocation::new(rack, well))
    }
}

impl From<Coordinate> for Placeable {
    fn from(c: Coordinate) -> Self {
        Placeable::Coordinate(c)
    }
}

impl From<NamedLocation> for Placeable {
    fn from(n: NamedLocation) -> Self {
        Placeable::Named(n)
    }
}

impl From<ShiftingGroup> for Placeable {
    fn from(g: ShiftingGroup) -> Self {
        Placeable::Shifting(g)
    }
}

impl fmt::Display for Placeable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeable::Coordinate(c) => write!(f, "({}, {}, {})", c.xy.x, c.xy.y, c.z),
            Placeable::Named(n) => write!(f, "{}/{}", n.rack, n.well),
            Placeable::Shifting(g) => match g.current() {
                Some(p) => write!(f, "{}[{}]={}", g.name, g.cursor, p),
                None => write!(f, "{}[{}]=<none>", g.name, g.cursor),
            },
        }
    }
}
