//! Platform travel limits

use ampoule_protocol::Axis;
use serde::{Deserialize, Serialize};

use crate::deck::{Point2D, Point3D};
use crate::error::{Error, Result};

/// Inclusive `[min, max]` range of one axis, in mm
///
/// Serialized as a two-element array, the way bed files store it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct AxisBounds {
    pub min: f64,
    pub max: f64,
}

impl AxisBounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Pass `value` through, or fail with [`Error::OutOfBounds`]
    pub fn check(&self, axis: Axis, value: f64) -> Result<f64> {
        if self.contains(value) {
            Ok(value)
        } else {
            Err(Error::OutOfBounds {
                axis,
                value,
                min: self.min,
                max: self.max,
            })
        }
    }
}

impl From<[f64; 2]> for AxisBounds {
    fn from([min, max]: [f64; 2]) -> Self {
        Self { min, max }
    }
}

impl From<AxisBounds> for [f64; 2] {
    fn from(b: AxisBounds) -> Self {
        [b.min, b.max]
    }
}

/// X/Y/Z limits of the handler bed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BedBounds {
    #[serde(rename = "x_bounds")]
    pub x: AxisBounds,
    #[serde(rename = "y_bounds")]
    pub y: AxisBounds,
    #[serde(rename = "z_bounds")]
    pub z: AxisBounds,
}

impl Default for BedBounds {
    /// GX-241 working volume
    fn default() -> Self {
        Self {
            x: AxisBounds::new(1.0, 162.0),
            y: AxisBounds::new(1.0, 249.0),
            z: AxisBounds::new(1.0, 125.0),
        }
    }
}

impl BedBounds {
    pub const fn new(x: AxisBounds, y: AxisBounds, z: AxisBounds) -> Self {
        Self { x, y, z }
    }

    pub fn check_xy(&self, point: Point2D) -> Result<Point2D> {
        self.x.check(Axis::X, point.x)?;
        self.y.check(Axis::Y, point.y)?;
        Ok(point)
    }

    pub fn check_z(&self, z: f64) -> Result<f64> {
        self.z.check(Axis::Z, z)
    }

    pub fn check_point(&self, point: Point3D) -> Result<Point3D> {
        self.check_xy(point.xy())?;
        self.check_z(point.z)?;
        Ok(point)
    }

    /// Whether a point lies inside the bed (used for load-time warnings)
    pub fn contains(&self, point: Point3D) -> bool {
        self.check_point(point).is_ok()
    }

    pub fn min_xy(&self) -> Point2D {
        Point2D::new(self.x.min, self.y.min)
    }

    pub fn max_xy(&self) -> Point2D {
        Point2D::new(self.x.max, self.y.max)
    }

    /// Highest reachable Z, the travel height when nothing better is known
    pub fn max_z(&self) -> f64 {
        self.z.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_rejects_without_clamping() {
        let bounds = BedBounds::default();
        assert!(bounds.check_xy(Point2D::new(8.0, 248.0)).is_ok());
        match bounds.check_xy(Point2D::new(8.0, 260.8)) {
            Err(Error::OutOfBounds { axis, value, max, .. }) => {
                assert_eq!(axis, Axis::Y);
                assert_eq!(value, 260.8);
                assert_eq!(max, 249.0);
            }
            other => panic!("expected OutOfBounds, got {other:?}"),
        }
        assert!(bounds.check_z(0.5).is_err());
        assert!(bounds.check_z(125.0).is_ok());
    }

    #[test]
    fn test_bed_file_shape() {
        let bounds: BedBounds = serde_json::from_str(
            r#"{"x_bounds": [1, 162], "y_bounds": [1, 249], "z_bounds": [1, 125]}"#,
        )
        .unwrap();
        assert_eq!(bounds, BedBounds::default());
        let text = serde_json::to_string(&bounds).unwrap();
        assert!(text.contains(r#""x_bounds":[1.0,162.0]"#));
    }

    #[test]
    fn test_contains() {
        let bounds = BedBounds::default();
        assert!(bounds.contains(Point3D::new(100.0, 100.0, 90.0)));
        assert!(!bounds.contains(Point3D::new(100.0, 100.0, 130.0)));
    }
}
