//! Plain XY / XYZ value types for deck arithmetic (mm)

use core::fmt;
use core::ops::{Add, Div, Mul, Sub};

use serde::{Deserialize, Serialize};

/// A point in the XY plane
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    /// The bed origin
    pub const ZERO: Point2D = Point2D { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Extend with a Z component
    pub const fn with_z(self, z: f64) -> Point3D {
        Point3D {
            x: self.x,
            y: self.y,
            z,
        }
    }
}

impl Add for Point2D {
    type Output = Point2D;

    fn add(self, rhs: Point2D) -> Point2D {
        Point2D::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point2D {
    type Output = Point2D;

    fn sub(self, rhs: Point2D) -> Point2D {
        Point2D::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point2D {
    type Output = Point2D;

    fn mul(self, rhs: f64) -> Point2D {
        Point2D::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f64> for Point2D {
    type Output = Point2D;

    fn div(self, rhs: f64) -> Point2D {
        Point2D::new(self.x / rhs, self.y / rhs)
    }
}

impl fmt::Display for Point2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A point in space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Drop the Z component
    pub const fn xy(self) -> Point2D {
        Point2D {
            x: self.x,
            y: self.y,
        }
    }
}

impl Add for Point3D {
    type Output = Point3D;

    fn add(self, rhs: Point3D) -> Point3D {
        Point3D::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Point3D {
    type Output = Point3D;

    fn sub(self, rhs: Point3D) -> Point3D {
        Point3D::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl fmt::Display for Point3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}
