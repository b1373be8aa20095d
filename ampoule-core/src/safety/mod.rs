//! Safety checks
//!
//! Bed bounds are hard limits: a coordinate outside them is rejected, never
//! clamped. The travel planner produces the only waypoint order allowed for
//! cross-location moves.

pub mod bounds;
pub mod planner;

pub use bounds::{AxisBounds, BedBounds};
pub use planner::{raise_traverse_lower, Waypoint};
