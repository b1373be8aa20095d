//! Raise-traverse-lower travel planning
//!
//! A move that changes X or Y first rises to the higher of the two travel
//! heights, then moves horizontally, then descends. The order holds even when
//! the destination is lower than the source.

use crate::deck::Point2D;

/// One arm motion
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waypoint {
    /// Vertical move to this height
    Z(f64),
    /// Horizontal move at the current height
    Xy(Point2D),
}

/// Waypoints from the current position to `target`, ending at `final_z`
///
/// `from_xy` is `None` when the horizontal position is unknown (after homing),
/// which always counts as a horizontal change.
pub fn raise_traverse_lower(
    from_xy: Option<Point2D>,
    from_travel_z: f64,
    target: Point2D,
    target_travel_z: f64,
    final_z: f64,
) -> Vec<Waypoint> {
    let mut path = Vec::with_capacity(3);
    if from_xy != Some(target) {
        path.push(Waypoint::Z(from_travel_z.max(target_travel_z)));
        path.push(Waypoint::Xy(target));
    }
    path.push(Waypoint::Z(final_z));
    path
}
