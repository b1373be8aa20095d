//! Arm motion: cross-location moves and tip exits

use log::info;

use super::plan::Planner;
use super::specs::TipExit;
use super::LiquidHandler;
use crate::deck::{Location, Placeable};
use crate::error::Result;
use crate::safety::{raise_traverse_lower, Waypoint};
use crate::traits::CommandLink;

impl Planner<'_> {
    /// Go to a place and stop at its access height
    ///
    /// Every waypoint is bounds-checked while planning.
    pub fn move_to(&mut self, place: &Placeable, on_edge: bool) -> Result<Location> {
        let location = self.locate(place)?;
        self.move_to_location(&location, on_edge)?;
        Ok(location)
    }

    pub fn move_to_location(&mut self, location: &Location, on_edge: bool) -> Result<()> {
        let target = if on_edge {
            location.edge
        } else {
            location.center
        };
        let path = raise_traverse_lower(
            self.tracker().xy,
            self.tracker().travel_z,
            target,
            location.travel_z,
            location.access_z,
        );
        for waypoint in path {
            match waypoint {
                Waypoint::Z(z) => self.move_z(z)?,
                Waypoint::Xy(xy) => self.move_xy(xy, location.travel_z)?,
            }
        }
        Ok(())
    }

    /// Take the needle out of a place
    ///
    /// The needle is assumed to be inside `location`; when the tracked
    /// position is elsewhere the arm goes there first.
    pub fn tip_exit(&mut self, method: TipExit, location: &Location) -> Result<()> {
        let here = self.tracker().xy;
        if method != TipExit::None && here != Some(location.center) && here != Some(location.edge)
        {
            self.move_to_location(location, false)?;
        }
        match method {
            TipExit::Center => self.move_z(location.access_z),
            TipExit::TipTouch => {
                let reach = (location.edge - location.center) * self.config().touch_fraction;
                self.move_z(location.access_z - 1.0)?;
                self.move_xy(location.center + reach, location.travel_z)?;
                self.move_xy(location.center, location.travel_z)?;
                self.move_z(location.access_z)
            }
            TipExit::Drag => {
                self.move_xy(location.edge, location.travel_z)?;
                self.move_z(location.access_z)?;
                self.move_xy(location.center, location.travel_z)
            }
            TipExit::None => Ok(()),
        }
    }
}

impl<L: CommandLink> LiquidHandler<L> {
    /// Raise, traverse, then lower to the access height of `place`
    pub fn move_to(&mut self, place: &Placeable, on_edge: bool) -> Result<()> {
        info!("Moving to {place}");
        self.run("move", |h| {
            h.perform(|p| {
                p.move_to(place, on_edge)?;
                Ok(())
            })
        })
    }

    /// Touch the needle against the wall of `place`
    pub fn tip_touch(&mut self, place: &Placeable) -> Result<()> {
        self.tip_exit(TipExit::TipTouch, place)
    }

    pub fn tip_exit(&mut self, method: TipExit, place: &Placeable) -> Result<()> {
        self.run("tip exit", |h| {
            h.perform(|p| {
                let location = p.locate(place)?;
                p.tip_exit(method, &location)
            })
        })
    }
}
