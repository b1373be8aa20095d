//! Spatial model of the handler bed
//!
//! Geometry only: nothing in this module talks to hardware. Every operation
//! resolves its target through [`HandlerBed::locate`] before a command is
//! built.

pub mod bed;
pub mod placeable;
pub mod point;
pub mod rack;
pub mod resources;
pub mod vial;
pub mod well;

pub use bed::{HandlerBed, FLUID_VOLUME_KEY};
pub use placeable::{Coordinate, Location, NamedLocation, Placeable, ShiftingGroup};
pub use point::{Point2D, Point3D};
pub use rack::{Rack, RackDescriptor};
pub use resources::ResourceStore;
pub use vial::Vial;
pub use well::WellId;
