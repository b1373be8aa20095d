//! Device control core for GSIOC liquid handlers
//!
//! This crate contains everything between the wire codec and the operator:
//!
//! - Deck model: points, vials, racks, the handler bed and its resource file
//! - Device backend: one call per atomic device command, with settle polling
//! - Session state machine (`Disconnected -> ... -> Ready/Faulted`)
//! - Bounds validation and raise-traverse-lower travel planning
//! - Safety-constrained liquid handling operations
//! - Operation chains, validated in full before the first command
//!
//! The serial transport lives elsewhere; this crate talks to devices through
//! the [`CommandLink`] trait, and ships a [`SimulatedLink`] for dry runs and
//! tests.

#![deny(unsafe_code)]

pub mod backend;
pub mod chain;
pub mod config;
pub mod deck;
pub mod error;
pub mod ops;
pub mod safety;
pub mod sim;
pub mod state;
pub mod traits;

pub use backend::DeviceBackend;
pub use chain::{ChainOp, ChainReport};
pub use config::{DeviceIds, HandlerConfig};
pub use deck::{HandlerBed, Location, Placeable, Point2D, Rack, ResourceStore, Vial, WellId};
pub use error::{Error, LinkError, Result};
pub use ops::LiquidHandler;
pub use sim::SimulatedLink;
pub use state::{Event, FaultKind, SessionState};
pub use traits::CommandLink;
