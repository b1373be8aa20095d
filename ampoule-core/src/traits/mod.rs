//! Abstraction traits
//!
//! The core never opens a port itself. Transports implement [`CommandLink`]
//! and hand it to [`crate::DeviceBackend`].

pub mod link;

pub use link::CommandLink;
