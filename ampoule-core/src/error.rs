//! Error types
//!
//! [`LinkError`] is what a transport reports for one exchange. [`Error`] is
//! what every public operation in this crate returns; it separates faults
//! raised by hardware from requests rejected before any byte was sent.

use ampoule_protocol::{Axis, CommandError, DeviceKind, ProtocolError};

/// Failure of a single exchange on a [`crate::CommandLink`]
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Framing or echo violation
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Command rejected before reaching the wire (bad device id)
    #[error(transparent)]
    Command(#[from] CommandError),
    /// No answer within the response window
    ///
    /// A device whose id dial does not match the configured id looks exactly
    /// like this.
    #[error("no response from device {device_id}")]
    Timeout {
        /// Bus id that went silent
        device_id: u8,
    },
    /// Port level failure
    #[error("link i/o error: {0}")]
    Io(String),
}

/// Errors raised by the device control core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed framing or response
    #[error("{device}: {source}")]
    Protocol {
        /// Device that was addressed
        device: DeviceKind,
        /// Decoding failure
        source: ProtocolError,
    },
    /// Command parameters outside the device grammar (nothing was sent)
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Fault code reported by a device
    #[error("{device} fault {code}: {description}")]
    Device {
        /// Faulted device
        device: DeviceKind,
        /// Vendor error number
        code: u16,
        /// Vendor description
        description: &'static str,
    },
    /// No response within the link window, or the device never settled
    #[error("{device} did not respond in time")]
    Timeout {
        /// Silent device
        device: DeviceKind,
    },
    /// Coordinate outside the bed or a rack grid
    #[error("{axis} = {value} is outside [{min}, {max}]")]
    OutOfBounds {
        /// Offending axis (Y for rack rows, X for rack columns)
        axis: Axis,
        /// Requested value
        value: f64,
        /// Lower limit
        min: f64,
        /// Upper limit
        max: f64,
    },
    /// Syringe capacity, empty syringe, or non-positive volume
    #[error("volume error: {0}")]
    Volume(String),
    /// Operation attempted outside a usable session state
    #[error("session is {state}, operation requires a homed session")]
    NotReady {
        /// State at the time of the call
        state: crate::state::SessionState,
    },
    /// Referenced rack, vial or address has no backing descriptor
    #[error("{0} not found")]
    ResourceNotFound(String),
    /// Descriptor file that cannot be parsed or violates its invariants
    #[error("invalid descriptor {path}: {reason}")]
    Descriptor {
        /// File (or logical name) of the descriptor
        path: String,
        /// What is wrong with it
        reason: String,
    },
    /// Filesystem or port failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A chain step failed validation; nothing was executed
    #[error("chain step {index} ({name}) is invalid: {reason}")]
    ChainValidation {
        /// Zero-based step index
        index: usize,
        /// Operation name as written
        name: String,
        /// Why the step was rejected
        reason: String,
    },
    /// A chain step failed while executing; later steps were not run
    #[error("chain step {index} ({name}) failed: {source}")]
    ChainStep {
        /// Zero-based step index
        index: usize,
        /// Operation name
        name: String,
        /// Underlying failure
        source: Box<Error>,
    },
}

impl Error {
    /// Map a link failure on `device` into the crate taxonomy
    pub fn from_link(device: DeviceKind, err: LinkError) -> Self {
        match err {
            LinkError::Protocol(source) => Error::Protocol { device, source },
            LinkError::Command(e) => Error::Command(e),
            LinkError::Timeout { .. } => Error::Timeout { device },
            LinkError::Io(msg) => Error::Io(std::io::Error::other(msg)),
        }
    }

    /// Whether this error puts the session into the faulted state
    pub fn is_fault(&self) -> bool {
        match self {
            Error::Device { .. } | Error::Timeout { .. } | Error::Io(_) => true,
            Error::ChainStep { source, .. } => source.is_fault(),
            _ => false,
        }
    }

    /// Build a descriptor error
    pub(crate) fn descriptor(path: impl Into<String>, reason: impl ToString) -> Self {
        Error::Descriptor {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;
