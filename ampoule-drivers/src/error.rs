//! Transport errors
//!
//! These cover finding and opening the port. Failures of a single exchange
//! on an open port are reported as [`ampoule_core::LinkError`].

/// Failure to acquire a serial port
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No port carries the requested USB descriptor
    #[error("no serial port matches {0:?}")]
    PortNotFound(String),
    /// More than one port carries the requested USB descriptor
    #[error("{device_name:?} matches several ports: {}", ports.join(", "))]
    AmbiguousPort {
        device_name: String,
        ports: Vec<String>,
    },
    /// The OS refused to open the port
    #[error("cannot open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
