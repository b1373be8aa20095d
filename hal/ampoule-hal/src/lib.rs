//! Ampoule Hardware Abstraction Layer
//!
//! This crate defines the byte-level serial traits the GSIOC channel is
//! written against. The host transport (a USB-to-RS232 adapter) and the
//! scripted devices used in tests both implement them, so the protocol
//! handshake never knows which one it is talking to.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  GSIOC channel (ampoule-drivers)        │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  ampoule-hal (this crate - traits)      │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │  serialport   │       │ scripted test │
//! │  transport    │       │    device     │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`uart::UartTx`], [`uart::UartRx`] - Serial communication
//! - [`uart::UartError`] - Lets callers tell a read timeout from a broken link

#![no_std]
#![deny(unsafe_code)]

pub mod uart;

// Re-export key traits at crate root for convenience
pub use uart::{Uart, UartConfig, UartError, UartErrorKind, UartRx, UartTx};
