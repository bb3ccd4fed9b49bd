//! serial-transport: byte-stream transport for USB-serial sensor sticks
//!
//! This crate provides the [`Transport`] trait and the types shared by its backends.
//! The default build enables a `mock` backend so that binaries and tests can run on any
//! host without a device attached; the `serial` feature adds a `serialport` backend.

mod types;
pub use types::{Parity, PortInfo, SerialSettings, StopBits, UsbIdentity, UsbMatch};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::Transport;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::MockTransport;

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::SerialTransport;
