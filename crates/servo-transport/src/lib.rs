//! servo-transport: byte-frame transports for servo controller buses
//!
//! This crate provides the [`Transport`] trait used by the control layer to exchange
//! addressed frames with devices, plus feature-gated backends. The default build enables
//! a `mock` backend so that the control layer can be exercised without hardware.

mod types;
pub use types::{DeviceId, Frame, Timestamp, MAX_PAYLOAD};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::Transport;

mod config;
pub use config::{open_transport, TransportConfig};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockEvent, MockHandle, MockTransport};

#[cfg(feature = "fdcanusb")]
mod fdcanusb;

#[cfg(feature = "fdcanusb")]
pub use fdcanusb::FdcanusbTransport;
