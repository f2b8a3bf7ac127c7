//! Transport link boundary for VaultKey devices.
//!
//! The byte pipe to the token (USB CDC, HID, BLE) is driven by an external
//! collaborator. This crate only defines what the command core needs from it:
//! a duplex [`DeviceLink`] with a settable read timeout that can be split into
//! independent reader and writer halves.
//!
//! [`LinkStream`] is the one concrete link shipped here. It talks to a device
//! bridge process over a Unix domain socket.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::{DeviceLink, LinkStream};

#[cfg(unix)]
pub use uds::connect_bridge;
