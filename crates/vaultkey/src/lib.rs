//! Host tooling for VaultKey hardware password tokens.
//!
//! The token talks a small framed request/response protocol over USB CDC.
//! This crate bundles the layers that speak it from the desktop side.
//!
//! # Crate Structure
//!
//! - [`transport`]: Device link abstraction and the Unix-socket bridge link
//! - [`frame`]: Wire framing, message types and response classification
//! - [`host`]: Command channel, session, PIN lockout, vault, FIDO2 and TOTP
//!
//! The most used types are re-exported at the crate root.

/// Re-export transport types.
pub mod transport {
    pub use vaultkey_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use vaultkey_frame::*;
}

/// Re-export host core types.
pub mod host {
    pub use vaultkey_core::*;
}

pub use vaultkey_core::{
    AuthState, DeviceStatus, Error, HostConfig, LinkEvent, Result, SecurityStatus, SimulatedDevice,
    VaultKeyHost,
};
