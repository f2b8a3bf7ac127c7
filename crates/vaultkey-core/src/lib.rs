//! Host-side command core for VaultKey hardware tokens.
//!
//! Everything the desktop front-end needs from the token reduces to one
//! primitive, [`CommandChannel::send`]. Around it sit the connectivity model
//! ([`DeviceSession`]), the PIN/lockout state machine ([`Authenticator`]), and
//! the managers for vault entries, FIDO2 resident keys and one-time codes.
//! [`VaultKeyHost`] owns all of them and exposes the host-facing operations.
//!
//! [`simulator`] implements the device side of the protocol in-process.

pub mod auth;
pub mod channel;
pub mod config;
pub mod error;
pub mod fido;
pub mod host;
pub mod kdf;
pub mod scheduler;
pub mod session;
pub mod simulator;
pub mod status;
pub mod totp;
pub mod vault;

pub use auth::{AuthResponse, AuthState, Authenticator, SecurityStatus, LOCKOUT_THRESHOLD};
pub use channel::CommandChannel;
pub use config::{ChannelConfig, HostConfig, KdfConfig, SchedulerConfig};
pub use error::{AuthError, DeviceError, Error, FidoError, Result, TotpError, VaultError};
pub use fido::{decode_credentials, FidoCredential, FidoManager};
pub use host::VaultKeyHost;
pub use kdf::{derive_key, DerivedKey, KEY_LEN};
pub use scheduler::Background;
pub use session::{DeviceSession, DeviceStatus, LinkEvent};
pub use simulator::SimulatedDevice;
pub use status::StatusToken;
pub use totp::{Clock, ManualClock, SystemClock, TotpProvider, TotpState};
pub use vault::{SecretBytes, VaultManager};
