use std::time::Duration;

use vaultkey_frame::FrameError;

use crate::fido::FidoCredential;

/// Failures of a single command round trip.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The request or its response violated the frame format.
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    /// No matching response arrived before the deadline.
    #[error("device did not answer within {0:?}")]
    Timeout(Duration),

    /// The link failed while the command was queued or in flight.
    #[error("device link lost: {0}")]
    LinkLost(String),

    /// The command queue is full; the request was not queued.
    #[error("command queue full ({0} pending)")]
    Busy(usize),

    /// No device link is attached.
    #[error("no device connected")]
    Disconnected,

    /// The device refused the command because it is locked out.
    #[error("device is locked")]
    Locked,

    /// The device refused the command because no session is unlocked.
    #[error("device requires an authenticated session")]
    AuthRequired,

    /// The device refused the command with another status token.
    #[error("device refused command: {0}")]
    Rejected(String),

    /// The device answered with a payload the host cannot interpret.
    #[error("malformed {what} response: {detail}")]
    BadResponse { what: &'static str, detail: String },

    /// The command worker thread could not be started.
    #[error("failed to start command worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

impl DeviceError {
    /// Whether the device itself reported a lockout.
    pub fn is_lock_indicator(&self) -> bool {
        matches!(self, DeviceError::Locked)
    }
}

/// Errors from PIN authentication and key derivation.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("PIN must not be empty")]
    EmptyPin,

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("derived key must be {expected} bytes, got {got}")]
    KeyLength { expected: usize, got: usize },

    /// The host is locked out; nothing was sent to the device.
    #[error("device is locked out; no further PIN attempts are sent")]
    AlreadyLocked,

    /// This attempt exhausted the remaining tries.
    #[error("device locked after {fail_count} failed attempts")]
    Locked { fail_count: u32 },

    #[error("wrong PIN ({fail_count} failed, {remaining} remaining)")]
    WrongPin { fail_count: u32, remaining: u32 },

    #[error("an authentication attempt is already in progress")]
    InProgress,

    /// The device answered the AUTH request with an unrecognised reply.
    #[error("unexpected authentication reply: {0}")]
    DeviceFault(String),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Errors from vault entry management.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("vault access requires an authenticated session")]
    NotAuthenticated,

    #[error("vault entry already exists: {0}")]
    DuplicateEntry(String),

    #[error("vault entry not found: {0}")]
    NotFound(String),

    #[error("vault is full")]
    VaultFull,

    #[error("invalid entry name: {0}")]
    InvalidName(String),

    #[error("invalid secret: {0}")]
    InvalidSecret(String),

    /// The entry list could not be decoded.
    #[error("malformed vault list at offset {offset}")]
    MalformedList { offset: usize },

    #[error("device rejected vault command: {0}")]
    Rejected(String),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Errors from FIDO2 resident-key management.
#[derive(Debug, thiserror::Error)]
pub enum FidoError {
    /// The record stream ended inside a record. Records decoded before the
    /// truncation point are kept in `decoded`.
    #[error("credential list truncated at offset {offset} after {} records", .decoded.len())]
    TruncatedRecord {
        offset: usize,
        decoded: Vec<FidoCredential>,
    },

    #[error("relying-party id at offset {offset} is not valid UTF-8")]
    InvalidRpId { offset: usize },

    #[error("credential not found")]
    NotFound,

    #[error("credential id must not be empty")]
    EmptyCredentialId,

    #[error("{field} is {len} bytes, the record format allows at most 255")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("device rejected FIDO2 command: {0}")]
    Rejected(String),

    #[error(transparent)]
    Pin(#[from] AuthError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Errors from one-time code retrieval.
#[derive(Debug, thiserror::Error)]
pub enum TotpError {
    #[error("device returned an invalid one-time code: {0:?}")]
    InvalidCode(String),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Errors returned by host-facing operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(#[source] FrameError),

    #[error("transport error: {0}")]
    Transport(#[source] DeviceError),

    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("FIDO2 error: {0}")]
    Fido(#[from] FidoError),

    #[error("TOTP error: {0}")]
    Totp(#[from] TotpError),

    #[error("link setup failed: {0}")]
    Link(#[from] vaultkey_transport::TransportError),

    #[error("no device connected")]
    Disconnected,
}

impl From<DeviceError> for Error {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Protocol(frame) => Error::Protocol(frame),
            DeviceError::Disconnected => Error::Disconnected,
            other => Error::Transport(other),
        }
    }
}

impl From<FrameError> for Error {
    fn from(err: FrameError) -> Self {
        Error::Protocol(err)
    }
}

impl Error {
    /// The device-level failure underneath this error, if any.
    pub fn device_error(&self) -> Option<&DeviceError> {
        match self {
            Error::Transport(err)
            | Error::Auth(AuthError::Device(err))
            | Error::Vault(VaultError::Device(err))
            | Error::Fido(FidoError::Device(err))
            | Error::Fido(FidoError::Pin(AuthError::Device(err)))
            | Error::Totp(TotpError::Device(err)) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
