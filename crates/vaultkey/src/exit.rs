use std::fmt;
use std::io;

use vaultkey_core::{AuthError, DeviceError, Error, FidoError, TotpError, VaultError};
use vaultkey_frame::FrameError;
use vaultkey_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const AUTH_FAILED: i32 = 40;
pub const DEVICE_LOCKED: i32 = 41;
pub const NOT_FOUND: i32 = 44;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { source, .. } | TransportError::Io(source) => io_error(context, source),
        TransportError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

fn frame_code(err: &FrameError) -> i32 {
    match err {
        FrameError::Io(_) | FrameError::ConnectionClosed => TRANSPORT_ERROR,
        _ => DATA_INVALID,
    }
}

fn device_code(err: &DeviceError) -> i32 {
    match err {
        DeviceError::Protocol(frame) => frame_code(frame),
        DeviceError::Timeout(_) => TIMEOUT,
        DeviceError::LinkLost(_) | DeviceError::Busy(_) | DeviceError::Disconnected => TRANSPORT_ERROR,
        DeviceError::Locked => DEVICE_LOCKED,
        DeviceError::AuthRequired => AUTH_FAILED,
        DeviceError::Rejected(_) => FAILURE,
        DeviceError::BadResponse { .. } => DATA_INVALID,
        DeviceError::WorkerSpawn(_) => INTERNAL,
    }
}

fn auth_code(err: &AuthError) -> i32 {
    match err {
        AuthError::EmptyPin => USAGE,
        AuthError::Derivation(_) | AuthError::KeyLength { .. } => INTERNAL,
        AuthError::AlreadyLocked | AuthError::Locked { .. } => DEVICE_LOCKED,
        AuthError::WrongPin { .. } | AuthError::InProgress | AuthError::DeviceFault(_) => AUTH_FAILED,
        AuthError::Device(err) => device_code(err),
    }
}

/// Map a host error to an exit code and message.
pub fn host_error(context: &str, err: Error) -> CliError {
    let err = match err {
        Error::Link(link) => return transport_error(context, link),
        other => other,
    };
    let code = match &err {
        Error::Protocol(frame) => frame_code(frame),
        Error::Transport(device) => device_code(device),
        Error::Disconnected | Error::Link(_) => TRANSPORT_ERROR,
        Error::Auth(auth) => auth_code(auth),
        Error::Vault(vault) => match vault {
            VaultError::NotAuthenticated => AUTH_FAILED,
            VaultError::NotFound(_) => NOT_FOUND,
            VaultError::DuplicateEntry(_) | VaultError::VaultFull | VaultError::Rejected(_) => FAILURE,
            VaultError::InvalidName(_) | VaultError::InvalidSecret(_) => USAGE,
            VaultError::MalformedList { .. } => DATA_INVALID,
            VaultError::Device(device) => device_code(device),
        },
        Error::Fido(fido) => match fido {
            FidoError::TruncatedRecord { .. } | FidoError::InvalidRpId { .. } => DATA_INVALID,
            FidoError::NotFound => NOT_FOUND,
            FidoError::EmptyCredentialId | FidoError::FieldTooLong { .. } => USAGE,
            FidoError::Rejected(_) => FAILURE,
            FidoError::Pin(auth) => auth_code(auth),
            FidoError::Device(device) => device_code(device),
        },
        Error::Totp(totp) => match totp {
            TotpError::InvalidCode(_) => DATA_INVALID,
            TotpError::Device(device) => device_code(device),
        },
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn lockout_and_wrong_pin_have_distinct_codes() {
        let locked = host_error("unlock", Error::Auth(AuthError::AlreadyLocked));
        assert_eq!(locked.code, DEVICE_LOCKED);
        let wrong = host_error(
            "unlock",
            Error::Auth(AuthError::WrongPin {
                fail_count: 1,
                remaining: 4,
            }),
        );
        assert_eq!(wrong.code, AUTH_FAILED);
        assert!(wrong.message.starts_with("unlock: "));
    }

    #[test]
    fn timeouts_map_to_124_through_any_wrapper() {
        let err = Error::Vault(VaultError::Device(DeviceError::Timeout(Duration::from_secs(2))));
        assert_eq!(host_error("vault list", err).code, TIMEOUT);
        let err = Error::Transport(DeviceError::Timeout(Duration::from_secs(2)));
        assert_eq!(host_error("ping", err).code, TIMEOUT);
    }

    #[test]
    fn missing_entries_are_not_found() {
        let err = Error::Vault(VaultError::NotFound("x".into()));
        assert_eq!(host_error("vault get", err).code, NOT_FOUND);
        assert_eq!(host_error("fido delete", Error::Fido(FidoError::NotFound)).code, NOT_FOUND);
    }

    #[test]
    fn connect_failures_keep_io_semantics() {
        let err = TransportError::Connect {
            path: "/tmp/missing.sock".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(transport_error("connect", err).code, TRANSPORT_ERROR);

        let err = TransportError::Connect {
            path: "/tmp/denied.sock".into(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(host_error("connect", Error::Link(err)).code, PERMISSION_DENIED);
    }
}
