//! Message types understood by VaultKey firmware.
//!
//! Requests use even numbers; the device answers request `T` with `T + 1`.
//! [`ERROR`] is only ever sent by the device.

/// Liveness probe; the device echoes the payload.
pub const PING: u8 = 0;

/// Authenticate with a PIN-derived key.
pub const AUTH: u8 = 4;

/// Current one-time code for the supplied Unix time.
pub const TOTP: u8 = 12;

/// Type text into the host's focused field via the device keyboard interface.
pub const KEYBOARD_TYPE: u8 = 14;

/// Fail counter and lock flag.
pub const GET_SECURITY: u8 = 16;

/// End the device's unlocked session.
pub const LOCK: u8 = 18;

/// Vault entry names.
pub const VAULT_LIST: u8 = 20;

/// Secret bytes of one vault entry.
pub const VAULT_GET: u8 = 22;

/// Store a new vault entry.
pub const VAULT_ADD: u8 = 24;

/// Remove a vault entry.
pub const VAULT_DELETE: u8 = 26;

/// Firmware identification string.
pub const INFO: u8 = 30;

/// Enumerate FIDO2 resident credentials.
pub const FIDO_LIST: u8 = 40;

/// Delete one FIDO2 resident credential by id.
pub const FIDO_DELETE: u8 = 42;

/// Whether a FIDO2 client PIN is configured.
pub const FIDO_PIN_STATUS: u8 = 44;

/// Set the FIDO2 client PIN.
pub const FIDO_SET_PIN: u8 = 46;

/// Device-side refusal; payload is a status token.
pub const ERROR: u8 = 255;

/// The message type a well-behaved device uses to answer `request`.
pub fn response_type(request: u8) -> u8 {
    request.wrapping_add(1)
}

/// Returns a human-readable name for a message type.
pub fn msg_type_name(msg_type: u8) -> &'static str {
    match msg_type {
        PING => "PING",
        1 => "PONG",
        AUTH => "AUTH",
        TOTP => "TOTP",
        KEYBOARD_TYPE => "KEYBOARD_TYPE",
        GET_SECURITY => "GET_SECURITY",
        LOCK => "LOCK",
        VAULT_LIST => "VAULT_LIST",
        VAULT_GET => "VAULT_GET",
        VAULT_ADD => "VAULT_ADD",
        VAULT_DELETE => "VAULT_DELETE",
        INFO => "INFO",
        FIDO_LIST => "FIDO_LIST",
        FIDO_DELETE => "FIDO_DELETE",
        FIDO_PIN_STATUS => "FIDO_PIN_STATUS",
        FIDO_SET_PIN => "FIDO_SET_PIN",
        ERROR => "ERROR",
        t if t % 2 == 1 => "RESPONSE",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_follow_requests() {
        assert_eq!(response_type(PING), 1);
        assert_eq!(response_type(FIDO_LIST), 41);
        assert_eq!(response_type(ERROR), 0);
    }

    #[test]
    fn names_cover_known_types() {
        assert_eq!(msg_type_name(AUTH), "AUTH");
        assert_eq!(msg_type_name(response_type(VAULT_GET)), "RESPONSE");
        assert_eq!(msg_type_name(100), "UNKNOWN");
    }
}
