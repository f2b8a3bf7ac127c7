use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info};
use vaultkey_frame::msg;
use zeroize::Zeroizing;

use crate::auth::Authenticator;
use crate::channel::CommandChannel;
use crate::error::{DeviceError, VaultError};
use crate::session::DeviceSession;
use crate::status::StatusToken;

/// Longest entry name the firmware stores, in bytes.
pub const NAME_MAX: usize = 31;

/// Largest secret the firmware stores, in bytes.
pub const SECRET_MAX: usize = 64;

/// Entries a device holds at most.
pub const CAPACITY: usize = 100;

/// Secret bytes read from the vault. Wiped on drop; never printed.
pub struct SecretBytes(Zeroizing<Vec<u8>>);

impl SecretBytes {
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes(<{} bytes redacted>)", self.0.len())
    }
}

struct NameCache {
    epoch: u64,
    names: Vec<String>,
}

/// Vault entry operations. Every call requires an authenticated session.
pub struct VaultManager {
    channel: Arc<CommandChannel>,
    session: Arc<DeviceSession>,
    auth: Arc<Authenticator>,
    cache: Mutex<Option<NameCache>>,
}

impl VaultManager {
    pub fn new(channel: Arc<CommandChannel>, session: Arc<DeviceSession>, auth: Arc<Authenticator>) -> Self {
        Self {
            channel,
            session,
            auth,
            cache: Mutex::new(None),
        }
    }

    /// Entry names in device order.
    pub async fn list(&self) -> Result<Vec<String>, VaultError> {
        self.require_auth()?;
        let payload = self
            .channel
            .send(msg::VAULT_LIST, Bytes::new())
            .await
            .map_err(|err| self.device_error(err))?;
        let names = decode_names(&payload)?;

        *self.lock_cache() = Some(NameCache {
            epoch: self.session.epoch(),
            names: names.clone(),
        });
        debug!(count = names.len(), "vault listed");
        Ok(names)
    }

    /// Names from the last successful [`list`](Self::list), if it happened in
    /// the current link session and nothing changed since.
    pub fn cached_names(&self) -> Option<Vec<String>> {
        let cache = self.lock_cache();
        cache
            .as_ref()
            .filter(|cache| cache.epoch == self.session.epoch())
            .map(|cache| cache.names.clone())
    }

    /// Store a new entry. An existing entry of the same name is never
    /// overwritten.
    pub async fn add(&self, name: &str, secret: &[u8]) -> Result<(), VaultError> {
        self.require_auth()?;
        validate_name(name)?;
        validate_secret(secret)?;

        let mut payload = Zeroizing::new(Vec::with_capacity(2 + name.len() + secret.len()));
        payload.push(name.len() as u8);
        payload.extend_from_slice(name.as_bytes());
        payload.push(secret.len() as u8);
        payload.extend_from_slice(secret);

        let reply = self
            .channel
            .send_secret(msg::VAULT_ADD, payload)
            .await
            .map_err(|err| self.device_error(err))?;

        match StatusToken::parse(&reply) {
            StatusToken::Ok => {
                self.invalidate();
                info!(len = secret.len(), "vault entry added");
                Ok(())
            }
            StatusToken::Exists => Err(VaultError::DuplicateEntry(name.to_string())),
            StatusToken::Full => Err(VaultError::VaultFull),
            StatusToken::AuthRequired => Err(self.device_error(DeviceError::AuthRequired)),
            other => Err(VaultError::Rejected(other.to_string())),
        }
    }

    pub async fn delete(&self, name: &str) -> Result<(), VaultError> {
        self.require_auth()?;
        let reply = self
            .channel
            .send(msg::VAULT_DELETE, encode_name(name)?)
            .await
            .map_err(|err| self.device_error(err))?;

        match StatusToken::parse(&reply) {
            StatusToken::Ok => {
                self.invalidate();
                info!("vault entry deleted");
                Ok(())
            }
            StatusToken::NotFound | StatusToken::Fail => Err(VaultError::NotFound(name.to_string())),
            StatusToken::AuthRequired => Err(self.device_error(DeviceError::AuthRequired)),
            other => Err(VaultError::Rejected(other.to_string())),
        }
    }

    /// Read one secret. The host keeps no copy.
    pub async fn get_secret(&self, name: &str) -> Result<SecretBytes, VaultError> {
        self.require_auth()?;
        let payload = self
            .channel
            .send(msg::VAULT_GET, encode_name(name)?)
            .await
            .map_err(|err| match err {
                DeviceError::Rejected(token) if is_not_found(&token) => VaultError::NotFound(name.to_string()),
                other => self.device_error(other),
            })?;

        if payload.is_empty() {
            return Err(VaultError::NotFound(name.to_string()));
        }
        Ok(SecretBytes(Zeroizing::new(payload.to_vec())))
    }

    /// Read a secret and have the device type it into the focused field.
    pub async fn type_secret(&self, name: &str) -> Result<(), VaultError> {
        let secret = self.get_secret(name).await?;
        let result = self.type_text(secret.expose()).await;
        drop(secret);
        result
    }

    /// Have the device type `text` through its keyboard interface.
    pub async fn type_text(&self, text: &[u8]) -> Result<(), VaultError> {
        let reply = self
            .channel
            .send_secret(msg::KEYBOARD_TYPE, Zeroizing::new(text.to_vec()))
            .await
            .map_err(|err| self.device_error(err))?;
        match StatusToken::parse(&reply) {
            StatusToken::Ok => {
                debug!(len = text.len(), "text typed");
                Ok(())
            }
            other => Err(VaultError::Rejected(other.to_string())),
        }
    }

    fn require_auth(&self) -> Result<(), VaultError> {
        if self.auth.is_authenticated() {
            Ok(())
        } else {
            Err(VaultError::NotAuthenticated)
        }
    }

    fn device_error(&self, err: DeviceError) -> VaultError {
        match err {
            DeviceError::AuthRequired => {
                self.auth.note_auth_required();
                VaultError::NotAuthenticated
            }
            other => VaultError::Device(other),
        }
    }

    fn invalidate(&self) {
        *self.lock_cache() = None;
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<NameCache>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_not_found(token: &str) -> bool {
    matches!(StatusToken::parse(token.as_bytes()), StatusToken::NotFound | StatusToken::Fail)
}

fn validate_name(name: &str) -> Result<(), VaultError> {
    if name.is_empty() {
        return Err(VaultError::InvalidName("name must not be empty".to_string()));
    }
    if name.len() > NAME_MAX {
        return Err(VaultError::InvalidName(format!(
            "name is {} bytes, max {NAME_MAX}",
            name.len()
        )));
    }
    if name.contains('\0') {
        return Err(VaultError::InvalidName("name must not contain NUL".to_string()));
    }
    Ok(())
}

fn validate_secret(secret: &[u8]) -> Result<(), VaultError> {
    if secret.is_empty() {
        return Err(VaultError::InvalidSecret("secret must not be empty".to_string()));
    }
    if secret.len() > SECRET_MAX {
        return Err(VaultError::InvalidSecret(format!(
            "secret is {} bytes, max {SECRET_MAX}",
            secret.len()
        )));
    }
    Ok(())
}

/// `[len:u8][name]`
fn encode_name(name: &str) -> Result<Bytes, VaultError> {
    validate_name(name)?;
    let mut buf = BytesMut::with_capacity(1 + name.len());
    buf.put_u8(name.len() as u8);
    buf.put_slice(name.as_bytes());
    Ok(buf.freeze())
}

/// Decode a VAULT_LIST reply: `[len:u8][name]` repeated.
pub fn decode_names(payload: &[u8]) -> Result<Vec<String>, VaultError> {
    let mut names = Vec::new();
    let mut offset = 0usize;
    while offset < payload.len() {
        let len = payload[offset] as usize;
        let start = offset + 1;
        let name = payload
            .get(start..start + len)
            .ok_or(VaultError::MalformedList { offset })?;
        let name = std::str::from_utf8(name).map_err(|_| VaultError::MalformedList { offset })?;
        names.push(name.to_string());
        offset = start + len;
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_names_in_order() {
        let payload = b"\x06github\x05email\x01x";
        assert_eq!(decode_names(payload).unwrap(), vec!["github", "email", "x"]);
        assert!(decode_names(&[]).unwrap().is_empty());
    }

    #[test]
    fn truncated_list_is_malformed() {
        let err = decode_names(b"\x06github\x09ema").unwrap_err();
        assert!(matches!(err, VaultError::MalformedList { offset: 7 }));
    }

    #[test]
    fn name_limits() {
        assert!(validate_name("x").is_ok());
        assert!(validate_name(&"n".repeat(NAME_MAX)).is_ok());
        assert!(matches!(validate_name(""), Err(VaultError::InvalidName(_))));
        assert!(matches!(
            validate_name(&"n".repeat(NAME_MAX + 1)),
            Err(VaultError::InvalidName(_))
        ));
        assert!(matches!(validate_name("a\0b"), Err(VaultError::InvalidName(_))));
    }

    #[test]
    fn secret_limits() {
        assert!(validate_secret(&[1; SECRET_MAX]).is_ok());
        assert!(matches!(validate_secret(&[]), Err(VaultError::InvalidSecret(_))));
        assert!(matches!(
            validate_secret(&[1; SECRET_MAX + 1]),
            Err(VaultError::InvalidSecret(_))
        ));
    }

    #[test]
    fn name_argument_is_length_prefixed() {
        assert_eq!(encode_name("abc").unwrap().as_ref(), b"\x03abc");
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = SecretBytes(Zeroizing::new(b"hunter2".to_vec()));
        assert_eq!(format!("{secret:?}"), "SecretBytes(<7 bytes redacted>)");
    }
}
