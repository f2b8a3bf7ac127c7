use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::config::KdfConfig;
use crate::error::AuthError;

/// Length of a derived device key.
pub const KEY_LEN: usize = 32;

/// A PIN-derived key. Wiped when dropped; never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    /// Wrap key material derived elsewhere. `None` unless exactly
    /// [`KEY_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; KEY_LEN]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// Derive the device key for `pin`.
///
/// Deterministic for a given config. The PIN itself never leaves the host.
pub fn derive_key(pin: &str, config: &KdfConfig) -> Result<DerivedKey, AuthError> {
    if pin.is_empty() {
        return Err(AuthError::EmptyPin);
    }

    let params = Params::new(
        config.memory_kib,
        config.iterations,
        config.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|err| AuthError::Derivation(err.to_string()))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = DerivedKey([0u8; KEY_LEN]);
    argon
        .hash_password_into(pin.as_bytes(), &config.salt, &mut key.0)
        .map_err(|err| AuthError::Derivation(err.to_string()))?;
    Ok(key)
}

/// [`derive_key`] on the blocking pool, so a slow derivation never stalls
/// the runtime.
pub async fn derive_key_blocking(pin: &str, config: &KdfConfig) -> Result<DerivedKey, AuthError> {
    if pin.is_empty() {
        return Err(AuthError::EmptyPin);
    }
    let pin = Zeroizing::new(pin.to_owned());
    let config = config.clone();
    tokio::task::spawn_blocking(move || derive_key(&pin, &config))
        .await
        .map_err(|err| AuthError::Derivation(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> KdfConfig {
        KdfConfig {
            memory_kib: 64,
            iterations: 1,
            ..KdfConfig::default()
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_key("1234", &cheap()).unwrap();
        let b = derive_key("1234", &cheap()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes().len(), KEY_LEN);
    }

    #[test]
    fn different_pins_give_different_keys() {
        let a = derive_key("1234", &cheap()).unwrap();
        let b = derive_key("1235", &cheap()).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn salt_is_part_of_the_derivation() {
        let other = KdfConfig {
            salt: b"another-app-salt".to_vec(),
            ..cheap()
        };
        let a = derive_key("1234", &cheap()).unwrap();
        let b = derive_key("1234", &other).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn empty_pin_is_rejected() {
        assert!(matches!(derive_key("", &cheap()), Err(AuthError::EmptyPin)));
    }

    #[test]
    fn invalid_params_are_reported() {
        let bad = KdfConfig {
            parallelism: 0,
            ..cheap()
        };
        assert!(matches!(derive_key("1234", &bad), Err(AuthError::Derivation(_))));
    }

    #[test]
    fn debug_output_is_redacted() {
        let key = derive_key("1234", &cheap()).unwrap();
        assert_eq!(format!("{key:?}"), "DerivedKey(<redacted>)");
    }

    #[tokio::test]
    async fn blocking_variant_matches() {
        let a = derive_key("9876", &cheap()).unwrap();
        let b = derive_key_blocking("9876", &cheap()).await.unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }
}
