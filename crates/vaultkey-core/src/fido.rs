use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};
use vaultkey_frame::msg;
use zeroize::Zeroizing;

use crate::channel::CommandChannel;
use crate::config::KdfConfig;
use crate::error::{DeviceError, FidoError};
use crate::kdf::derive_key_blocking;
use crate::status::StatusToken;

/// One resident credential as enumerated by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FidoCredential {
    pub rp_id: String,
    pub credential_id: Vec<u8>,
}

/// Decode an enumeration reply.
///
/// Wire format, repeated until the buffer ends:
/// ```text
/// [rp_len:u8][rp_id:rp_len][cred_len:u8][cred_id:cred_len]
/// ```
/// A record cut short yields [`FidoError::TruncatedRecord`] carrying every
/// record decoded before it.
pub fn decode_credentials(buf: &[u8]) -> Result<Vec<FidoCredential>, FidoError> {
    let mut decoded = Vec::new();
    let mut offset = 0usize;

    while offset < buf.len() {
        let record = offset;
        let Some(rp_id) = read_field(buf, &mut offset) else {
            return Err(FidoError::TruncatedRecord { offset: record, decoded });
        };
        let rp_id = std::str::from_utf8(rp_id)
            .map_err(|_| FidoError::InvalidRpId { offset: record })?
            .to_string();
        let Some(credential_id) = read_field(buf, &mut offset) else {
            return Err(FidoError::TruncatedRecord { offset: record, decoded });
        };
        decoded.push(FidoCredential {
            rp_id,
            credential_id: credential_id.to_vec(),
        });
    }

    Ok(decoded)
}

fn read_field<'a>(buf: &'a [u8], offset: &mut usize) -> Option<&'a [u8]> {
    let len = *buf.get(*offset)? as usize;
    let start = *offset + 1;
    let field = buf.get(start..start + len)?;
    *offset = start + len;
    Some(field)
}

/// Encode records in the enumeration format.
///
/// Each field carries a one-byte length, so a field over 255 bytes is an
/// error rather than a truncated record.
pub fn encode_credentials(credentials: &[FidoCredential]) -> Result<Vec<u8>, FidoError> {
    let mut out = Vec::new();
    for credential in credentials {
        write_field(&mut out, "rp_id", credential.rp_id.as_bytes())?;
        write_field(&mut out, "credential_id", &credential.credential_id)?;
    }
    Ok(out)
}

fn write_field(out: &mut Vec<u8>, field: &'static str, bytes: &[u8]) -> Result<(), FidoError> {
    let len = u8::try_from(bytes.len()).map_err(|_| FidoError::FieldTooLong {
        field,
        len: bytes.len(),
    })?;
    out.push(len);
    out.extend_from_slice(bytes);
    Ok(())
}

/// FIDO2 resident-key management.
pub struct FidoManager {
    channel: Arc<CommandChannel>,
    kdf: KdfConfig,
}

impl FidoManager {
    pub fn new(channel: Arc<CommandChannel>, kdf: KdfConfig) -> Self {
        Self { channel, kdf }
    }

    pub async fn list(&self) -> Result<Vec<FidoCredential>, FidoError> {
        let payload = self.channel.send(msg::FIDO_LIST, Bytes::new()).await?;
        let credentials = decode_credentials(&payload)?;
        debug!(count = credentials.len(), "resident credentials listed");
        Ok(credentials)
    }

    /// Delete one credential. Callers re-list afterwards.
    pub async fn delete(&self, credential_id: &[u8]) -> Result<(), FidoError> {
        if credential_id.is_empty() {
            return Err(FidoError::EmptyCredentialId);
        }
        let reply = self
            .channel
            .send(msg::FIDO_DELETE, Bytes::copy_from_slice(credential_id))
            .await
            .map_err(|err| match err {
                DeviceError::Rejected(token) if token == "NOT_FOUND" => FidoError::NotFound,
                other => FidoError::Device(other),
            })?;

        match StatusToken::parse(&reply) {
            StatusToken::Ok => {
                info!(id_len = credential_id.len(), "resident credential deleted");
                Ok(())
            }
            StatusToken::NotFound | StatusToken::Fail => Err(FidoError::NotFound),
            other => Err(FidoError::Rejected(other.to_string())),
        }
    }

    /// Whether a FIDO2 client PIN is configured on the device.
    pub async fn pin_status(&self) -> Result<bool, FidoError> {
        let payload = self.channel.send(msg::FIDO_PIN_STATUS, Bytes::new()).await?;
        match payload.as_ref() {
            [flag] => Ok(*flag != 0),
            other => Err(FidoError::Device(DeviceError::BadResponse {
                what: "FIDO2 PIN status",
                detail: format!("expected 1 byte, got {}", other.len()),
            })),
        }
    }

    /// Set the FIDO2 client PIN. Only the derived key is sent.
    pub async fn set_pin(&self, pin: &str) -> Result<(), FidoError> {
        let key = derive_key_blocking(pin, &self.kdf).await?;
        let reply = self
            .channel
            .send_secret(msg::FIDO_SET_PIN, Zeroizing::new(key.as_bytes().to_vec()))
            .await?;
        drop(key);

        match StatusToken::parse(&reply) {
            StatusToken::Ok => {
                info!("FIDO2 PIN set");
                Ok(())
            }
            other => Err(FidoError::Rejected(other.to_string())),
        }
    }
}
