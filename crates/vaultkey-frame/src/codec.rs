use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: version (1) + type (1) + length (2) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Protocol version embedded in every encoded frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// A versioned, typed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Protocol version this frame was encoded with.
    pub version: u8,
    /// Message type.
    pub msg_type: u8,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame at the current protocol version.
    ///
    /// Fails with [`FrameError::PayloadTooLarge`] if the payload does not fit
    /// the length field.
    pub fn new(msg_type: u8, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        check_payload_len(payload.len())?;
        Ok(Self {
            version: PROTOCOL_VERSION,
            msg_type,
            payload,
        })
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Append this frame's wire encoding to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        check_payload_len(self.payload.len())?;
        put_frame(self.version, self.msg_type, &self.payload, dst);
        Ok(())
    }

    /// Wire encoding as a standalone buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────┬────────────┬─────────────────┐
/// │ Version  │ Type     │ Length     │ Payload          │
/// │ (1B)     │ (1B)     │ (2B LE)    │ (Length bytes)   │
/// └──────────┴──────────┴────────────┴─────────────────┘
/// ```
pub fn encode_frame(msg_type: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    check_payload_len(payload.len())?;
    put_frame(PROTOCOL_VERSION, msg_type, payload, dst);
    Ok(())
}

/// Decode exactly one frame occupying the whole of `raw`.
///
/// The declared length must match the received payload length exactly;
/// anything else is [`FrameError::MalformedFrame`].
pub fn decode_frame(raw: &[u8]) -> Result<Frame> {
    if raw.len() < HEADER_SIZE {
        return Err(FrameError::MalformedFrame {
            declared: 0,
            actual: raw.len(),
        });
    }

    let version = raw[0];
    if version != PROTOCOL_VERSION {
        return Err(FrameError::UnsupportedVersion(version));
    }

    let msg_type = raw[1];
    let declared = u16::from_le_bytes([raw[2], raw[3]]) as usize;
    let actual = raw.len() - HEADER_SIZE;
    if declared != actual {
        return Err(FrameError::MalformedFrame { declared, actual });
    }

    Ok(Frame {
        version,
        msg_type,
        payload: Bytes::copy_from_slice(&raw[HEADER_SIZE..]),
    })
}

/// Decode a frame from a stream buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame_partial(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let version = src[0];
    if version != PROTOCOL_VERSION {
        return Err(FrameError::UnsupportedVersion(version));
    }

    let msg_type = src[1];
    let payload_len = u16::from_le_bytes([src[2], src[3]]) as usize;
    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame {
        version,
        msg_type,
        payload,
    }))
}

fn check_payload_len(len: usize) -> Result<()> {
    if len > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: MAX_PAYLOAD,
        });
    }
    Ok(())
}

fn put_frame(version: u8, msg_type: u8, payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u8(version);
    dst.put_u8(msg_type);
    dst.put_u16_le(payload.len() as u16);
    dst.put_slice(payload);
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: the length-field maximum.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
        }
    }
}
