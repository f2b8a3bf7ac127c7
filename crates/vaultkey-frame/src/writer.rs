use std::io::{ErrorKind, Write};
use std::time::Duration;

use bytes::BytesMut;
use tracing::trace;
use vaultkey_transport::DeviceLink;
use zeroize::Zeroize;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::msg::msg_type_name;
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Writes complete frames to any `Write` stream.
///
/// A frame is encoded into an internal buffer first and then written in one
/// pass, so a frame is never interleaved with another writer's bytes as long
/// as a single `FrameWriter` owns the stream. The encoded bytes are wiped
/// from the buffer after every write, successful or not, since payloads may
/// carry keys and secrets.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.msg_type, frame.payload.as_ref())
    }

    /// Encode and send a payload with the given message type.
    pub fn send(&mut self, msg_type: u8, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(msg_type, payload, &mut self.buf)?;
        let written = self.write_buffered();
        self.buf[..].zeroize();
        self.buf.clear();
        written?;

        trace!(
            msg_type,
            msg_name = msg_type_name(msg_type),
            len = payload.len(),
            "frame written"
        );
        self.flush()
    }

    fn write_buffered(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<T: DeviceLink> FrameWriter<T> {
    /// Bound each blocking write on the underlying link.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner
            .set_write_timeout(timeout)
            .map_err(transport_to_frame_error)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::{decode_frame, HEADER_SIZE};
    use crate::reader::FrameReader;

    #[test]
    fn writes_header_and_payload() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.send(4, &[0xAA; 32]).unwrap();

        let wire = writer.into_inner();
        assert_eq!(wire.len(), HEADER_SIZE + 32);
        let frame = decode_frame(&wire).unwrap();
        assert_eq!(frame.msg_type, 4);
        assert_eq!(frame.payload.as_ref(), &[0xAA; 32]);
    }

    #[test]
    fn respects_configured_cap() {
        let mut writer = FrameWriter::with_config(
            Vec::new(),
            FrameConfig {
                max_payload_size: 8,
            },
        );
        let err = writer.send(24, &[0u8; 9]).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 8 }));
        assert!(writer.get_ref().is_empty());
    }

    #[test]
    fn short_writes_are_completed() {
        let mut writer = FrameWriter::new(OneBytePerWrite(Vec::new()));
        writer.send(0, b"PING").unwrap();

        let wire = writer.into_inner().0;
        let mut reader = FrameReader::new(Cursor::new(wire));
        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"PING");
    }

    #[test]
    fn zero_length_write_is_connection_closed() {
        let mut writer = FrameWriter::new(ClosedSink);
        let err = writer.send(0, b"PING").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn write_frame_uses_frame_fields() {
        let frame = Frame::new(26, b"\x01x".to_vec()).unwrap();
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_frame(&frame).unwrap();
        assert_eq!(decode_frame(writer.get_ref()).unwrap(), frame);
    }

    /// The first `len` bytes of the writer's allocation, including bytes
    /// past the current length.
    fn allocation_prefix<T>(writer: &FrameWriter<T>, len: usize) -> Vec<u8> {
        assert!(writer.buf.capacity() >= len);
        // SAFETY: every byte below `len` was written by an earlier encode, and
        // the allocation is at least `len` bytes long.
        unsafe { std::slice::from_raw_parts(writer.buf.as_ptr(), len) }.to_vec()
    }

    #[test]
    fn payload_does_not_outlive_the_write() {
        let secret = b"correct-horse-battery-staple";
        let mut writer = FrameWriter::new(Vec::new());
        writer.send(14, secret).unwrap();
        writer.send(0, b"PING").unwrap();

        let residue = allocation_prefix(&writer, HEADER_SIZE + secret.len());
        assert!(residue.iter().all(|b| *b == 0), "{residue:?}");
        assert!(writer.buf.is_empty());
    }

    #[test]
    fn payload_is_wiped_when_the_write_fails() {
        let secret = [0xA5u8; 32];
        let mut writer = FrameWriter::new(ClosedSink);
        assert!(writer.send(4, &secret).is_err());

        let residue = allocation_prefix(&writer, HEADER_SIZE + secret.len());
        assert!(residue.iter().all(|b| *b == 0));
    }

    #[test]
    #[cfg(unix)]
    fn write_timeout_applies_to_link() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let link = vaultkey_transport::LinkStream::from_unix(left);
        let mut writer = FrameWriter::new(link);
        writer
            .set_write_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        let payload = vec![0u8; crate::codec::MAX_PAYLOAD];
        let err = loop {
            if let Err(err) = writer.send(24, &payload) {
                break err;
            }
        };
        assert!(err.is_timeout());
    }

    struct OneBytePerWrite(Vec<u8>);

    impl Write for OneBytePerWrite {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            match buf.first() {
                Some(byte) => {
                    self.0.push(*byte);
                    Ok(1)
                }
                None => Ok(0),
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ClosedSink;

    impl Write for ClosedSink {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
