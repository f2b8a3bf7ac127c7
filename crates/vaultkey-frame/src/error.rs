/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The declared payload length disagrees with the bytes received.
    #[error("malformed frame (header declares {declared} payload bytes, got {actual})")]
    MalformedFrame { declared: usize, actual: usize },

    /// The frame carries a protocol version this host does not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// The payload exceeds what the length field (or configured cap) allows.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The response type does not answer the request that was sent.
    #[error("unexpected response type {got} (expected {expected})")]
    UnexpectedType { expected: u8, got: u8 },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

impl FrameError {
    /// Whether this error is a read/write deadline expiring on the link.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err) if matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            )
        )
    }
}
