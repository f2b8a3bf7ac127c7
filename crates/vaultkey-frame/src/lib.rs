//! Versioned, typed, length-delimited framing for the VaultKey device protocol.
//!
//! Every message on the wire is framed with:
//! - A 1-byte protocol version
//! - A 1-byte message type
//! - A 2-byte little-endian payload length
//!
//! Requests of type `T` are answered with type `T + 1`, or with
//! [`msg::ERROR`] carrying a status token.

pub mod codec;
pub mod error;
pub mod msg;
pub mod reader;
pub mod response;
pub mod writer;

pub use codec::{
    decode_frame, decode_frame_partial, encode_frame, Frame, FrameConfig, HEADER_SIZE,
    MAX_PAYLOAD, PROTOCOL_VERSION,
};
pub use error::{FrameError, Result};
pub use msg::{msg_type_name, response_type};
pub use reader::FrameReader;
pub use response::{classify_response, decode_response, Response};
pub use writer::FrameWriter;
