use bytes::Bytes;

use crate::codec::{decode_frame, Frame};
use crate::error::{FrameError, Result};
use crate::msg::{response_type, ERROR};

/// A device answer to one request.
///
/// Each command defines the meaning of a [`Response::Reply`] payload itself
/// (echo text, status text, record streams). [`Response::Refused`] carries
/// the device's status token for requests it would not execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The device executed the request.
    Reply(Bytes),
    /// The device refused the request with an ERROR frame.
    Refused(Bytes),
}

impl Response {
    /// The payload, regardless of disposition.
    pub fn payload(&self) -> &Bytes {
        match self {
            Response::Reply(payload) | Response::Refused(payload) => payload,
        }
    }
}

/// Match a decoded frame against the request it should answer.
///
/// Returns `None` for frames of any other type, which the caller treats as
/// stale output from an earlier, abandoned request.
pub fn classify_response(request_type: u8, frame: Frame) -> Option<Response> {
    if frame.msg_type == ERROR {
        Some(Response::Refused(frame.payload))
    } else if frame.msg_type == response_type(request_type) {
        Some(Response::Reply(frame.payload))
    } else {
        None
    }
}

/// Strictly decode a raw response buffer for `request_type`.
pub fn decode_response(request_type: u8, raw: &[u8]) -> Result<Response> {
    let frame = decode_frame(raw)?;
    let got = frame.msg_type;
    classify_response(request_type, frame).ok_or(FrameError::UnexpectedType {
        expected: response_type(request_type),
        got,
    })
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::codec::encode_frame;
    use crate::msg;

    fn wire(msg_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(msg_type, payload, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn reply_matches_request() {
        let raw = wire(response_type(msg::PING), b"PING");
        let response = decode_response(msg::PING, &raw).unwrap();
        assert_eq!(response, Response::Reply(Bytes::from_static(b"PING")));
    }

    #[test]
    fn error_frame_is_a_refusal() {
        let raw = wire(msg::ERROR, b"LOCKED");
        let response = decode_response(msg::AUTH, &raw).unwrap();
        assert_eq!(response, Response::Refused(Bytes::from_static(b"LOCKED")));
        assert_eq!(response.payload().as_ref(), b"LOCKED");
    }

    #[test]
    fn foreign_type_is_rejected() {
        let raw = wire(response_type(msg::TOTP), b"123456");
        let err = decode_response(msg::PING, &raw).unwrap_err();
        assert!(matches!(
            err,
            FrameError::UnexpectedType {
                expected: 1,
                got: 13
            }
        ));
    }

    #[test]
    fn malformed_response_never_classifies() {
        let mut raw = wire(response_type(msg::PING), b"PING");
        raw.pop();
        assert!(matches!(
            decode_response(msg::PING, &raw),
            Err(FrameError::MalformedFrame { .. })
        ));
    }
}
