//! Frame codec: envelopes to length-delimited frames and back.
//!
//! [`FrameCodec::decode`] is a pure function over a byte slice: it returns
//! every complete frame payload in stream order together with the unconsumed
//! tail. The read loop uses the stateful [`FrameBuffer`](super::FrameBuffer)
//! instead, which keeps the tail between socket reads.
//!
//! # Example
//!
//! ```
//! use kvwire_client::protocol::{Command, FrameCodec, Request, RequestBody};
//!
//! let codec = FrameCodec::default();
//! let request = Request::new(9, RequestBody::Single(Command::new("GET", ["k"])));
//! let bytes = codec.encode_request(&request).unwrap();
//!
//! let (frames, rest) = codec.decode(&bytes).unwrap();
//! assert_eq!(frames.len(), 1);
//! assert!(rest.is_empty());
//! assert_eq!(codec.decode_request(&frames[0]).unwrap(), request);
//! ```

use bytes::Bytes;

use super::message::{Request, Response};
use super::wire_format::{
    decode_length_prefix, validate_length, LengthPrefix, ABSOLUTE_MAX_FRAME_SIZE,
    DEFAULT_MAX_FRAME_SIZE,
};
use crate::codec::MsgPackCodec;
use crate::error::{KvError, Result};

/// Encodes envelopes into frames and splits byte streams into frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: u32,
}

impl FrameCodec {
    /// Create a codec with a custom frame size limit.
    pub fn new(max_frame_size: u32) -> Self {
        Self { max_frame_size }
    }

    /// Configured frame size limit.
    #[inline]
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Serialize a request envelope into its payload bytes (no prefix).
    pub fn request_payload(&self, request: &Request) -> Result<Vec<u8>> {
        let payload = MsgPackCodec::encode(request)?;
        self.check_outbound(payload.len())?;
        Ok(payload)
    }

    /// Encode a request into a complete frame.
    pub fn encode_request(&self, request: &Request) -> Result<Vec<u8>> {
        let payload = self.request_payload(request)?;
        encode_frame(&payload)
    }

    /// Encode a response into a complete frame.
    pub fn encode_response(&self, response: &Response) -> Result<Vec<u8>> {
        let payload = MsgPackCodec::encode(response)?;
        self.check_outbound(payload.len())?;
        encode_frame(&payload)
    }

    /// Split `buf` into complete frame payloads and the unconsumed remainder.
    ///
    /// Never emits a partial frame. Fails with `Protocol` if a length prefix
    /// is malformed or exceeds the frame limit.
    pub fn decode<'a>(&self, buf: &'a [u8]) -> Result<(Vec<Bytes>, &'a [u8])> {
        let mut frames = Vec::new();
        let mut rest = buf;

        while let Some((length, prefix_len)) = decode_length_prefix(rest)? {
            validate_length(length, self.max_frame_size)?;
            let end = prefix_len + length as usize;
            if rest.len() < end {
                break;
            }
            frames.push(Bytes::copy_from_slice(&rest[prefix_len..end]));
            rest = &rest[end..];
        }

        Ok((frames, rest))
    }

    /// Decode a request envelope from a frame payload.
    pub fn decode_request(&self, payload: &[u8]) -> Result<Request> {
        MsgPackCodec::decode(payload)
            .map_err(|e| KvError::Protocol(format!("Malformed request envelope: {}", e)))
    }

    /// Decode a response envelope from a frame payload.
    pub fn decode_response(&self, payload: &[u8]) -> Result<Response> {
        MsgPackCodec::decode(payload)
            .map_err(|e| KvError::Protocol(format!("Malformed response envelope: {}", e)))
    }

    fn check_outbound(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size as usize {
            return Err(KvError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

/// Build a complete frame as a single byte vector.
///
/// Fails with `FrameTooLarge` when no peer could accept the payload.
///
/// # Example
///
/// ```
/// use kvwire_client::protocol::encode_frame;
///
/// let bytes = encode_frame(b"hello").unwrap();
/// assert_eq!(bytes, b"\x05hello");
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let prefix = LengthPrefix::encode(frame_length(payload.len())?);
    let mut buf = Vec::with_capacity(prefix.len() + payload.len());
    buf.extend_from_slice(prefix.as_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

fn frame_length(size: usize) -> Result<u32> {
    u32::try_from(size)
        .ok()
        .filter(|&length| length <= ABSOLUTE_MAX_FRAME_SIZE)
        .ok_or(KvError::FrameTooLarge {
            size,
            max: ABSOLUTE_MAX_FRAME_SIZE,
        })
}
