//! Protocol module - wire format, framing, and envelope types.
//!
//! This module implements the binary protocol spoken with the server:
//! - Varint length prefix encoding/decoding
//! - Frame codec and a frame buffer for accumulating partial reads
//! - Request and response envelopes

mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use frame::{encode_frame, FrameCodec};
pub use frame_buffer::FrameBuffer;
pub use message::{Command, ErrorKind, Request, RequestBody, Response, Value};
pub use wire_format::{
    decode_length_prefix, prefix_len, validate_length, LengthPrefix, ABSOLUTE_MAX_FRAME_SIZE,
    DEFAULT_MAX_FRAME_SIZE, MAX_PREFIX_LEN,
};
