//! Length prefix encoding and decoding.
//!
//! Every frame starts with its payload length as an unsigned LEB128 varint:
//! ```text
//! ┌──────────────────────┬─────────────────────────┐
//! │ Length (varint)      │ Payload                 │
//! │ 1..=5 bytes, u32     │ `Length` bytes (MsgPack)│
//! └──────────────────────┴─────────────────────────┘
//! ```
//!
//! Each prefix byte carries 7 bits of the length, least significant group
//! first; the high bit marks that another byte follows.

use crate::error::{KvError, Result};

/// Maximum number of bytes a length prefix may occupy.
pub const MAX_PREFIX_LEN: usize = 5;

/// Default maximum payload size (512 MB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 512 * 1024 * 1024;

/// Absolute maximum payload size (~2 GB, max i32).
pub const ABSOLUTE_MAX_FRAME_SIZE: u32 = 2_147_483_647;

const CONTINUATION: u8 = 0x80;
const VALUE_MASK: u8 = 0x7F;

/// An encoded length prefix held on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthPrefix {
    bytes: [u8; MAX_PREFIX_LEN],
    len: u8,
}

impl LengthPrefix {
    /// Encode a payload length.
    ///
    /// # Example
    ///
    /// ```
    /// use kvwire_client::protocol::LengthPrefix;
    ///
    /// assert_eq!(LengthPrefix::encode(1).as_bytes(), &[0x01]);
    /// assert_eq!(LengthPrefix::encode(300).as_bytes(), &[0xAC, 0x02]);
    /// ```
    pub fn encode(mut length: u32) -> Self {
        let mut bytes = [0u8; MAX_PREFIX_LEN];
        let mut len = 0;
        loop {
            let group = (length & u32::from(VALUE_MASK)) as u8;
            length >>= 7;
            if length == 0 {
                bytes[len] = group;
                len += 1;
                break;
            }
            bytes[len] = group | CONTINUATION;
            len += 1;
        }
        Self {
            bytes,
            len: len as u8,
        }
    }

    /// The encoded bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Number of encoded bytes (1..=5).
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false; a prefix is at least one byte.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Number of bytes needed to encode `length` as a prefix.
pub fn prefix_len(length: u32) -> usize {
    match length {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Decode a length prefix from the front of `buf`.
///
/// Returns:
/// - `Ok(Some((length, consumed)))` when a complete prefix is present
/// - `Ok(None)` when more bytes are needed
/// - `Err(Protocol)` when the prefix is longer than 5 bytes or overflows `u32`
pub fn decode_length_prefix(buf: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut length: u32 = 0;
    for index in 0..MAX_PREFIX_LEN {
        let Some(&byte) = buf.get(index) else {
            return Ok(None);
        };

        if index == MAX_PREFIX_LEN - 1 && byte > 0x0F {
            return Err(KvError::Protocol(
                "Length prefix overflows 32 bits".to_string(),
            ));
        }

        length |= u32::from(byte & VALUE_MASK) << (7 * index);
        if byte & CONTINUATION == 0 {
            return Ok(Some((length, index + 1)));
        }
    }
    // Unreachable in practice: the fifth byte either terminates or overflows.
    Err(KvError::Protocol(
        "Length prefix longer than 5 bytes".to_string(),
    ))
}

/// Check a decoded length against the frame limit.
pub fn validate_length(length: u32, max_frame_size: u32) -> Result<()> {
    if length > max_frame_size {
        return Err(KvError::Protocol(format!(
            "Frame size {} exceeds maximum {}",
            length, max_frame_size
        )));
    }
    Ok(())
}
