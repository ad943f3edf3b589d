//! MsgPack codec using `rmp-serde`.
//!
//! Envelopes are always written with `to_vec_named`, so structs and struct
//! variants travel as maps keyed by field name. Peers written against other
//! MessagePack libraries can then decode them without knowing field order.
//!
//! # Example
//!
//! ```
//! use kvwire_client::codec::MsgPackCodec;
//! use kvwire_client::protocol::{Command, Request, RequestBody};
//!
//! let request = Request::new(1, RequestBody::Single(Command::new("GET", ["key"])));
//! let encoded = MsgPackCodec::encode(&request).unwrap();
//! let decoded: Request = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, request);
//! ```

use crate::error::Result;

/// MessagePack codec for envelopes.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
