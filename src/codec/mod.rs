//! Codec module - serialization of frame payloads.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the payload format is fixed at compile time.

mod msgpack;

pub use msgpack::MsgPackCodec;
