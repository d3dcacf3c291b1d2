//! # Slic Frame Types and Codec
//!
//! A frame on the wire is
//!
//! ```text
//! [type: 1 byte][size: varint][stream id: varint, stream frames only][body: size bytes]
//! ```
//!
//! `size` counts the body only. The header can be decoded on its own so a
//! reader can learn the body size before the body has arrived.

pub mod codec;
pub mod types;

pub use codec::{decode_body, decode_header, encode_header, FrameHeader, MAX_CONTROL_FRAME_SIZE};
pub use types::*;
