//! Slic Wire Errors
//!
//! Every failure produced while decoding or encoding frames. A decode error
//! is fatal to the connection that produced the bytes.

#![forbid(unsafe_code)]

use thiserror::Error;

/// Result alias used by the codec.
pub type Result<T> = core::result::Result<T, Error>;

/// Malformed or unencodable wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The buffer ended before a complete value could be read.
    #[error("buffer too short: need {needed} more bytes")]
    Truncated { needed: usize },

    /// Value does not fit in a 62-bit varint.
    #[error("varint value {0} exceeds 2^62-1")]
    VarIntOutOfRange(u64),

    /// Frame type byte is not assigned.
    #[error("unknown frame type 0x{0:02x}")]
    UnknownFrameType(u8),

    /// The declared frame size disagrees with the bytes its body decoded from.
    #[error("frame size mismatch: declared {declared} bytes, body used {consumed}")]
    SizeMismatch { declared: u64, consumed: u64 },

    /// A frame exceeds the size accepted by the receiver.
    #[error("frame body of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: u64, limit: u64 },

    /// InitializeAck/Version discriminator is neither 0 nor 1.
    #[error("invalid InitializeAck/Version discriminator {0}")]
    InvalidDiscriminator(u64),

    /// A stream-scoped frame was decoded without a stream ID, or the reverse.
    #[error("stream ID missing or unexpected for {0:?}")]
    StreamIdMismatch(crate::frames::FrameType),

    /// The same parameter appears twice in a parameter block.
    #[error("duplicate parameter 0x{0:x}")]
    DuplicateParameter(u64),
}

impl Error {
    /// Whether more input could turn this error into a successful decode.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Error::Truncated { .. })
    }
}
