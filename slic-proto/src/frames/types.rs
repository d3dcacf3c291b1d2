//! # Slic Frame Types
//!
//! ## Frame Classification:
//! - **Connection frames**: Initialize, InitializeAck, Version
//! - **Stream frames**: Stream, StreamLast, StreamReset, StreamConsumed,
//!   StreamStopSending (carry a stream ID after the size field)
//!
//! InitializeAck and Version share one type byte. Their bodies start with a
//! discriminator varint telling them apart.

#![forbid(unsafe_code)]

use bytes::Bytes;

use crate::params::Parameters;
use crate::types::StreamId;

/// Frame Type Constants
pub const FRAME_TYPE_INITIALIZE: u8 = 0x01;
pub const FRAME_TYPE_INITIALIZE_ACK: u8 = 0x02;
pub const FRAME_TYPE_STREAM: u8 = 0x03;
pub const FRAME_TYPE_STREAM_LAST: u8 = 0x04;
pub const FRAME_TYPE_STREAM_RESET: u8 = 0x05;
pub const FRAME_TYPE_STREAM_CONSUMED: u8 = 0x06;
pub const FRAME_TYPE_STREAM_STOP_SENDING: u8 = 0x07;

/// Body discriminators inside the shared InitializeAck/Version slot.
pub const DISCRIMINATOR_INITIALIZE_ACK: u64 = 0;
pub const DISCRIMINATOR_VERSION: u64 = 1;

/// Wire frame type. Version frames travel as [`FrameType::InitializeAck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Initialize,
    InitializeAck,
    Stream,
    StreamLast,
    StreamReset,
    StreamConsumed,
    StreamStopSending,
}

impl FrameType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            FRAME_TYPE_INITIALIZE => FrameType::Initialize,
            FRAME_TYPE_INITIALIZE_ACK => FrameType::InitializeAck,
            FRAME_TYPE_STREAM => FrameType::Stream,
            FRAME_TYPE_STREAM_LAST => FrameType::StreamLast,
            FRAME_TYPE_STREAM_RESET => FrameType::StreamReset,
            FRAME_TYPE_STREAM_CONSUMED => FrameType::StreamConsumed,
            FRAME_TYPE_STREAM_STOP_SENDING => FrameType::StreamStopSending,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FrameType::Initialize => FRAME_TYPE_INITIALIZE,
            FrameType::InitializeAck => FRAME_TYPE_INITIALIZE_ACK,
            FrameType::Stream => FRAME_TYPE_STREAM,
            FrameType::StreamLast => FRAME_TYPE_STREAM_LAST,
            FrameType::StreamReset => FRAME_TYPE_STREAM_RESET,
            FrameType::StreamConsumed => FRAME_TYPE_STREAM_CONSUMED,
            FrameType::StreamStopSending => FRAME_TYPE_STREAM_STOP_SENDING,
        }
    }

    /// Whether the header carries a stream ID.
    pub fn is_stream_scoped(self) -> bool {
        !matches!(self, FrameType::Initialize | FrameType::InitializeAck)
    }

    /// Stream and StreamLast carry application payload.
    pub fn carries_data(self) -> bool {
        matches!(self, FrameType::Stream | FrameType::StreamLast)
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FrameType::Initialize => "Initialize",
            FrameType::InitializeAck => "InitializeAck",
            FrameType::Stream => "Stream",
            FrameType::StreamLast => "StreamLast",
            FrameType::StreamReset => "StreamReset",
            FrameType::StreamConsumed => "StreamConsumed",
            FrameType::StreamStopSending => "StreamStopSending",
        };
        f.write_str(name)
    }
}

/// Initialize: first frame sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeFrame {
    pub version: u64,
    pub parameters: Parameters,
}

/// InitializeAck: server acceptance of an Initialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeAckFrame {
    pub parameters: Parameters,
}

/// Version: server rejection of the offered version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionFrame {
    pub versions: Vec<u64>,
}

/// Payload for Stream and StreamLast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub stream_id: StreamId,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamResetFrame {
    pub stream_id: StreamId,
    pub error_code: u64,
}

/// Returns `size` bytes of send credit to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConsumedFrame {
    pub stream_id: StreamId,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStopSendingFrame {
    pub stream_id: StreamId,
    pub error_code: u64,
}

/// Slic Frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Initialize(InitializeFrame),
    InitializeAck(InitializeAckFrame),
    Version(VersionFrame),
    Stream(StreamFrame),
    StreamLast(StreamFrame),
    StreamReset(StreamResetFrame),
    StreamConsumed(StreamConsumedFrame),
    StreamStopSending(StreamStopSendingFrame),
}

impl Frame {
    /// Wire type of this frame.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Initialize(_) => FrameType::Initialize,
            Frame::InitializeAck(_) | Frame::Version(_) => FrameType::InitializeAck,
            Frame::Stream(_) => FrameType::Stream,
            Frame::StreamLast(_) => FrameType::StreamLast,
            Frame::StreamReset(_) => FrameType::StreamReset,
            Frame::StreamConsumed(_) => FrameType::StreamConsumed,
            Frame::StreamStopSending(_) => FrameType::StreamStopSending,
        }
    }

    /// Stream the frame belongs to, if any.
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            Frame::Initialize(_) | Frame::InitializeAck(_) | Frame::Version(_) => None,
            Frame::Stream(f) | Frame::StreamLast(f) => Some(f.stream_id),
            Frame::StreamReset(f) => Some(f.stream_id),
            Frame::StreamConsumed(f) => Some(f.stream_id),
            Frame::StreamStopSending(f) => Some(f.stream_id),
        }
    }
}
