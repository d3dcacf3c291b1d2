//! Connection and stream errors.
//!
//! Connection errors are cloned into every stream a connection fault
//! touches, so they keep I/O errors behind an `Arc`.

use std::io;
use std::sync::Arc;

use slic_proto::{StreamDirection, StreamId};
use thiserror::Error;

/// Failure that ends a whole connection.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The peer sent bytes that are not a valid frame.
    #[error("decode error: {0}")]
    Decode(#[from] slic_proto::Error),

    /// The peer sent more than its granted window, or returned more credit
    /// than it was owed.
    #[error("flow control violation on stream {stream_id}")]
    FlowControlViolation { stream_id: StreamId },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// No frame arrived within the negotiated idle timeout.
    #[error("connection idle timeout")]
    IdleTimeout,

    /// Version negotiation found no common version.
    #[error("no common protocol version, peer supports {peer_versions:?}")]
    UnsupportedVersion { peer_versions: Vec<u64> },

    #[error("handshake timed out")]
    HandshakeTimeout,

    /// Streams did not drain before the shutdown deadline.
    #[error("shutdown deadline expired with streams still open")]
    ShutdownTimeout,

    /// The peer closed its side while streams were still open.
    #[error("connection closed by peer")]
    ClosedByPeer,

    /// The connection was closed, locally or remotely.
    #[error("connection closed: {0}")]
    Closed(String),

    /// The connection no longer opens streams.
    #[error("connection is shutting down")]
    ShuttingDown,

    /// The local configuration was rejected before connecting.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The connection writer was cancelled before the operation completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Io(Arc::new(err))
    }
}

impl ConnectionError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        ConnectionError::ProtocolViolation(message.into())
    }
}

/// Failure of a single stream. Other streams are unaffected unless the
/// variant is [`StreamError::Connection`].
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// The stream was reset. `remote` is true when the peer reset it.
    #[error("stream reset with error code {error_code} (remote: {remote})")]
    Reset { error_code: u64, remote: bool },

    /// Sending was stopped. With `remote` set the peer asked this side to
    /// stop writing; otherwise this side stopped reading.
    #[error("stream stopped with error code {error_code} (remote: {remote})")]
    Stopped { error_code: u64, remote: bool },

    /// Write after the stream was finished.
    #[error("stream already finished")]
    Finished,

    /// Write on a unidirectional stream opened by the peer.
    #[error("stream is not writable")]
    NotWritable,

    /// Read on a unidirectional stream opened by this side.
    #[error("stream is not readable")]
    NotReadable,

    /// All stream slots of this direction are in use.
    #[error("{direction} stream limit of {limit} reached")]
    Capacity {
        direction: StreamDirection,
        limit: u64,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl StreamError {
    /// Whether this error came from a connection-wide failure.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, StreamError::Connection(_))
    }
}
