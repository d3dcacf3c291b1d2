//! Initialize exchange and parameter negotiation.
//!
//! Client: send Initialize with the preferred version. An InitializeAck
//! completes the handshake; a Version frame lists what the server speaks and
//! the client retries once with the best common version.
//!
//! Server: answer an Initialize with a supported version with InitializeAck,
//! otherwise reply with a Version frame and wait for the retry.

use std::time::Duration;

use slic_proto::frames::{InitializeAckFrame, InitializeFrame, VersionFrame};
use slic_proto::version::{is_supported, select_version};
use slic_proto::{Frame, Parameters};
use tracing::debug;

use super::reader::FrameReader;
use crate::config::SlicConfig;
use crate::duplex::DuplexRead;
use crate::error::ConnectionError;
use crate::writer::ConnectionWriter;

/// Peer stream frames are capped at this size when it does not say.
pub const DEFAULT_MAX_STREAM_FRAME_SIZE: u64 = 32 * 1024;

/// Values both sides agreed on during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedParameters {
    pub version: u64,
    /// Bidirectional streams this side may have open at once.
    pub peer_max_bidirectional_streams: u64,
    /// Unidirectional streams this side may have open at once.
    pub peer_max_unidirectional_streams: u64,
    /// Initial send credit of every stream.
    pub peer_pause_writer_threshold: u64,
    /// Largest Stream frame payload the peer accepts.
    pub peer_max_stream_frame_size: u64,
    /// Smaller non-zero idle timeout of both sides.
    pub idle_timeout: Option<Duration>,
}

impl NegotiatedParameters {
    pub(crate) fn negotiate(
        version: u64,
        config: &SlicConfig,
        peer: &Parameters,
    ) -> Result<Self, ConnectionError> {
        let peer_pause_writer_threshold = match peer.pause_writer_threshold {
            Some(value) if value > 0 => value,
            _ => {
                return Err(ConnectionError::protocol(
                    "peer did not send a pause writer threshold",
                ))
            }
        };
        let peer_max_stream_frame_size = match peer.max_stream_frame_size {
            None => DEFAULT_MAX_STREAM_FRAME_SIZE,
            Some(0) => {
                return Err(ConnectionError::protocol(
                    "peer max stream frame size is zero",
                ))
            }
            Some(value) => value,
        };

        let idle_ms = [config.idle_timeout_ms, peer.idle_timeout_ms.unwrap_or(0)]
            .into_iter()
            .filter(|ms| *ms > 0)
            .min();

        Ok(Self {
            version,
            peer_max_bidirectional_streams: peer.max_bidirectional_streams.unwrap_or(0),
            peer_max_unidirectional_streams: peer.max_unidirectional_streams.unwrap_or(0),
            peer_pause_writer_threshold,
            peer_max_stream_frame_size,
            idle_timeout: idle_ms.map(Duration::from_millis),
        })
    }
}

enum ClientState {
    Unconnected { version: u64 },
    AwaitingAck { version: u64 },
}

pub(crate) async fn connect<R: DuplexRead>(
    reader: &mut FrameReader<R>,
    writer: &ConnectionWriter,
    config: &SlicConfig,
) -> Result<NegotiatedParameters, ConnectionError> {
    let first = *config
        .versions
        .first()
        .ok_or_else(|| ConnectionError::Config("no protocol version configured".into()))?;
    let mut state = ClientState::Unconnected { version: first };
    let mut retried = false;

    loop {
        state = match state {
            ClientState::Unconnected { version } => {
                debug!(version, "sending initialize");
                writer.write_frame(&Frame::Initialize(InitializeFrame {
                    version,
                    parameters: config.parameters(),
                }))?;
                writer.flush().await?;
                ClientState::AwaitingAck { version }
            }
            ClientState::AwaitingAck { version } => match reader.read_frame().await? {
                Some(Frame::InitializeAck(ack)) => {
                    return NegotiatedParameters::negotiate(version, config, &ack.parameters);
                }
                Some(Frame::Version(frame)) => {
                    debug!(offered = version, peer_versions = ?frame.versions, "peer rejected version");
                    match select_version(&config.versions, &frame.versions) {
                        Some(next) if !retried && next != version => {
                            retried = true;
                            ClientState::Unconnected { version: next }
                        }
                        _ => {
                            return Err(ConnectionError::UnsupportedVersion {
                                peer_versions: frame.versions,
                            })
                        }
                    }
                }
                Some(other) => {
                    return Err(ConnectionError::protocol(format!(
                        "unexpected {} frame during handshake",
                        other.frame_type()
                    )))
                }
                None => return Err(ConnectionError::ClosedByPeer),
            },
        };
    }
}

pub(crate) async fn accept<R: DuplexRead>(
    reader: &mut FrameReader<R>,
    writer: &ConnectionWriter,
    config: &SlicConfig,
) -> Result<NegotiatedParameters, ConnectionError> {
    let mut rejected = false;
    loop {
        match reader.read_frame().await? {
            Some(Frame::Initialize(init)) => {
                if is_supported(&config.versions, init.version) {
                    let negotiated =
                        NegotiatedParameters::negotiate(init.version, config, &init.parameters)?;
                    writer.write_frame(&Frame::InitializeAck(InitializeAckFrame {
                        parameters: config.parameters(),
                    }))?;
                    writer.flush().await?;
                    return Ok(negotiated);
                }
                if rejected {
                    return Err(ConnectionError::UnsupportedVersion {
                        peer_versions: vec![init.version],
                    });
                }
                debug!(version = init.version, supported = ?config.versions, "rejecting initialize version");
                rejected = true;
                writer.write_frame(&Frame::Version(VersionFrame {
                    versions: config.versions.clone(),
                }))?;
                writer.flush().await?;
            }
            Some(other) => {
                return Err(ConnectionError::protocol(format!(
                    "expected initialize, got {} frame",
                    other.frame_type()
                )))
            }
            None => return Err(ConnectionError::ClosedByPeer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Parameters {
        Parameters {
            max_bidirectional_streams: Some(4),
            pause_writer_threshold: Some(1000),
            idle_timeout_ms: Some(5_000),
            ..Default::default()
        }
    }

    #[test]
    fn test_negotiate_defaults_missing_values() {
        let negotiated = NegotiatedParameters::negotiate(1, &SlicConfig::default(), &peer()).unwrap();
        assert_eq!(negotiated.peer_max_bidirectional_streams, 4);
        assert_eq!(negotiated.peer_max_unidirectional_streams, 0);
        assert_eq!(negotiated.peer_pause_writer_threshold, 1000);
        assert_eq!(negotiated.peer_max_stream_frame_size, DEFAULT_MAX_STREAM_FRAME_SIZE);
        assert_eq!(negotiated.idle_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_negotiate_idle_timeout_ignores_zero() {
        let config = SlicConfig {
            idle_timeout_ms: 0,
            ..Default::default()
        };
        let negotiated = NegotiatedParameters::negotiate(1, &config, &peer()).unwrap();
        assert_eq!(negotiated.idle_timeout, Some(Duration::from_secs(5)));

        let mut silent = peer();
        silent.idle_timeout_ms = Some(0);
        let negotiated = NegotiatedParameters::negotiate(1, &config, &silent).unwrap();
        assert_eq!(negotiated.idle_timeout, None);
    }

    #[test]
    fn test_negotiate_requires_pause_threshold() {
        let mut params = peer();
        params.pause_writer_threshold = None;
        assert!(matches!(
            NegotiatedParameters::negotiate(1, &SlicConfig::default(), &params),
            Err(ConnectionError::ProtocolViolation(_))
        ));
    }
}
