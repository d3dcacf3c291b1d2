//! Slic connection configuration and tunable parameters.
//!
//! Values sent to the peer in the Initialize or InitializeAck frame describe
//! what *this* side accepts: stream limits bound streams the peer opens, the
//! pause-writer threshold is the credit the peer gets on each stream.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use slic_proto::params::Parameters;
use slic_proto::version::SUPPORTED_VERSIONS;

/// Configuration for one Slic connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlicConfig {
    /// Maximum number of concurrent bidirectional streams the peer may open (default: 100).
    pub max_bidirectional_streams: u64,

    /// Maximum number of concurrent unidirectional streams the peer may open (default: 100).
    pub max_unidirectional_streams: u64,

    /// Bytes the peer may send on a stream before it must wait for a
    /// StreamConsumed frame (default: 64 KB).
    ///
    /// Bounds receive buffering to this value per stream.
    pub pause_writer_threshold: u64,

    /// Bytes the application must consume before a StreamConsumed frame
    /// returns them to the peer (default: 32 KB).
    ///
    /// Must not exceed `pause_writer_threshold`. Lower values release credit
    /// sooner at the cost of more control frames.
    pub resume_writer_threshold: u64,

    /// Largest Stream frame payload this side accepts (default: 32 KB).
    pub max_stream_frame_size: u64,

    /// Idle timeout in milliseconds (default: 60 seconds). 0 disables it.
    ///
    /// The effective timeout is the smaller non-zero value of both sides.
    pub idle_timeout_ms: u64,

    /// Time allowed for the Initialize exchange (default: 10 seconds).
    pub handshake_timeout_ms: u64,

    /// Size of each read from the duplex connection (default: 16 KB).
    pub read_buffer_size: usize,

    /// Protocol versions, most preferred first (default: `[1]`).
    pub versions: Vec<u64>,
}

impl Default for SlicConfig {
    fn default() -> Self {
        Self {
            max_bidirectional_streams: 100,
            max_unidirectional_streams: 100,
            pause_writer_threshold: 64 * 1024,  // 64 KB
            resume_writer_threshold: 32 * 1024, // 32 KB
            max_stream_frame_size: 32 * 1024,   // 32 KB
            idle_timeout_ms: 60_000,
            handshake_timeout_ms: 10_000,
            read_buffer_size: 16 * 1024, // 16 KB
            versions: SUPPORTED_VERSIONS.to_vec(),
        }
    }
}

impl SlicConfig {
    /// Create a configuration optimized for high-throughput scenarios.
    ///
    /// Larger per-stream windows keep fast links busy at the cost of more
    /// buffering per stream.
    pub fn high_throughput() -> Self {
        Self {
            max_bidirectional_streams: 1000,
            max_unidirectional_streams: 1000,
            pause_writer_threshold: 1024 * 1024,   // 1 MB
            resume_writer_threshold: 512 * 1024,   // 512 KB
            max_stream_frame_size: 256 * 1024,     // 256 KB
            read_buffer_size: 64 * 1024,           // 64 KB
            ..Default::default()
        }
    }

    /// Create a configuration optimized for memory-constrained environments.
    ///
    /// Connection memory is bounded by stream limits times the pause-writer
    /// threshold, so both are kept small.
    pub fn low_memory() -> Self {
        Self {
            max_bidirectional_streams: 10,
            max_unidirectional_streams: 10,
            pause_writer_threshold: 8 * 1024, // 8 KB
            resume_writer_threshold: 4 * 1024,
            max_stream_frame_size: 4 * 1024,
            read_buffer_size: 4 * 1024,
            ..Default::default()
        }
    }

    /// Idle timeout as a duration, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Parameters advertised to the peer.
    pub fn parameters(&self) -> Parameters {
        Parameters {
            max_bidirectional_streams: Some(self.max_bidirectional_streams),
            max_unidirectional_streams: Some(self.max_unidirectional_streams),
            idle_timeout_ms: Some(self.idle_timeout_ms),
            pause_writer_threshold: Some(self.pause_writer_threshold),
            max_stream_frame_size: Some(self.max_stream_frame_size),
            unknown: Vec::new(),
        }
    }

    /// Validate configuration values are within reasonable bounds.
    pub fn validate(&self) -> Result<(), String> {
        let max = slic_proto::varint::MAX;
        if self.max_bidirectional_streams > max >> 2 || self.max_unidirectional_streams > max >> 2
        {
            return Err("stream limits exceed the stream ID space".into());
        }
        if self.pause_writer_threshold == 0 {
            return Err("pause_writer_threshold must be non-zero".into());
        }
        if self.pause_writer_threshold > max {
            return Err("pause_writer_threshold exceeds 2^62-1".into());
        }
        if self.resume_writer_threshold == 0 {
            return Err("resume_writer_threshold must be non-zero".into());
        }
        if self.resume_writer_threshold > self.pause_writer_threshold {
            return Err("resume_writer_threshold cannot exceed pause_writer_threshold".into());
        }
        if self.max_stream_frame_size == 0 {
            return Err("max_stream_frame_size must be non-zero".into());
        }
        if self.handshake_timeout_ms == 0 {
            return Err("handshake_timeout_ms must be non-zero".into());
        }
        if self.read_buffer_size == 0 {
            return Err("read_buffer_size must be non-zero".into());
        }
        if self.versions.is_empty() {
            return Err("at least one protocol version is required".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SlicConfig::default().validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(SlicConfig::high_throughput().validate().is_ok());
        assert!(SlicConfig::low_memory().validate().is_ok());
    }

    #[test]
    fn test_resume_above_pause_rejected() {
        let config = SlicConfig {
            pause_writer_threshold: 10,
            resume_writer_threshold: 11,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_versions_rejected() {
        let config = SlicConfig {
            versions: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_idle_timeout_zero_disables() {
        let config = SlicConfig {
            idle_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(
            SlicConfig::default().idle_timeout(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_parameters_mirror_config() {
        let params = SlicConfig::low_memory().parameters();
        assert_eq!(params.max_bidirectional_streams, Some(10));
        assert_eq!(params.pause_writer_threshold, Some(8 * 1024));
    }
}
