//! # Connection Parameters
//!
//! Parameters are carried by the Initialize and InitializeAck frames as a
//! count followed by `(id, value)` varint pairs. Unknown IDs are kept so a
//! decoded block re-encodes to the same bytes.

#![forbid(unsafe_code)]

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};
use crate::varint;

/// Parameter ID
pub type ParameterId = u64;

pub const PARAM_MAX_BIDIRECTIONAL_STREAMS: ParameterId = 0x00;
pub const PARAM_MAX_UNIDIRECTIONAL_STREAMS: ParameterId = 0x01;
pub const PARAM_IDLE_TIMEOUT: ParameterId = 0x02;
pub const PARAM_PAUSE_WRITER_THRESHOLD: ParameterId = 0x03;
pub const PARAM_MAX_STREAM_FRAME_SIZE: ParameterId = 0x04;

/// Negotiable values sent by one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    /// Concurrent bidirectional streams the sender accepts from its peer.
    pub max_bidirectional_streams: Option<u64>,

    /// Concurrent unidirectional streams the sender accepts from its peer.
    pub max_unidirectional_streams: Option<u64>,

    /// Idle timeout in milliseconds; 0 disables it.
    pub idle_timeout_ms: Option<u64>,

    /// Bytes the peer may send on one stream before waiting for a
    /// StreamConsumed frame. This is the peer's initial per-stream credit.
    pub pause_writer_threshold: Option<u64>,

    /// Largest Stream frame payload the sender is willing to receive.
    pub max_stream_frame_size: Option<u64>,

    /// Parameters this implementation does not understand, in wire order.
    pub unknown: Vec<(ParameterId, u64)>,
}

impl Parameters {
    fn known(&self) -> [(ParameterId, Option<u64>); 5] {
        [
            (PARAM_MAX_BIDIRECTIONAL_STREAMS, self.max_bidirectional_streams),
            (PARAM_MAX_UNIDIRECTIONAL_STREAMS, self.max_unidirectional_streams),
            (PARAM_IDLE_TIMEOUT, self.idle_timeout_ms),
            (PARAM_PAUSE_WRITER_THRESHOLD, self.pause_writer_threshold),
            (PARAM_MAX_STREAM_FRAME_SIZE, self.max_stream_frame_size),
        ]
    }

    fn pairs(&self) -> impl Iterator<Item = (ParameterId, u64)> + '_ {
        self.known()
            .into_iter()
            .filter_map(|(id, value)| value.map(|v| (id, v)))
            .chain(self.unknown.iter().copied())
    }

    /// Number of bytes [`encode`](Self::encode) writes.
    pub fn encoded_len(&self) -> usize {
        let mut count = 0u64;
        let mut len = 0;
        for (id, value) in self.pairs() {
            count += 1;
            len += varint::encoded_len(id) + varint::encoded_len(value);
        }
        varint::encoded_len(count) + len
    }

    /// Fail if any ID or value does not fit in a varint.
    pub(crate) fn check_range(&self) -> Result<()> {
        for (id, value) in self.pairs() {
            if let Some(bad) = [id, value].into_iter().find(|v| *v > varint::MAX) {
                return Err(Error::VarIntOutOfRange(bad));
            }
        }
        Ok(())
    }

    /// Append the parameter block to `buf`.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let count = self.pairs().count() as u64;
        varint::encode_buf(count, buf)?;
        for (id, value) in self.pairs() {
            varint::encode_buf(id, buf)?;
            varint::encode_buf(value, buf)?;
        }
        Ok(())
    }

    /// Read a parameter block from the front of `buf`.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let count = varint::decode_buf(buf)?;
        let mut params = Parameters::default();
        let mut seen: Vec<ParameterId> = Vec::new();

        for _ in 0..count {
            let id = varint::decode_buf(buf)?;
            let value = varint::decode_buf(buf)?;
            if seen.contains(&id) {
                return Err(Error::DuplicateParameter(id));
            }
            seen.push(id);

            let slot = match id {
                PARAM_MAX_BIDIRECTIONAL_STREAMS => &mut params.max_bidirectional_streams,
                PARAM_MAX_UNIDIRECTIONAL_STREAMS => &mut params.max_unidirectional_streams,
                PARAM_IDLE_TIMEOUT => &mut params.idle_timeout_ms,
                PARAM_PAUSE_WRITER_THRESHOLD => &mut params.pause_writer_threshold,
                PARAM_MAX_STREAM_FRAME_SIZE => &mut params.max_stream_frame_size,
                _ => {
                    params.unknown.push((id, value));
                    continue;
                }
            };
            *slot = Some(value);
        }
        Ok(params)
    }
}
