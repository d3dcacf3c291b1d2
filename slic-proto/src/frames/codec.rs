//! # Frame Encoding and Decoding
//!
//! Decoding is split in two steps. [`decode_header`] needs only the header
//! bytes and reports the body size; [`decode_body`] takes exactly that many
//! bytes once they are available. [`Frame::decode`] combines both for
//! callers that hold the whole frame in one buffer.

#![forbid(unsafe_code)]

use bytes::{Buf, BufMut, Bytes};

use super::types::*;
use crate::error::{Error, Result};
use crate::params::Parameters;
use crate::types::StreamId;
use crate::varint;

/// Upper bound on the body of any frame that does not carry stream data.
pub const MAX_CONTROL_FRAME_SIZE: u64 = 16 * 1024;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    /// Body length in bytes, not counting the stream ID.
    pub size: u64,
    pub stream_id: Option<StreamId>,
}

impl FrameHeader {
    /// Number of bytes the header occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        1 + varint::encoded_len(self.size)
            + self
                .stream_id
                .map_or(0, |id| varint::encoded_len(id.value()))
    }
}

/// Decode a frame header from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete header, or
/// the header and the number of bytes it used.
pub fn decode_header(buf: &[u8]) -> Result<Option<(FrameHeader, usize)>> {
    let Some(&type_byte) = buf.first() else {
        return Ok(None);
    };
    let frame_type = FrameType::from_u8(type_byte).ok_or(Error::UnknownFrameType(type_byte))?;
    let mut pos = 1;

    let size = match varint::decode(&buf[pos..]) {
        Ok((size, used)) => {
            pos += used;
            size
        }
        Err(e) if e.is_truncated() => return Ok(None),
        Err(e) => return Err(e),
    };

    if !frame_type.carries_data() && size > MAX_CONTROL_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size,
            limit: MAX_CONTROL_FRAME_SIZE,
        });
    }

    let stream_id = if frame_type.is_stream_scoped() {
        match varint::decode(&buf[pos..]) {
            Ok((id, used)) => {
                pos += used;
                Some(StreamId::new(id))
            }
            Err(e) if e.is_truncated() => return Ok(None),
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    Ok(Some((
        FrameHeader {
            frame_type,
            size,
            stream_id,
        },
        pos,
    )))
}

/// Write a frame header announcing a body of `size` bytes.
pub fn encode_header<B: BufMut>(
    frame_type: FrameType,
    size: u64,
    stream_id: Option<StreamId>,
    buf: &mut B,
) -> Result<()> {
    if frame_type.is_stream_scoped() != stream_id.is_some() {
        return Err(Error::StreamIdMismatch(frame_type));
    }
    // Validate every varint before writing so a failure leaves `buf` alone.
    if size > varint::MAX {
        return Err(Error::VarIntOutOfRange(size));
    }
    if let Some(id) = stream_id.filter(|id| id.value() > varint::MAX) {
        return Err(Error::VarIntOutOfRange(id.value()));
    }

    buf.put_u8(frame_type.as_u8());
    varint::encode_buf(size, buf)?;
    if let Some(id) = stream_id {
        varint::encode_buf(id.value(), buf)?;
    }
    Ok(())
}

/// Decode the body of a frame whose header was already read.
///
/// `body` must hold exactly `header.size` bytes, and the body encoding must
/// use all of them.
pub fn decode_body(header: &FrameHeader, body: Bytes) -> Result<Frame> {
    let declared = header.size;
    if body.len() as u64 != declared {
        return Err(Error::SizeMismatch {
            declared,
            consumed: body.len() as u64,
        });
    }

    let stream_id = || header.stream_id.ok_or(Error::StreamIdMismatch(header.frame_type));
    let mut buf = body;

    let frame = match header.frame_type {
        FrameType::Stream => {
            return Ok(Frame::Stream(StreamFrame {
                stream_id: stream_id()?,
                data: buf,
            }))
        }
        FrameType::StreamLast => {
            return Ok(Frame::StreamLast(StreamFrame {
                stream_id: stream_id()?,
                data: buf,
            }))
        }
        other => decode_control_body(other, stream_id, &mut buf).map_err(|e| match e {
            // The body ended early: the declared size was too small.
            Error::Truncated { needed } => Error::SizeMismatch {
                declared,
                consumed: declared + needed as u64,
            },
            e => e,
        })?,
    };

    if buf.has_remaining() {
        return Err(Error::SizeMismatch {
            declared,
            consumed: declared - buf.remaining() as u64,
        });
    }
    Ok(frame)
}

fn decode_control_body(
    frame_type: FrameType,
    stream_id: impl Fn() -> Result<StreamId>,
    buf: &mut Bytes,
) -> Result<Frame> {
    Ok(match frame_type {
        FrameType::Initialize => {
            let version = varint::decode_buf(buf)?;
            let parameters = Parameters::decode(buf)?;
            Frame::Initialize(InitializeFrame {
                version,
                parameters,
            })
        }
        FrameType::InitializeAck => match varint::decode_buf(buf)? {
            DISCRIMINATOR_INITIALIZE_ACK => Frame::InitializeAck(InitializeAckFrame {
                parameters: Parameters::decode(buf)?,
            }),
            DISCRIMINATOR_VERSION => {
                let count = varint::decode_buf(buf)?;
                // Each version needs at least one byte.
                let mut versions = Vec::with_capacity(count.min(buf.remaining() as u64) as usize);
                for _ in 0..count {
                    versions.push(varint::decode_buf(buf)?);
                }
                Frame::Version(VersionFrame { versions })
            }
            other => return Err(Error::InvalidDiscriminator(other)),
        },
        FrameType::StreamReset => Frame::StreamReset(StreamResetFrame {
            stream_id: stream_id()?,
            error_code: varint::decode_buf(buf)?,
        }),
        FrameType::StreamConsumed => Frame::StreamConsumed(StreamConsumedFrame {
            stream_id: stream_id()?,
            size: varint::decode_buf(buf)?,
        }),
        FrameType::StreamStopSending => Frame::StreamStopSending(StreamStopSendingFrame {
            stream_id: stream_id()?,
            error_code: varint::decode_buf(buf)?,
        }),
        FrameType::Stream | FrameType::StreamLast => {
            unreachable!("data frames are decoded by decode_body")
        }
    })
}

impl Frame {
    /// Length of the body, which is the value of the header's size field.
    pub fn body_len(&self) -> usize {
        match self {
            Frame::Initialize(f) => varint::encoded_len(f.version) + f.parameters.encoded_len(),
            Frame::InitializeAck(f) => {
                varint::encoded_len(DISCRIMINATOR_INITIALIZE_ACK) + f.parameters.encoded_len()
            }
            Frame::Version(f) => {
                varint::encoded_len(DISCRIMINATOR_VERSION)
                    + varint::encoded_len(f.versions.len() as u64)
                    + f.versions.iter().map(|v| varint::encoded_len(*v)).sum::<usize>()
            }
            Frame::Stream(f) | Frame::StreamLast(f) => f.data.len(),
            Frame::StreamReset(f) => varint::encoded_len(f.error_code),
            Frame::StreamConsumed(f) => varint::encoded_len(f.size),
            Frame::StreamStopSending(f) => varint::encoded_len(f.error_code),
        }
    }

    /// Total encoded length, header included.
    pub fn encoded_len(&self) -> usize {
        FrameHeader {
            frame_type: self.frame_type(),
            size: self.body_len() as u64,
            stream_id: self.stream_id(),
        }
        .encoded_len()
            + self.body_len()
    }

    /// Append the encoded frame to `buf`. On error nothing is written.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        self.check_body_range()?;
        encode_header(
            self.frame_type(),
            self.body_len() as u64,
            self.stream_id(),
            buf,
        )?;

        match self {
            Frame::Initialize(f) => {
                varint::encode_buf(f.version, buf)?;
                f.parameters.encode(buf)?;
            }
            Frame::InitializeAck(f) => {
                varint::encode_buf(DISCRIMINATOR_INITIALIZE_ACK, buf)?;
                f.parameters.encode(buf)?;
            }
            Frame::Version(f) => {
                varint::encode_buf(DISCRIMINATOR_VERSION, buf)?;
                varint::encode_buf(f.versions.len() as u64, buf)?;
                for version in &f.versions {
                    varint::encode_buf(*version, buf)?;
                }
            }
            Frame::Stream(f) | Frame::StreamLast(f) => buf.put_slice(&f.data),
            Frame::StreamReset(f) => {
                varint::encode_buf(f.error_code, buf)?;
            }
            Frame::StreamConsumed(f) => {
                varint::encode_buf(f.size, buf)?;
            }
            Frame::StreamStopSending(f) => {
                varint::encode_buf(f.error_code, buf)?;
            }
        }
        Ok(())
    }

    fn check_body_range(&self) -> Result<()> {
        let in_range = |value: u64| {
            if value > varint::MAX {
                Err(Error::VarIntOutOfRange(value))
            } else {
                Ok(())
            }
        };
        match self {
            Frame::Initialize(f) => {
                in_range(f.version)?;
                f.parameters.check_range()
            }
            Frame::InitializeAck(f) => f.parameters.check_range(),
            Frame::Version(f) => f.versions.iter().try_for_each(|v| in_range(*v)),
            Frame::Stream(_) | Frame::StreamLast(_) => Ok(()),
            Frame::StreamReset(f) => in_range(f.error_code),
            Frame::StreamConsumed(f) => in_range(f.size),
            Frame::StreamStopSending(f) => in_range(f.error_code),
        }
    }

    /// Decode one complete frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched if the frame is not
    /// complete yet.
    pub fn decode(buf: &mut Bytes) -> Result<Option<Frame>> {
        let Some((header, header_len)) = decode_header(&buf[..])? else {
            return Ok(None);
        };
        let total = header_len as u64 + header.size;
        if (buf.len() as u64) < total {
            return Ok(None);
        }

        buf.advance(header_len);
        let body = buf.split_to(header.size as usize);
        decode_body(&header, body).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encode(frame: &Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_stream_frame_layout() {
        let frame = Frame::Stream(StreamFrame {
            stream_id: StreamId::new(4),
            data: Bytes::from_static(b"hello"),
        });
        let buf = encode(&frame);
        // type, size=5, stream id=4, payload
        assert_eq!(&buf[..], &[0x03, 0x05, 0x04, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(buf.len(), frame.encoded_len());
    }

    #[test]
    fn test_header_without_body() {
        let frame = Frame::StreamLast(StreamFrame {
            stream_id: StreamId::new(1),
            data: Bytes::from(vec![0u8; 300]),
        });
        let buf = encode(&frame);

        // Header alone is decodable before the body has arrived.
        let (header, used) = decode_header(&buf[..4]).unwrap().unwrap();
        assert_eq!(header.frame_type, FrameType::StreamLast);
        assert_eq!(header.size, 300);
        assert_eq!(header.stream_id, Some(StreamId::new(1)));
        assert_eq!(used, header.encoded_len());

        // The 2-byte size varint is cut: no header yet.
        assert_eq!(decode_header(&buf[..2]).unwrap(), None);
    }

    #[test]
    fn test_ack_and_version_share_type() {
        let ack = encode(&Frame::InitializeAck(InitializeAckFrame {
            parameters: Parameters::default(),
        }));
        let version = encode(&Frame::Version(VersionFrame { versions: vec![2] }));
        assert_eq!(ack[0], version[0]);

        let mut bytes = version.freeze();
        assert_eq!(
            Frame::decode(&mut bytes).unwrap(),
            Some(Frame::Version(VersionFrame { versions: vec![2] }))
        );
    }

    #[test]
    fn test_invalid_discriminator() {
        // InitializeAck slot, size 1, discriminator 2
        let mut bytes = Bytes::from_static(&[0x02, 0x01, 0x02]);
        assert_eq!(
            Frame::decode(&mut bytes),
            Err(Error::InvalidDiscriminator(2))
        );
    }

    #[test]
    fn test_declared_size_too_large() {
        // StreamReset announcing 2 body bytes but the code only uses 1.
        let mut bytes = Bytes::from_static(&[0x05, 0x02, 0x00, 0x07, 0x00]);
        assert_eq!(
            Frame::decode(&mut bytes),
            Err(Error::SizeMismatch {
                declared: 2,
                consumed: 1
            })
        );
    }

    #[test]
    fn test_declared_size_too_small() {
        // StreamConsumed announcing 1 body byte holding a 2-byte varint.
        let mut bytes = Bytes::from_static(&[0x06, 0x01, 0x00, 0x40]);
        assert_eq!(
            Frame::decode(&mut bytes),
            Err(Error::SizeMismatch {
                declared: 1,
                consumed: 2
            })
        );
    }

    #[test]
    fn test_body_length_must_match_header() {
        let header = FrameHeader {
            frame_type: FrameType::Stream,
            size: 4,
            stream_id: Some(StreamId::new(0)),
        };
        assert_eq!(
            decode_body(&header, Bytes::from_static(b"abc")),
            Err(Error::SizeMismatch {
                declared: 4,
                consumed: 3
            })
        );
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(decode_header(&[0x7f, 0x00]), Err(Error::UnknownFrameType(0x7f)));
    }

    #[test]
    fn test_oversized_control_frame() {
        let mut buf = BytesMut::new();
        encode_header(FrameType::Initialize, MAX_CONTROL_FRAME_SIZE + 1, None, &mut buf).unwrap();
        assert!(matches!(
            decode_header(&buf),
            Err(Error::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_header_stream_id_mismatch() {
        let mut buf = BytesMut::new();
        assert_eq!(
            encode_header(FrameType::StreamReset, 1, None, &mut buf),
            Err(Error::StreamIdMismatch(FrameType::StreamReset))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_out_of_range_body_writes_nothing() {
        let mut buf = BytesMut::new();
        let frame = Frame::Initialize(InitializeFrame {
            version: 1,
            parameters: Parameters {
                pause_writer_threshold: Some(varint::MAX + 1),
                ..Default::default()
            },
        });
        assert_eq!(
            frame.encode(&mut buf),
            Err(Error::VarIntOutOfRange(varint::MAX + 1))
        );
        assert!(buf.is_empty());

        let frame = Frame::Version(VersionFrame {
            versions: vec![1, u64::MAX],
        });
        assert!(frame.encode(&mut buf).is_err());
        assert!(buf.is_empty());
    }
}
