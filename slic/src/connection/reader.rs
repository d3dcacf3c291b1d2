//! Frame reader and the connection's read loop.
//!
//! The read loop is the only consumer of the duplex read half. Stream data
//! is read straight into the target stream's buffer; control frames are
//! decoded and dispatched. Any error aborts the connection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use slic_proto::frames::{self, FrameHeader, FrameType, StreamResetFrame};
use slic_proto::{Frame, StreamId};
use tracing::{debug, trace};

use super::{ConnectionInner, ConnectionState};
use crate::duplex::DuplexRead;
use crate::error::ConnectionError;
use crate::stream::table::Accepted;
use crate::stream::{Stream, REFUSED_ERROR_CODE};
use crate::writer::ConnectionWriter;

/// Buffered frame reader over the read half of a duplex connection.
pub(crate) struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
    chunk: usize,
}

impl<R: DuplexRead> FrameReader<R> {
    pub fn new(reader: R, chunk: usize) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(chunk),
            chunk: chunk.max(1),
        }
    }

    /// Read more bytes into the buffer. Returns false at end of stream.
    async fn fill(&mut self) -> Result<bool, ConnectionError> {
        let start = self.buffer.len();
        self.buffer.resize(start + self.chunk, 0);
        match self.reader.read(&mut self.buffer[start..]).await {
            Ok(n) => {
                self.buffer.truncate(start + n);
                Ok(n > 0)
            }
            Err(err) => {
                self.buffer.truncate(start);
                Err(err.into())
            }
        }
    }

    /// Next frame header, or `None` if the peer closed between frames.
    pub async fn read_header(&mut self) -> Result<Option<FrameHeader>, ConnectionError> {
        loop {
            if let Some((header, used)) = frames::decode_header(&self.buffer)? {
                self.buffer.advance(used);
                return Ok(Some(header));
            }
            if !self.fill().await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ConnectionError::protocol(
                    "connection closed in the middle of a frame header",
                ));
            }
        }
    }

    /// The next `size` bytes.
    pub async fn read_body(&mut self, size: u64) -> Result<Bytes, ConnectionError> {
        let size = usize::try_from(size)
            .map_err(|_| ConnectionError::protocol("frame size exceeds address space"))?;
        while self.buffer.len() < size {
            if !self.fill().await? {
                return Err(ConnectionError::protocol(
                    "connection closed in the middle of a frame body",
                ));
            }
        }
        Ok(self.buffer.split_to(size).freeze())
    }

    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        let Some(header) = self.read_header().await? else {
            return Ok(None);
        };
        let body = self.read_body(header.size).await?;
        Ok(Some(frames::decode_body(&header, body)?))
    }
}

/// Read loop task. Ends when the peer closes, the connection is aborted or
/// the writer fails.
pub(crate) async fn run<R: DuplexRead>(inner: Arc<ConnectionInner>, mut reader: FrameReader<R>) {
    let cancel = inner.cancel.clone();
    let idle = inner.parameters.idle_timeout;

    let result = tokio::select! {
        _ = cancel.cancelled() => return,
        result = read_loop(&inner, &mut reader, idle) => result,
        err = writer_failure(&inner.writer) => Err(err),
    };

    match result {
        Ok(()) => on_peer_closed(&inner).await,
        Err(err) => inner.abort(err),
    }
}

async fn writer_failure(writer: &ConnectionWriter) -> ConnectionError {
    match writer.closed().await {
        Err(err) => err,
        // A completed writer only means this side is done sending.
        Ok(()) => std::future::pending().await,
    }
}

async fn read_loop<R: DuplexRead>(
    inner: &Arc<ConnectionInner>,
    reader: &mut FrameReader<R>,
    idle: Option<Duration>,
) -> Result<(), ConnectionError> {
    loop {
        let Some(header) = idle_bounded(idle, reader.read_header()).await? else {
            return Ok(());
        };

        if header.frame_type.carries_data() {
            let stream_id = header
                .stream_id
                .ok_or(slic_proto::Error::StreamIdMismatch(header.frame_type))?;
            let limit = inner.config.max_stream_frame_size;
            if header.size > limit {
                return Err(slic_proto::Error::FrameTooLarge {
                    size: header.size,
                    limit,
                }
                .into());
            }
            let data = idle_bounded(idle, reader.read_body(header.size)).await?;
            let last = header.frame_type == FrameType::StreamLast;
            trace!(%stream_id, len = data.len(), last, "received stream frame");
            on_stream_data(inner, stream_id, data, last)?;
        } else {
            let body = idle_bounded(idle, reader.read_body(header.size)).await?;
            let frame = frames::decode_body(&header, body)?;
            trace!(?frame, "received frame");
            on_control_frame(inner, frame)?;
        }
    }
}

/// Run one header or body read under the negotiated idle timeout.
async fn idle_bounded<T>(
    idle: Option<Duration>,
    read: impl Future<Output = Result<T, ConnectionError>>,
) -> Result<T, ConnectionError> {
    match idle {
        Some(timeout) => tokio::time::timeout(timeout, read)
            .await
            .map_err(|_| ConnectionError::IdleTimeout)?,
        None => read.await,
    }
}

fn on_stream_data(
    inner: &Arc<ConnectionInner>,
    id: StreamId,
    data: Bytes,
    last: bool,
) -> Result<(), ConnectionError> {
    let (core, new) = {
        let mut table = inner.table.lock();
        let refusing = !id.is_local(inner.side)
            && table.get(id).is_none()
            && !matches!(*inner.state.borrow(), ConnectionState::Established);
        if refusing {
            if table.refuse(id) {
                drop(table);
                debug!(stream_id = %id, "refusing stream during shutdown");
                inner.writer.write_frame(&Frame::StreamReset(StreamResetFrame {
                    stream_id: id,
                    error_code: REFUSED_ERROR_CODE,
                }))?;
            }
            return Ok(());
        }
        match table.accept(id)? {
            Accepted::Existing(core) => (core, false),
            Accepted::New(core) => (core, true),
            Accepted::Stale => return Ok(()),
        }
    };

    core.on_data(data, last)?;
    if new {
        debug!(stream_id = %id, "stream accepted");
        let stream = Stream::new(core.clone(), inner.clone());
        if let Some(tx) = inner.accept_tx.lock().as_ref() {
            let _ = tx.send(stream);
        }
    }
    Ok(())
}

fn on_control_frame(inner: &Arc<ConnectionInner>, frame: Frame) -> Result<(), ConnectionError> {
    let Some(stream_id) = frame.stream_id() else {
        return Err(ConnectionError::protocol(format!(
            "unexpected {} frame on an established connection",
            frame.frame_type()
        )));
    };
    let Some(core) = inner.table.lock().lookup(stream_id)? else {
        return Ok(());
    };

    match frame {
        Frame::StreamReset(reset) => {
            core.on_reset(reset.error_code);
            inner.release(&core);
        }
        Frame::StreamConsumed(consumed) => {
            core.on_consumed(consumed.size)?;
            inner.release(&core);
        }
        Frame::StreamStopSending(stop) => {
            core.on_stop_sending(stop.error_code);
            inner.release(&core);
        }
        other => {
            return Err(ConnectionError::protocol(format!(
                "unexpected {} frame",
                other.frame_type()
            )))
        }
    }
    Ok(())
}

/// The peer closed its sending side between frames.
async fn on_peer_closed(inner: &Arc<ConnectionInner>) {
    // Streams with nothing left on the wire stay readable.
    let live = inner.table.lock().active_count();
    if live > 0 {
        debug!(live, "peer closed with streams still open");
        inner.abort(ConnectionError::ClosedByPeer);
        return;
    }

    let reason = inner.begin_close();
    inner.writer.shutdown();
    match inner.writer.closed().await {
        Ok(()) => inner.complete(reason),
        Err(err) => inner.abort(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplex::{DuplexConnection, TokioDuplex};
    use bytes::BufMut;
    use slic_proto::frames::{StreamConsumedFrame, StreamFrame};
    use tokio::io::AsyncWriteExt;

    fn encode(frames: &[Frame]) -> Vec<u8> {
        let mut buf = Vec::new();
        for frame in frames {
            frame.encode(&mut buf).unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn test_reads_frames_across_small_chunks() {
        let (a, mut b) = tokio::io::duplex(64);
        let (read, _write) = TokioDuplex::new(a).split();
        let mut reader = FrameReader::new(read, 3);

        let frames = vec![
            Frame::Stream(StreamFrame {
                stream_id: StreamId::new(4),
                data: Bytes::from_static(b"hello world"),
            }),
            Frame::StreamConsumed(StreamConsumedFrame {
                stream_id: StreamId::new(4),
                size: 11,
            }),
        ];
        b.write_all(&encode(&frames)).await.unwrap();
        b.shutdown().await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap(), Some(frames[0].clone()));
        assert_eq!(reader.read_frame().await.unwrap(), Some(frames[1].clone()));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_error() {
        let (a, mut b) = tokio::io::duplex(64);
        let (read, _write) = TokioDuplex::new(a).split();
        let mut reader = FrameReader::new(read, 16);

        let mut partial = Vec::new();
        partial.put_u8(0x03);
        partial.put_u8(10);
        partial.put_u8(0);
        partial.extend_from_slice(b"abc");
        b.write_all(&partial).await.unwrap();
        b.shutdown().await.unwrap();

        let header = reader.read_header().await.unwrap().unwrap();
        assert_eq!(header.size, 10);
        assert!(matches!(
            reader.read_body(header.size).await,
            Err(ConnectionError::ProtocolViolation(_))
        ));
    }
}
