//! Streams: independent byte channels multiplexed over one connection.
//!
//! A [`Stream`] is a cheap handle; clones share the same stream. Writes are
//! split into Stream frames no larger than the peer's send credit and frame
//! size limit, and wait while credit is exhausted. Reads return chunks in
//! the order the peer wrote them.

pub(crate) mod state;
pub(crate) mod table;

pub use state::HalfState;

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use slic_proto::{varint, StreamDirection, StreamId};
use tracing::trace;

use crate::connection::ConnectionInner;
use crate::error::StreamError;
use state::{ReadPoll, StreamCore};

/// Error code sent when the last handle of an unfinished stream is dropped.
pub const ABANDONED_ERROR_CODE: u64 = 0x01;

/// Error code sent to refuse a stream the peer opened during shutdown.
pub const REFUSED_ERROR_CODE: u64 = 0x02;

/// Handle to one stream of a [`SlicConnection`](crate::SlicConnection).
///
/// The stream holds a slot of its connection until its data has been read
/// to the end and the peer has read ours, or until it is reset. Dropping
/// the last handle of a stream that is still open resets it with
/// [`ABANDONED_ERROR_CODE`]; unread data that the peer already finished is
/// dropped with a stop-sending instead.
pub struct Stream {
    core: Arc<StreamCore>,
    conn: Arc<ConnectionInner>,
}

impl Stream {
    pub(crate) fn new(core: Arc<StreamCore>, conn: Arc<ConnectionInner>) -> Self {
        core.handles.fetch_add(1, Ordering::AcqRel);
        Self { core, conn }
    }

    /// The stream ID, once the stream is started. Locally opened streams
    /// get their ID when they send their first frame.
    pub fn id(&self) -> Option<StreamId> {
        self.core.id()
    }

    pub fn is_started(&self) -> bool {
        self.core.id().is_some()
    }

    pub fn direction(&self) -> StreamDirection {
        self.core.direction()
    }

    pub fn is_bidirectional(&self) -> bool {
        self.core.direction() == StreamDirection::Bidirectional
    }

    /// Whether this side opened the stream.
    pub fn is_local(&self) -> bool {
        self.core.is_local()
    }

    pub fn send_state(&self) -> HalfState {
        self.core.send_state()
    }

    pub fn recv_state(&self) -> HalfState {
        self.core.recv_state()
    }

    /// Bytes written and not yet consumed by the peer.
    pub fn in_flight(&self) -> u64 {
        self.core.in_flight()
    }

    /// Both directions reached a terminal state.
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    fn writable(&self) -> bool {
        self.is_bidirectional() || self.is_local()
    }

    fn readable(&self) -> bool {
        self.is_bidirectional() || !self.is_local()
    }

    /// Write `data`. Completes once every byte is queued on the connection
    /// writer, waiting for send credit as needed.
    ///
    /// Dropping the future stops after the last whole frame already queued.
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<(), StreamError> {
        self.send(data.into(), false).await
    }

    /// Write `data` and end the stream.
    pub async fn write_last(&self, data: impl Into<Bytes>) -> Result<(), StreamError> {
        self.send(data.into(), true).await
    }

    /// End the stream without more data.
    pub async fn finish(&self) -> Result<(), StreamError> {
        self.send(Bytes::new(), true).await
    }

    async fn send(&self, mut data: Bytes, last: bool) -> Result<(), StreamError> {
        if !self.writable() {
            return Err(StreamError::NotWritable);
        }
        let _guard = self.core.send_lock.lock().await;
        if data.is_empty() && !last {
            return self.core.send_credit().map(|_| ());
        }

        let max_frame = self.conn.parameters.peer_max_stream_frame_size.max(1);
        loop {
            let notified = self.core.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let credit = self.core.send_credit()?;
            // An empty StreamLast carries no payload and needs no credit.
            if credit == 0 && !data.is_empty() {
                trace!(stream_id = ?self.id(), "waiting for send credit");
                notified.await;
                continue;
            }

            let len = (data.len() as u64).min(credit).min(max_frame) as usize;
            let chunk = data.split_to(len);
            let end = last && data.is_empty();
            self.conn.send_stream(&self.core, chunk, end)?;
            if end {
                self.conn.release(&self.core);
            }
            if data.is_empty() {
                return Ok(());
            }
        }
    }

    /// Next chunk of data, or `None` at the end of the stream.
    pub async fn read(&self) -> Result<Option<Bytes>, StreamError> {
        if !self.readable() {
            return Err(StreamError::NotReadable);
        }
        let _guard = self.core.recv_lock.lock().await;
        loop {
            let notified = self.core.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.core.poll_read(&self.conn.writer)? {
                ReadPoll::Data(chunk) => return Ok(Some(chunk)),
                ReadPoll::End => {
                    self.conn.release(&self.core);
                    return Ok(None);
                }
                ReadPoll::Pending => notified.await,
            }
        }
    }

    /// Read until the end of the stream.
    pub async fn read_to_end(&self) -> Result<Bytes, StreamError> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.read().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// The stream's data as a lazy sequence of chunks. The sequence ends at
    /// the end of the stream and after the first error.
    pub fn chunks(&self) -> impl tokio_stream::Stream<Item = Result<Bytes, StreamError>> + Send {
        futures::stream::unfold(Some(self.clone()), |stream| async move {
            let stream = stream?;
            match stream.read().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(stream))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Abandon both directions. Pending and later operations on this stream
    /// fail with [`StreamError::Reset`]; other streams are unaffected.
    /// Idempotent.
    pub fn reset(&self, error_code: u64) {
        if self.core.reset(&self.conn.writer, error_code.min(varint::MAX)) {
            trace!(stream_id = ?self.id(), error_code, "stream reset");
            self.conn.release(&self.core);
        }
    }

    /// Ask the peer to stop sending. Buffered and later data is discarded.
    pub fn stop_sending(&self, error_code: u64) {
        if self
            .core
            .stop_sending(&self.conn.writer, error_code.min(varint::MAX))
        {
            trace!(stream_id = ?self.id(), error_code, "stream stop sending");
            self.conn.release(&self.core);
        }
    }
}

impl Clone for Stream {
    fn clone(&self) -> Self {
        Stream::new(self.core.clone(), self.conn.clone())
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.core.handles.fetch_sub(1, Ordering::AcqRel) == 1 && !self.core.is_finished() {
            trace!(stream_id = ?self.id(), "abandoned stream");
            if self.core.abandon(&self.conn.writer, ABANDONED_ERROR_CODE) {
                self.conn.release(&self.core);
            }
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id())
            .field("direction", &self.direction())
            .field("local", &self.is_local())
            .field("send", &self.send_state())
            .field("recv", &self.recv_state())
            .finish()
    }
}
