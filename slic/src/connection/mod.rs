//! # Multiplexed Connection
//!
//! A [`SlicConnection`] runs the Initialize handshake over a duplex channel
//! and then multiplexes streams over it. Two tasks run per connection: the
//! [`ConnectionWriter`] owning the write half and the read loop owning the
//! read half.
//!
//! ## Lifecycle
//!
//! ```text
//! connect/accept ──▶ Established ──shutdown──▶ ShuttingDown ──▶ Closed
//!                         │                         │
//!                         └──────── abort ──────────┴──────▶ Aborted
//! ```
//!
//! Lock order: the stream table lock may be held while taking a stream's
//! state lock, never the reverse.

mod handshake;
pub(crate) mod reader;

pub use handshake::{NegotiatedParameters, DEFAULT_MAX_STREAM_FRAME_SIZE};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use slic_proto::{Side, StreamDirection};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SlicConfig;
use crate::duplex::DuplexConnection;
use crate::error::{ConnectionError, StreamError};
use crate::stream::state::StreamCore;
use crate::stream::table::{StreamSettings, StreamTable};
use crate::stream::Stream;
use crate::writer::ConnectionWriter;
use reader::FrameReader;

/// Connection state as seen by the application.
#[derive(Debug, Clone)]
pub enum ConnectionState {
    Established,
    /// No new streams; existing streams run to completion.
    ShuttingDown,
    /// Both sides closed cleanly.
    Closed { reason: String },
    Aborted(ConnectionError),
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed { .. } | ConnectionState::Aborted(_))
    }
}

pub(crate) struct ConnectionInner {
    pub(crate) side: Side,
    pub(crate) config: SlicConfig,
    pub(crate) parameters: NegotiatedParameters,
    pub(crate) writer: ConnectionWriter,
    pub(crate) table: Mutex<StreamTable>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) cancel: CancellationToken,
    pub(crate) accept_tx: Mutex<Option<mpsc::UnboundedSender<Stream>>>,
    accept_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Stream>>,
    /// Signalled whenever a stream slot is released or the connection ends.
    slot_freed: Notify,
    local_shutdown: AtomicBool,
    reader: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionInner {
    fn is_established(&self) -> bool {
        matches!(*self.state.borrow(), ConnectionState::Established)
    }

    /// Error reported to operations attempted in the current state.
    fn state_error(&self) -> ConnectionError {
        match &*self.state.borrow() {
            ConnectionState::Established => ConnectionError::Cancelled,
            ConnectionState::ShuttingDown => ConnectionError::ShuttingDown,
            ConnectionState::Closed { reason } => ConnectionError::Closed(reason.clone()),
            ConnectionState::Aborted(err) => err.clone(),
        }
    }

    fn terminal_result(&self) -> Option<Result<String, ConnectionError>> {
        match &*self.state.borrow() {
            ConnectionState::Closed { reason } => Some(Ok(reason.clone())),
            ConnectionState::Aborted(err) => Some(Err(err.clone())),
            _ => None,
        }
    }

    /// Queue a stream frame, starting the stream if this is its first frame.
    pub(crate) fn send_stream(
        &self,
        core: &Arc<StreamCore>,
        data: Bytes,
        last: bool,
    ) -> Result<(), StreamError> {
        if core.id().is_some() {
            return core.send(&self.writer, data, last);
        }

        let mut table = self.table.lock();
        if self.state.borrow().is_terminal() {
            return Err(self.state_error().into());
        }
        match table.start(core) {
            Some(id) => {
                debug!(stream_id = %id, direction = %core.direction(), "stream started");
                core.send(&self.writer, data, last)
            }
            // Released before its first frame: reset or aborted.
            None => match core.send_credit() {
                Err(err) => Err(err),
                Ok(_) => Err(self.state_error().into()),
            },
        }
    }

    /// Free the slot of a stream once it is finished: its data was read
    /// and the peer acknowledged ours, or it was reset.
    pub(crate) fn release(&self, core: &Arc<StreamCore>) {
        if !core.is_finished() {
            return;
        }
        if self.table.lock().remove(core) {
            debug!(stream_id = ?core.id(), "stream released");
            self.slot_freed.notify_waiters();
        }
    }

    /// Fail the connection and every stream with `error`. No-op once the
    /// connection reached a terminal state.
    pub(crate) fn abort(&self, error: ConnectionError) {
        let aborted = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = ConnectionState::Aborted(error.clone());
            true
        });
        if !aborted {
            return;
        }

        warn!(side = %self.side, %error, "connection aborted");
        self.cancel.cancel();
        let streams = self.table.lock().drain();
        for core in streams {
            core.fault(error.clone());
        }
        self.close_accept_queue();
        self.slot_freed.notify_waiters();
    }

    /// Stop queueing accepted streams and drop those nobody accepted. Queued
    /// streams hold the connection, so they must not outlive it.
    fn close_accept_queue(&self) {
        self.accept_tx.lock().take();
        if let Ok(mut rx) = self.accept_rx.try_lock() {
            while rx.try_recv().is_ok() {}
        }
    }

    /// Stop accepting new streams. Returns the close reason to report.
    fn begin_close(&self) -> String {
        self.state.send_if_modified(|state| {
            if matches!(state, ConnectionState::Established) {
                *state = ConnectionState::ShuttingDown;
                true
            } else {
                false
            }
        });
        if self.local_shutdown.load(Ordering::Acquire) {
            "connection shut down".into()
        } else {
            "connection closed by peer".into()
        }
    }

    fn complete(&self, reason: String) {
        let completed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = ConnectionState::Closed {
                reason: reason.clone(),
            };
            true
        });
        if completed {
            info!(side = %self.side, %reason, "connection closed");
            // Streams already queued stay acceptable.
            self.accept_tx.lock().take();
            self.slot_freed.notify_waiters();
        }
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.table.lock().is_empty() || self.state.borrow().is_terminal() {
                return;
            }
            notified.await;
        }
    }
}

struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.inner
            .abort(ConnectionError::Closed("connection dropped".into()));
        self.inner.close_accept_queue();
    }
}

/// A multiplexed connection.
///
/// Clones share the connection. Dropping the last clone aborts the
/// connection if it is not closed yet; streams still held fail with
/// [`ConnectionError::Closed`].
#[derive(Clone)]
pub struct SlicConnection {
    handle: Arc<ConnectionHandle>,
}

impl SlicConnection {
    /// Connect as the client side: send Initialize and wait for the
    /// server's acknowledgement.
    pub async fn connect<D: DuplexConnection>(
        duplex: D,
        config: SlicConfig,
    ) -> Result<Self, ConnectionError> {
        Self::establish(Side::Client, duplex, config).await
    }

    /// Accept as the server side: wait for Initialize and acknowledge it.
    pub async fn accept<D: DuplexConnection>(
        duplex: D,
        config: SlicConfig,
    ) -> Result<Self, ConnectionError> {
        Self::establish(Side::Server, duplex, config).await
    }

    async fn establish<D: DuplexConnection>(
        side: Side,
        duplex: D,
        config: SlicConfig,
    ) -> Result<Self, ConnectionError> {
        config.validate().map_err(ConnectionError::Config)?;

        let (read, write) = duplex.split();
        let cancel = CancellationToken::new();
        let writer = ConnectionWriter::new(write, cancel.child_token());
        let mut reader = FrameReader::new(read, config.read_buffer_size);

        let handshake = async {
            match side {
                Side::Client => handshake::connect(&mut reader, &writer, &config).await,
                Side::Server => handshake::accept(&mut reader, &writer, &config).await,
            }
        };
        let parameters = match tokio::time::timeout(config.handshake_timeout(), handshake).await {
            Ok(Ok(parameters)) => parameters,
            Ok(Err(err)) => {
                debug!(%side, %err, "handshake failed");
                writer.dispose().await;
                return Err(err);
            }
            Err(_) => {
                debug!(%side, "handshake timed out");
                writer.dispose().await;
                return Err(ConnectionError::HandshakeTimeout);
            }
        };
        info!(
            %side,
            version = parameters.version,
            idle_timeout = ?parameters.idle_timeout,
            "connection established"
        );

        let table = StreamTable::new(
            side,
            [
                parameters.peer_max_bidirectional_streams,
                parameters.peer_max_unidirectional_streams,
            ],
            [
                config.max_bidirectional_streams,
                config.max_unidirectional_streams,
            ],
            StreamSettings {
                send_credit: parameters.peer_pause_writer_threshold,
                recv_window: config.pause_writer_threshold,
                resume_threshold: config.resume_writer_threshold,
            },
        );
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Established);

        let inner = Arc::new(ConnectionInner {
            side,
            config,
            parameters,
            writer,
            table: Mutex::new(table),
            state,
            cancel,
            accept_tx: Mutex::new(Some(accept_tx)),
            accept_rx: tokio::sync::Mutex::new(accept_rx),
            slot_freed: Notify::new(),
            local_shutdown: AtomicBool::new(false),
            reader: tokio::sync::Mutex::new(None),
        });

        let task = tokio::spawn(reader::run(inner.clone(), reader));
        *inner.reader.lock().await = Some(task);

        Ok(Self {
            handle: Arc::new(ConnectionHandle { inner }),
        })
    }

    fn inner(&self) -> &Arc<ConnectionInner> {
        &self.handle.inner
    }

    pub fn side(&self) -> Side {
        self.inner().side
    }

    pub fn parameters(&self) -> &NegotiatedParameters {
        &self.inner().parameters
    }

    pub fn state(&self) -> ConnectionState {
        self.inner().state.borrow().clone()
    }

    /// Streams currently holding a slot.
    pub fn stream_count(&self) -> usize {
        self.inner().table.lock().len()
    }

    /// Open a stream, waiting for a free slot if the peer's limit is
    /// reached.
    pub async fn open_stream(&self, bidirectional: bool) -> Result<Stream, StreamError> {
        let inner = self.inner();
        loop {
            let notified = inner.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_open_stream(bidirectional) {
                Err(StreamError::Capacity { .. }) => notified.await,
                result => return result,
            }
        }
    }

    /// Open a stream, failing with [`StreamError::Capacity`] if no slot is
    /// free.
    ///
    /// The stream gets its ID and becomes visible to the peer when it sends
    /// its first frame.
    pub fn try_open_stream(&self, bidirectional: bool) -> Result<Stream, StreamError> {
        let inner = self.inner();
        if !inner.is_established() {
            return Err(inner.state_error().into());
        }
        let direction = if bidirectional {
            StreamDirection::Bidirectional
        } else {
            StreamDirection::Unidirectional
        };
        let core = inner.table.lock().allocate(direction)?;
        Ok(Stream::new(core, inner.clone()))
    }

    /// Next stream opened by the peer.
    ///
    /// Fails once the connection is closed or aborted and no accepted
    /// stream is left.
    pub async fn accept_stream(&self) -> Result<Stream, ConnectionError> {
        let inner = self.inner();
        let mut rx = inner.accept_rx.lock().await;
        match rx.recv().await {
            Some(stream) if !matches!(*inner.state.borrow(), ConnectionState::Aborted(_)) => {
                Ok(stream)
            }
            _ => {
                while rx.try_recv().is_ok() {}
                Err(inner.state_error())
            }
        }
    }

    /// Streams opened by the peer as a lazy sequence, ending when the
    /// connection closes.
    pub fn incoming(&self) -> impl tokio_stream::Stream<Item = Stream> + Send {
        futures::stream::unfold(self.clone(), |conn| async move {
            let stream = conn.accept_stream().await.ok()?;
            Some((stream, conn))
        })
    }

    /// Close gracefully: stop opening and accepting streams, wait for
    /// existing streams to finish, then close the duplex connection.
    ///
    /// Returns the close reason. If streams are still open at the deadline
    /// the connection is aborted with [`ConnectionError::ShutdownTimeout`].
    pub async fn shutdown(&self, timeout: Duration) -> Result<String, ConnectionError> {
        let inner = self.inner();
        let deadline = Instant::now() + timeout;

        inner.local_shutdown.store(true, Ordering::Release);
        inner.begin_close();
        if let Some(result) = inner.terminal_result() {
            return result;
        }
        info!(side = %inner.side, streams = inner.table.lock().len(), "shutting down");

        if tokio::time::timeout_at(deadline, inner.wait_drained())
            .await
            .is_err()
        {
            inner.abort(ConnectionError::ShutdownTimeout);
            return Err(ConnectionError::ShutdownTimeout);
        }

        inner.writer.shutdown();
        match tokio::time::timeout_at(deadline, self.closed()).await {
            Ok(result) => result,
            Err(_) => {
                inner.abort(ConnectionError::ShutdownTimeout);
                Err(ConnectionError::ShutdownTimeout)
            }
        }
    }

    /// Abort immediately. Every stream fails with
    /// [`ConnectionError::Closed`] carrying `reason`.
    pub fn abort(&self, reason: impl Into<String>) {
        self.inner().abort(ConnectionError::Closed(reason.into()));
    }

    /// Abort and wait for both background tasks to stop.
    pub async fn close(&self) {
        let inner = self.inner();
        inner.abort(ConnectionError::Closed("connection closed locally".into()));
        inner.writer.dispose().await;
        let task = inner.reader.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Wait until the connection ends. Returns the close reason, or the
    /// error that aborted it.
    pub async fn closed(&self) -> Result<String, ConnectionError> {
        let mut state = self.inner().state.subscribe();
        let state = state
            .wait_for(ConnectionState::is_terminal)
            .await
            .map(|state| state.clone())
            .map_err(|_| ConnectionError::Cancelled)?;
        match state {
            ConnectionState::Closed { reason } => Ok(reason),
            ConnectionState::Aborted(err) => Err(err),
            _ => Err(ConnectionError::Cancelled),
        }
    }
}

impl fmt::Debug for SlicConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlicConnection")
            .field("side", &self.side())
            .field("state", &self.state())
            .field("streams", &self.stream_count())
            .finish()
    }
}
