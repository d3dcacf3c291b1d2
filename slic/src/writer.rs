//! Connection writer.
//!
//! Streams hand complete frames to the writer without waiting for I/O. A
//! background task owns the write half of the duplex connection: it waits for
//! the first queued frame, drains everything else already queued and issues
//! one vectored write for the whole batch.
//!
//! Each commit is one queue entry, so a frame's header and body always reach
//! the wire back to back.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use slic_proto::frames::{encode_header, FrameType};
use slic_proto::{Frame, StreamId};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::duplex::DuplexWrite;
use crate::error::ConnectionError;

/// Largest possible frame header: type byte and two 8-byte varints.
const MAX_HEADER_LEN: usize = 17;

enum WriterCommand {
    Segments(Vec<Bytes>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// State of the background task.
#[derive(Debug, Clone)]
pub enum WriterStatus {
    Running,
    /// Shut down after flushing everything and half-closing the channel.
    Completed,
    Failed(ConnectionError),
    Cancelled,
}

pub struct ConnectionWriter {
    tx: mpsc::UnboundedSender<WriterCommand>,
    closing: AtomicBool,
    cancel: CancellationToken,
    status: watch::Receiver<WriterStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionWriter {
    /// Spawn the background task on the current tokio runtime.
    ///
    /// Cancelling `cancel` stops the task at its next suspension point,
    /// abandoning any write in progress.
    pub fn new<W: DuplexWrite>(duplex: W, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(WriterStatus::Running);

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let status = run(duplex, rx, task_cancel).await;
            debug!(?status, "connection writer stopped");
            let _ = status_tx.send(status);
        });

        Self {
            tx,
            closing: AtomicBool::new(false),
            cancel,
            status,
            task: Mutex::new(Some(task)),
        }
    }

    /// Reserve an empty buffer with room for `capacity` bytes.
    pub fn reserve(&self, capacity: usize) -> BytesMut {
        BytesMut::with_capacity(capacity)
    }

    /// Queue the bytes written into `buf`. They are sent as one unit.
    pub fn commit(&self, buf: BytesMut) -> Result<(), ConnectionError> {
        self.push(vec![buf.freeze()])
    }

    /// Encode and queue a control frame.
    pub fn write_frame(&self, frame: &Frame) -> Result<(), ConnectionError> {
        let mut buf = self.reserve(frame.encoded_len());
        frame.encode(&mut buf)?;
        trace!(?frame, "queue frame");
        self.commit(buf)
    }

    /// Queue a Stream or StreamLast frame without copying `data`.
    pub fn write_stream(
        &self,
        stream_id: StreamId,
        data: Bytes,
        last: bool,
    ) -> Result<(), ConnectionError> {
        let frame_type = if last {
            FrameType::StreamLast
        } else {
            FrameType::Stream
        };
        let mut header = self.reserve(MAX_HEADER_LEN);
        encode_header(frame_type, data.len() as u64, Some(stream_id), &mut header)?;
        trace!(%stream_id, bytes = data.len(), last, "queue stream frame");

        let mut segments = Vec::with_capacity(2);
        segments.push(header.freeze());
        if !data.is_empty() {
            segments.push(data);
        }
        self.push(segments)
    }

    fn push(&self, segments: Vec<Bytes>) -> Result<(), ConnectionError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed("connection writer is shut down".into()));
        }
        self.tx
            .send(WriterCommand::Segments(segments))
            .map_err(|_| self.stopped_error())
    }

    /// Wait until everything committed before this call reached the channel.
    pub async fn flush(&self) -> Result<(), ConnectionError> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(WriterCommand::Flush(tx)).is_err() {
            return self.closed().await;
        }
        match rx.await {
            Ok(()) => Ok(()),
            Err(_) => self.closed().await,
        }
    }

    /// Stop accepting commits, flush what is queued, then half-close the
    /// channel. Idempotent.
    pub fn shutdown(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(WriterCommand::Shutdown);
        }
    }

    /// Wait for the background task to stop.
    ///
    /// Returns `Ok` only when it stopped through [`shutdown`](Self::shutdown).
    pub async fn closed(&self) -> Result<(), ConnectionError> {
        let mut status = self.status.clone();
        let result = match status
            .wait_for(|s| !matches!(s, WriterStatus::Running))
            .await
        {
            Ok(status) => status.clone(),
            Err(_) => WriterStatus::Cancelled,
        };
        match result {
            WriterStatus::Completed => Ok(()),
            WriterStatus::Failed(err) => Err(err),
            WriterStatus::Running | WriterStatus::Cancelled => Err(ConnectionError::Cancelled),
        }
    }

    pub fn status(&self) -> WriterStatus {
        self.status.borrow().clone()
    }

    /// Cancel the background task and wait for it to stop. Idempotent; a
    /// concurrent caller also waits until the task is gone.
    pub async fn dispose(&self) {
        self.closing.store(true, Ordering::Release);
        self.cancel.cancel();
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            let _ = handle.await;
        }
    }

    fn stopped_error(&self) -> ConnectionError {
        match self.status() {
            WriterStatus::Failed(err) => err,
            WriterStatus::Completed => {
                ConnectionError::Closed("connection writer is shut down".into())
            }
            WriterStatus::Running | WriterStatus::Cancelled => ConnectionError::Cancelled,
        }
    }
}

async fn run<W: DuplexWrite>(
    mut duplex: W,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    cancel: CancellationToken,
) -> WriterStatus {
    let mut segments: Vec<Bytes> = Vec::new();
    let mut flushes: Vec<oneshot::Sender<()>> = Vec::new();

    loop {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => return WriterStatus::Cancelled,
            command = rx.recv() => command,
        };

        // Every sender gone means nobody can commit again.
        let mut shutdown = first.is_none();
        let mut next = first;
        while let Some(command) = next.take() {
            match command {
                WriterCommand::Segments(s) => segments.extend(s),
                WriterCommand::Flush(done) => flushes.push(done),
                WriterCommand::Shutdown => shutdown = true,
            }
            next = rx.try_recv().ok();
        }

        if !segments.is_empty() {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return WriterStatus::Cancelled,
                result = duplex.write(&segments) => result,
            };
            if let Err(e) = result {
                return WriterStatus::Failed(e.into());
            }
            segments.clear();
        }

        for done in flushes.drain(..) {
            let _ = done.send(());
        }

        if shutdown {
            rx.close();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return WriterStatus::Cancelled,
                result = duplex.shutdown_write() => result,
            };
            return match result {
                Ok(()) => WriterStatus::Completed,
                Err(e) => WriterStatus::Failed(e.into()),
            };
        }
    }
}
