//! # Stream State
//!
//! Each direction of a stream moves through `Idle -> Open -> (Closed | Reset)`
//! on its own. A stream is fully closed once both directions are terminal.
//! The direction a unidirectional stream lacks starts out `Closed`.
//!
//! A stream keeps its table slot until it is finished: the application has
//! read to the end of the receive direction and the peer has acknowledged
//! the end of the send direction, or either was reset. The receiver
//! acknowledges a finished direction with a zero-size StreamConsumed once
//! the application has read all of it, so the opener's slot is never
//! released before the receiver's.
//!
//! All transitions happen under the stream's state lock, and frames caused
//! by a transition are queued on the connection writer before the lock is
//! released, so the peer observes them in transition order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;

use bytes::Bytes;
use parking_lot::Mutex;
use slic_proto::frames::{StreamConsumedFrame, StreamResetFrame, StreamStopSendingFrame};
use slic_proto::{Frame, StreamDirection, StreamId};
use tokio::sync::Notify;
use tracing::trace;

use crate::error::{ConnectionError, StreamError};
use crate::flow_control::{RecvWindow, SendCredit};
use crate::writer::ConnectionWriter;

/// State of one direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfState {
    /// No frame sent or received yet
    Idle,
    Open,
    /// Finished normally (StreamLast sent or received)
    Closed,
    /// Ended by reset, stop-sending or connection failure
    Reset,
}

impl HalfState {
    pub fn is_terminal(self) -> bool {
        matches!(self, HalfState::Closed | HalfState::Reset)
    }
}

/// Outcome of one non-blocking read attempt.
pub(crate) enum ReadPoll {
    Data(Bytes),
    End,
    Pending,
}

struct CoreState {
    send: HalfState,
    recv: HalfState,
    send_error: Option<StreamError>,
    recv_error: Option<StreamError>,
    credit: SendCredit,
    window: RecvWindow,
    buffer: VecDeque<Bytes>,
    /// Stop-sending requested before the peer learned of the stream.
    pending_stop: Option<u64>,
    /// The peer is done with our data: it acknowledged our StreamLast, or
    /// the send direction was reset or stopped.
    send_done: bool,
    /// The application read the end of the stream, or the receive
    /// direction was reset or stopped.
    read_done: bool,
}

impl CoreState {
    fn is_finished(&self) -> bool {
        self.send_done && self.read_done
    }
}

/// Shared state of a stream, owned by the stream table and by every handle.
///
/// Locally opened streams get their ID when they send their first frame, so
/// IDs reach the wire in increasing order.
pub(crate) struct StreamCore {
    id: OnceLock<StreamId>,
    direction: StreamDirection,
    local: bool,
    state: Mutex<CoreState>,
    pub(crate) readable: Notify,
    pub(crate) writable: Notify,
    /// Serializes writers so each write's frames stay contiguous.
    pub(crate) send_lock: tokio::sync::Mutex<()>,
    pub(crate) recv_lock: tokio::sync::Mutex<()>,
    /// Live `Stream` handles.
    pub(crate) handles: AtomicUsize,
    /// Set once the stream table gave back the stream's slot.
    released: AtomicBool,
}

impl StreamCore {
    /// A stream opened by this side; its ID is assigned later.
    pub fn new_local(direction: StreamDirection, send_credit: u64, window: RecvWindow) -> Self {
        Self::new(None, direction, true, send_credit, window)
    }

    /// A stream opened by the peer.
    pub fn new_remote(id: StreamId, send_credit: u64, window: RecvWindow) -> Self {
        Self::new(Some(id), id.direction(), false, send_credit, window)
    }

    fn new(
        id: Option<StreamId>,
        direction: StreamDirection,
        local: bool,
        send_credit: u64,
        window: RecvWindow,
    ) -> Self {
        let uni = direction == StreamDirection::Unidirectional;
        let send = if uni && !local {
            HalfState::Closed
        } else {
            HalfState::Idle
        };
        let recv = if uni && local {
            HalfState::Closed
        } else {
            HalfState::Idle
        };

        let cell = OnceLock::new();
        if let Some(id) = id {
            let _ = cell.set(id);
        }

        Self {
            id: cell,
            direction,
            local,
            state: Mutex::new(CoreState {
                send,
                recv,
                send_error: None,
                recv_error: None,
                credit: SendCredit::new(send_credit),
                window,
                buffer: VecDeque::new(),
                pending_stop: None,
                send_done: send == HalfState::Closed,
                read_done: recv == HalfState::Closed,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
            send_lock: tokio::sync::Mutex::new(()),
            recv_lock: tokio::sync::Mutex::new(()),
            handles: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Option<StreamId> {
        self.id.get().copied()
    }

    /// Give a local stream its ID. Returns false if it already had one.
    pub fn assign_id(&self, id: StreamId) -> bool {
        self.id.set(id).is_ok()
    }

    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    /// Mark the stream's table slot as released. Only the first call
    /// returns true.
    pub fn release(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn send_state(&self) -> HalfState {
        self.state.lock().send
    }

    pub fn recv_state(&self) -> HalfState {
        self.state.lock().recv
    }

    /// Both directions terminal.
    pub fn is_closed(&self) -> bool {
        let state = self.state.lock();
        state.send.is_terminal() && state.recv.is_terminal()
    }

    /// Nothing buffered or owed for this stream; its slot can be released.
    pub fn is_finished(&self) -> bool {
        self.state.lock().is_finished()
    }

    /// Bytes sent and not yet returned by the peer.
    pub fn in_flight(&self) -> u64 {
        self.state.lock().credit.in_flight()
    }

    /// Whether the peer has seen any frame for this stream.
    fn known_to_peer(&self, state: &CoreState) -> bool {
        !self.local || state.send != HalfState::Idle
    }

    // ------------------------------------------------------------------
    // Send side
    // ------------------------------------------------------------------

    /// Current send credit, 0 when the writer must wait.
    pub fn send_credit(&self) -> Result<u64, StreamError> {
        let state = self.state.lock();
        send_open(&state)?;
        Ok(state.credit.available())
    }

    /// Spend credit and queue one Stream or StreamLast frame.
    pub fn send(
        &self,
        writer: &ConnectionWriter,
        data: Bytes,
        last: bool,
    ) -> Result<(), StreamError> {
        let mut state = self.state.lock();
        send_open(&state)?;
        let id = self
            .id()
            .ok_or_else(|| ConnectionError::protocol("send on a stream without an ID"))?;
        let len = data.len() as u64;
        if len > state.credit.available() {
            return Err(ConnectionError::protocol("stream write exceeds send credit").into());
        }

        writer.write_stream(id, data, last)?;
        state.credit.consume(len);
        state.send = if last {
            HalfState::Closed
        } else {
            HalfState::Open
        };
        if let Some(error_code) = state.pending_stop.take() {
            writer.write_frame(&Frame::StreamStopSending(StreamStopSendingFrame {
                stream_id: id,
                error_code,
            }))?;
        }
        Ok(())
    }

    /// Credit returned by a StreamConsumed frame. A zero-size frame after
    /// our StreamLast means the peer read the whole stream.
    pub fn on_consumed(&self, size: u64) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        if state.send == HalfState::Closed && size == 0 {
            state.send_done = true;
            return Ok(());
        }
        if state.send.is_terminal() {
            return Ok(());
        }
        state
            .credit
            .restore(size)
            .map_err(|_| self.flow_control_violation())?;
        drop(state);
        self.writable.notify_waiters();
        Ok(())
    }

    /// Peer no longer reads this stream.
    pub fn on_stop_sending(&self, error_code: u64) {
        let mut state = self.state.lock();
        state.send_done = true;
        if state.send.is_terminal() {
            return;
        }
        state.send = HalfState::Reset;
        state.send_error = Some(StreamError::Stopped {
            error_code,
            remote: true,
        });
        drop(state);
        self.writable.notify_waiters();
    }

    // ------------------------------------------------------------------
    // Receive side
    // ------------------------------------------------------------------

    /// Payload of a Stream or StreamLast frame from the peer.
    pub fn on_data(&self, data: Bytes, last: bool) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        match state.recv {
            // Stopped locally: discard without accounting.
            HalfState::Reset => return Ok(()),
            HalfState::Closed => {
                return Err(ConnectionError::protocol(format!(
                    "data received on stream {:?} after its end",
                    self.id()
                )))
            }
            HalfState::Idle | HalfState::Open => {}
        }

        state
            .window
            .on_data_received(data.len() as u64)
            .map_err(|_| self.flow_control_violation())?;
        if !data.is_empty() {
            state.buffer.push_back(data);
        }
        state.recv = if last {
            HalfState::Closed
        } else {
            HalfState::Open
        };
        drop(state);
        self.readable.notify_waiters();
        Ok(())
    }

    /// Take the next buffered chunk, announcing consumed bytes when the
    /// window threshold is reached.
    pub fn poll_read(&self, writer: &ConnectionWriter) -> Result<ReadPoll, StreamError> {
        let mut state = self.state.lock();
        if state.recv == HalfState::Reset {
            return Err(state.recv_error.clone().unwrap_or(StreamError::Reset {
                error_code: 0,
                remote: false,
            }));
        }

        if let Some(chunk) = state.buffer.pop_front() {
            let consumed = state.window.consume(chunk.len() as u64);
            // After the end of stream the peer needs no more credit.
            let open = state.recv == HalfState::Open;
            if let (Some(size), Some(stream_id), true) = (consumed, self.id(), open) {
                trace!(%stream_id, size, "return credit");
                // A failed write means the connection is going down; the
                // reader will fault this stream.
                let _ = writer.write_frame(&Frame::StreamConsumed(StreamConsumedFrame {
                    stream_id,
                    size,
                }));
            }
            return Ok(ReadPoll::Data(chunk));
        }

        if state.recv != HalfState::Closed {
            return Ok(ReadPoll::Pending);
        }
        if !state.read_done {
            state.read_done = true;
            if let Some(stream_id) = self.id() {
                trace!(%stream_id, "acknowledge end of stream");
                let _ = writer.write_frame(&Frame::StreamConsumed(StreamConsumedFrame {
                    stream_id,
                    size: 0,
                }));
            }
        }
        Ok(ReadPoll::End)
    }

    // ------------------------------------------------------------------
    // Reset and faults
    // ------------------------------------------------------------------

    /// Local reset. Unread data is discarded. Returns false if the stream
    /// was already finished.
    pub fn reset(&self, writer: &ConnectionWriter, error_code: u64) -> bool {
        let mut state = self.state.lock();
        if state.is_finished() {
            return false;
        }
        if let Some(stream_id) = self.id().filter(|_| self.known_to_peer(&state)) {
            let _ = writer.write_frame(&Frame::StreamReset(StreamResetFrame {
                stream_id,
                error_code,
            }));
        }
        let error = StreamError::Reset {
            error_code,
            remote: false,
        };
        terminate(&mut state, error, true);
        drop(state);
        self.notify_all();
        true
    }

    /// Give up on the stream after its last handle is gone. Directions still
    /// open are reset. If only unread data remains, the peer is told to stop
    /// instead, so data the peer is still reading from us survives. Returns
    /// true if the stream is finished afterwards.
    pub fn abandon(&self, writer: &ConnectionWriter, error_code: u64) -> bool {
        let state = self.state.lock();
        if state.is_finished() {
            return false;
        }
        let open = !state.send.is_terminal() || !state.recv.is_terminal();
        let unread = !state.read_done;
        drop(state);

        if open {
            self.reset(writer, error_code)
        } else if unread {
            self.stop_sending(writer, error_code);
            self.is_finished()
        } else {
            // Waiting for the peer to acknowledge our StreamLast.
            false
        }
    }

    /// StreamReset from the peer. Unread data is discarded.
    pub fn on_reset(&self, error_code: u64) {
        let mut state = self.state.lock();
        terminate(
            &mut state,
            StreamError::Reset {
                error_code,
                remote: true,
            },
            true,
        );
        drop(state);
        self.notify_all();
    }

    /// Stop reading; buffered and later payload from the peer is discarded.
    pub fn stop_sending(&self, writer: &ConnectionWriter, error_code: u64) -> bool {
        let mut state = self.state.lock();
        if state.read_done {
            return false;
        }
        if let Some(stream_id) = self.id().filter(|_| self.known_to_peer(&state)) {
            let _ = writer.write_frame(&Frame::StreamStopSending(StreamStopSendingFrame {
                stream_id,
                error_code,
            }));
        } else {
            state.pending_stop = Some(error_code);
        }
        state.recv = HalfState::Reset;
        state.recv_error = Some(StreamError::Stopped {
            error_code,
            remote: false,
        });
        state.buffer.clear();
        state.read_done = true;
        drop(state);
        self.readable.notify_waiters();
        true
    }

    /// Connection failure: every open direction ends with `error`.
    pub fn fault(&self, error: ConnectionError) {
        let mut state = self.state.lock();
        terminate(&mut state, StreamError::Connection(error), false);
        drop(state);
        self.notify_all();
    }

    fn flow_control_violation(&self) -> ConnectionError {
        match self.id() {
            Some(stream_id) => ConnectionError::FlowControlViolation { stream_id },
            None => ConnectionError::protocol("flow control violation on an unstarted stream"),
        }
    }

    fn notify_all(&self) {
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }
}

fn send_open(state: &CoreState) -> Result<(), StreamError> {
    match state.send {
        HalfState::Idle | HalfState::Open => Ok(()),
        HalfState::Closed => Err(StreamError::Finished),
        HalfState::Reset => Err(state.send_error.clone().unwrap_or(StreamError::Reset {
            error_code: 0,
            remote: false,
        })),
    }
}

/// Move every non-terminal direction to `Reset`. Data already complete in
/// the receive buffer stays readable unless `discard_unread` is set.
fn terminate(state: &mut CoreState, error: StreamError, discard_unread: bool) {
    if !state.send.is_terminal() {
        state.send = HalfState::Reset;
        state.send_error = Some(error.clone());
    }
    state.send_done = true;
    if !state.recv.is_terminal() || (discard_unread && !state.read_done) {
        state.recv = HalfState::Reset;
        state.recv_error = Some(error);
        state.buffer.clear();
        state.read_done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplex::{DuplexConnection, TokioDuplex};
    use tokio_util::sync::CancellationToken;

    fn writer() -> (ConnectionWriter, tokio::io::DuplexStream) {
        let (a, b) = tokio::io::duplex(4096);
        let (_, write) = TokioDuplex::new(a).split();
        (ConnectionWriter::new(write, CancellationToken::new()), b)
    }

    #[test]
    fn test_initial_states() {
        let window = || RecvWindow::new(64, 32);
        let local_uni = StreamCore::new_local(StreamDirection::Unidirectional, 64, window());
        assert_eq!(local_uni.send_state(), HalfState::Idle);
        assert_eq!(local_uni.recv_state(), HalfState::Closed);

        let remote_uni = StreamCore::new_remote(StreamId::new(3), 64, window());
        assert_eq!(remote_uni.send_state(), HalfState::Closed);
        assert_eq!(remote_uni.recv_state(), HalfState::Idle);

        let bidi = StreamCore::new_local(StreamDirection::Bidirectional, 64, window());
        assert!(bidi.is_local());
        assert!(!bidi.is_closed());
        assert_eq!(bidi.id(), None);
        assert!(bidi.assign_id(StreamId::new(4)));
        assert!(!bidi.assign_id(StreamId::new(8)));
        assert_eq!(bidi.id(), Some(StreamId::new(4)));
        assert!(bidi.release());
        assert!(!bidi.release());
    }

    #[tokio::test]
    async fn test_send_consumes_credit_until_restored() {
        let (writer, _peer) = writer();
        let core = StreamCore::new_local(StreamDirection::Bidirectional, 64, RecvWindow::new(64, 32));
        core.assign_id(StreamId::new(0));

        core.send(&writer, Bytes::from(vec![0; 64]), false).unwrap();
        assert_eq!(core.send_credit().unwrap(), 0);
        assert_eq!(core.in_flight(), 64);
        assert!(core.send(&writer, Bytes::from_static(b"x"), false).is_err());

        core.on_consumed(36).unwrap();
        assert_eq!(core.send_credit().unwrap(), 36);
        assert!(matches!(
            core.on_consumed(29),
            Err(ConnectionError::FlowControlViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_data_after_end_is_violation() {
        let core = StreamCore::new_remote(StreamId::new(1), 64, RecvWindow::new(64, 32));
        core.on_data(Bytes::from_static(b"abc"), true).unwrap();
        assert_eq!(core.recv_state(), HalfState::Closed);
        assert!(core.on_data(Bytes::from_static(b"d"), false).is_err());
    }

    #[tokio::test]
    async fn test_stopped_stream_discards_data() {
        let (writer, _peer) = writer();
        let core = StreamCore::new_remote(StreamId::new(1), 64, RecvWindow::new(8, 4));
        core.on_data(Bytes::from_static(b"1234"), false).unwrap();
        assert!(core.stop_sending(&writer, 7));
        assert!(!core.stop_sending(&writer, 7));

        // Discarded data is not held against the window.
        core.on_data(Bytes::from(vec![0; 100]), false).unwrap();
        assert!(matches!(
            core.poll_read(&writer),
            Err(StreamError::Stopped {
                error_code: 7,
                remote: false
            })
        ));
    }

    #[tokio::test]
    async fn test_peer_reset_discards_unread_data() {
        let (writer, _peer) = writer();
        let core = StreamCore::new_remote(StreamId::new(1), 64, RecvWindow::new(64, 32));
        core.on_data(Bytes::from_static(b"done"), true).unwrap();
        assert!(!core.is_finished());

        core.on_reset(9);
        assert_eq!(core.recv_state(), HalfState::Reset);
        assert_eq!(core.send_state(), HalfState::Reset);
        assert!(core.is_finished());
        assert!(matches!(
            core.poll_read(&writer),
            Err(StreamError::Reset {
                error_code: 9,
                remote: true
            })
        ));
        assert!(!core.reset(&writer, 1), "already finished");
    }

    #[tokio::test]
    async fn test_remote_stream_finishes_when_read_to_end() {
        let (writer, _peer) = writer();
        let core = StreamCore::new_remote(StreamId::new(3), 64, RecvWindow::new(64, 32));
        core.on_data(Bytes::from_static(b"payload"), true).unwrap();
        assert!(core.is_closed());
        assert!(!core.is_finished(), "unread data holds the slot");

        assert!(matches!(core.poll_read(&writer), Ok(ReadPoll::Data(_))));
        assert!(!core.is_finished());
        assert!(matches!(core.poll_read(&writer), Ok(ReadPoll::End)));
        assert!(core.is_finished());
    }

    #[tokio::test]
    async fn test_local_stream_finishes_on_acknowledgement() {
        let (writer, _peer) = writer();
        let core = StreamCore::new_local(StreamDirection::Unidirectional, 64, RecvWindow::new(64, 32));
        core.assign_id(StreamId::new(2));
        core.send(&writer, Bytes::from_static(b"data"), true).unwrap();
        assert!(core.is_closed());
        assert!(!core.is_finished());

        // Credit returned before the acknowledgement does not finish it.
        core.on_consumed(4).unwrap();
        assert!(!core.is_finished());
        core.on_consumed(0).unwrap();
        assert!(core.is_finished());
    }

    #[tokio::test]
    async fn test_abandon_unread_data_keeps_own_data() {
        let (writer, _peer) = writer();
        let core = StreamCore::new_remote(StreamId::new(1), 64, RecvWindow::new(64, 32));
        core.on_data(Bytes::from_static(b"request"), true).unwrap();
        core.send(&writer, Bytes::from_static(b"reply"), true).unwrap();

        // Unread data is dropped with a stop-sending; our reply is not reset.
        assert!(!core.abandon(&writer, 1));
        assert_eq!(core.recv_state(), HalfState::Reset);
        assert_eq!(core.send_state(), HalfState::Closed);
        core.on_consumed(0).unwrap();
        assert!(core.is_finished());
        assert!(!core.abandon(&writer, 1));
    }
}
