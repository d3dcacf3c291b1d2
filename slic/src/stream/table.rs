//! # Stream Table
//!
//! Tracks every live stream of a connection and enforces the negotiated
//! concurrency limits. Slots are counted per category (the two low bits of
//! a stream ID): limits for local categories come from the peer, limits for
//! remote categories are the ones this side advertised.

use std::collections::HashMap;
use std::sync::Arc;

use slic_proto::types::MAX_STREAM_ID;
use slic_proto::{Side, StreamDirection, StreamId};

use super::state::StreamCore;
use crate::error::{ConnectionError, StreamError};
use crate::flow_control::RecvWindow;

/// Result of looking up the stream a received frame names.
pub(crate) enum Accepted {
    Existing(Arc<StreamCore>),
    /// First frame of a remote stream.
    New(Arc<StreamCore>),
    /// The stream is already gone; the frame is ignored.
    Stale,
}

/// Per-stream flow control settings applied to new streams.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamSettings {
    /// Initial send credit (peer's pause-writer threshold)
    pub send_credit: u64,
    /// Receive window (our pause-writer threshold)
    pub recv_window: u64,
    /// Consumed bytes that trigger a StreamConsumed frame
    pub resume_threshold: u64,
}

pub(crate) struct StreamTable {
    side: Side,
    settings: StreamSettings,

    /// Streams with an ID
    streams: HashMap<StreamId, Arc<StreamCore>>,

    /// Locally opened streams that have not sent a frame yet
    unstarted: Vec<Arc<StreamCore>>,

    /// Next ID of each category
    next_id: [u64; 4],

    /// Slots in use for each category
    open: [u64; 4],

    /// Slot limit of each category
    limits: [u64; 4],
}

impl StreamTable {
    /// `peer_limits` bound streams this side opens, `local_limits` bound
    /// streams the peer opens. Both are `[bidirectional, unidirectional]`.
    pub fn new(
        side: Side,
        peer_limits: [u64; 2],
        local_limits: [u64; 2],
        settings: StreamSettings,
    ) -> Self {
        let mut limits = [0; 4];
        for direction in [StreamDirection::Bidirectional, StreamDirection::Unidirectional] {
            let i = direction.index();
            limits[StreamId::first(side, direction).category()] = peer_limits[i];
            limits[StreamId::first(side.opposite(), direction).category()] = local_limits[i];
        }

        Self {
            side,
            settings,
            streams: HashMap::new(),
            unstarted: Vec::new(),
            next_id: [0, 1, 2, 3],
            open: [0; 4],
            limits,
        }
    }

    fn window(&self) -> RecvWindow {
        RecvWindow::new(self.settings.recv_window, self.settings.resume_threshold)
    }

    /// Reserve a slot for a new local stream.
    ///
    /// Fails with [`StreamError::Capacity`] while all slots of the category
    /// are in use.
    pub fn allocate(&mut self, direction: StreamDirection) -> Result<Arc<StreamCore>, StreamError> {
        let category = StreamId::first(self.side, direction).category();
        let limit = self.limits[category];
        if self.open[category] >= limit || self.next_id[category] > MAX_STREAM_ID {
            return Err(StreamError::Capacity { direction, limit });
        }

        self.open[category] += 1;
        let core = Arc::new(StreamCore::new_local(
            direction,
            self.settings.send_credit,
            self.window(),
        ));
        self.unstarted.push(core.clone());
        Ok(core)
    }

    /// Give an allocated stream the next ID of its category.
    ///
    /// The caller must queue the stream's first frame before releasing the
    /// table, which keeps IDs in increasing order on the wire.
    pub fn start(&mut self, core: &Arc<StreamCore>) -> Option<StreamId> {
        if let Some(id) = core.id() {
            return Some(id);
        }
        let position = self.unstarted.iter().position(|c| Arc::ptr_eq(c, core))?;
        self.unstarted.swap_remove(position);

        let category = StreamId::first(self.side, core.direction()).category();
        let id = StreamId::new(self.next_id[category]);
        self.next_id[category] += 4;
        core.assign_id(id);
        self.streams.insert(id, core.clone());
        Some(id)
    }

    /// Find or create the stream named by a received frame.
    pub fn accept(&mut self, id: StreamId) -> Result<Accepted, ConnectionError> {
        if let Some(core) = self.streams.get(&id) {
            return Ok(Accepted::Existing(core.clone()));
        }

        let category = id.category();
        if id.is_local(self.side) {
            if id.value() >= self.next_id[category] {
                return Err(ConnectionError::protocol(format!(
                    "frame for stream {id} which this side never opened"
                )));
            }
            return Ok(Accepted::Stale);
        }
        if id.value() < self.next_id[category] {
            return Ok(Accepted::Stale);
        }

        if self.open[category] >= self.limits[category] {
            return Err(ConnectionError::protocol(format!(
                "peer opened stream {id} beyond the {} {} stream limit",
                self.limits[category],
                id.direction()
            )));
        }

        // IDs skipped below `id` count as opened and already closed.
        self.next_id[category] = id.value() + 4;
        self.open[category] += 1;
        let core = Arc::new(StreamCore::new_remote(
            id,
            self.settings.send_credit,
            self.window(),
        ));
        self.streams.insert(id, core.clone());
        Ok(Accepted::New(core))
    }

    /// Consume a remote stream ID without creating the stream. Returns false
    /// if the ID was already used.
    pub fn refuse(&mut self, id: StreamId) -> bool {
        let category = id.category();
        if id.is_local(self.side) || id.value() < self.next_id[category] {
            return false;
        }
        self.next_id[category] = id.value() + 4;
        true
    }

    pub fn get(&self, id: StreamId) -> Option<Arc<StreamCore>> {
        self.streams.get(&id).cloned()
    }

    /// Find the stream a control frame names, without creating it.
    pub fn lookup(&self, id: StreamId) -> Result<Option<Arc<StreamCore>>, ConnectionError> {
        if let Some(core) = self.streams.get(&id) {
            return Ok(Some(core.clone()));
        }
        if id.is_local(self.side) && id.value() >= self.next_id[id.category()] {
            return Err(ConnectionError::protocol(format!(
                "frame for stream {id} which this side never opened"
            )));
        }
        Ok(None)
    }

    /// Release the slot of a stream. Returns false if it was already released.
    pub fn remove(&mut self, core: &Arc<StreamCore>) -> bool {
        if !core.release() {
            return false;
        }
        match core.id() {
            Some(id) => {
                self.streams.remove(&id);
            }
            None => self.unstarted.retain(|c| !Arc::ptr_eq(c, core)),
        }

        let initiator = if core.is_local() {
            self.side
        } else {
            self.side.opposite()
        };
        let category = StreamId::first(initiator, core.direction()).category();
        self.open[category] = self.open[category].saturating_sub(1);
        true
    }

    /// Remove every stream, returning them.
    pub fn drain(&mut self) -> Vec<Arc<StreamCore>> {
        let mut all: Vec<_> = self.streams.drain().map(|(_, core)| core).collect();
        all.append(&mut self.unstarted);
        for core in &all {
            core.release();
        }
        self.open = [0; 4];
        all
    }

    /// Number of streams holding a slot.
    pub fn len(&self) -> usize {
        self.streams.len() + self.unstarted.len()
    }

    /// Streams with a direction still open on the wire.
    pub fn active_count(&self) -> usize {
        self.unstarted.len() + self.streams.values().filter(|core| !core.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots in use by streams `initiator` opened in `direction`.
    #[cfg(test)]
    pub fn open_count(&self, initiator: Side, direction: StreamDirection) -> u64 {
        self.open[StreamId::first(initiator, direction).category()]
    }
}
