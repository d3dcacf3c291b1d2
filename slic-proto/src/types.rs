//! # Core Slic Types
//!
//! Stream identifiers and the small enums that classify them. A stream ID's
//! two low bits carry its category:
//!
//! | bits | category |
//! |------|----------|
//! | 0b00 | client-initiated bidirectional |
//! | 0b01 | server-initiated bidirectional |
//! | 0b10 | client-initiated unidirectional |
//! | 0b11 | server-initiated unidirectional |
//!
//! IDs within one category grow by 4, starting at the category value.

#![forbid(unsafe_code)]

use core::fmt;

use crate::varint;

// ============================================================================
// Side (Client vs Server)
// ============================================================================

/// Connection endpoint side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Endpoint that sent the Initialize frame
    Client,
    /// Endpoint that answered it
    Server,
}

impl Side {
    /// Check if this side is the client
    pub fn is_client(self) -> bool {
        matches!(self, Side::Client)
    }

    /// Check if this side is the server
    pub fn is_server(self) -> bool {
        matches!(self, Side::Server)
    }

    /// Get the opposite side
    pub fn opposite(self) -> Side {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => f.write_str("client"),
            Side::Server => f.write_str("server"),
        }
    }
}

/// Stream Direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamDirection {
    Bidirectional,
    Unidirectional,
}

impl StreamDirection {
    /// Index used by per-direction arrays.
    pub fn index(self) -> usize {
        match self {
            StreamDirection::Bidirectional => 0,
            StreamDirection::Unidirectional => 1,
        }
    }
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamDirection::Bidirectional => f.write_str("bidirectional"),
            StreamDirection::Unidirectional => f.write_str("unidirectional"),
        }
    }
}

// ============================================================================
// Stream ID
// ============================================================================

/// Identifies one stream within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl StreamId {
    /// Create a new StreamId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The first stream ID of the category opened by `initiator` in `direction`.
    pub fn first(initiator: Side, direction: StreamDirection) -> Self {
        let mut id = 0;
        if initiator.is_server() {
            id |= 0x01;
        }
        if direction == StreamDirection::Unidirectional {
            id |= 0x02;
        }
        Self(id)
    }

    /// Get the raw value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Side that opened the stream.
    pub fn initiator(&self) -> Side {
        if self.0 & 0x01 == 0 {
            Side::Client
        } else {
            Side::Server
        }
    }

    /// Stream direction encoded in the ID.
    pub fn direction(&self) -> StreamDirection {
        if self.0 & 0x02 == 0 {
            StreamDirection::Bidirectional
        } else {
            StreamDirection::Unidirectional
        }
    }

    /// Check if this stream is bidirectional
    pub fn is_bidirectional(&self) -> bool {
        (self.0 & 0x02) == 0
    }

    /// Check if this stream is unidirectional
    pub fn is_unidirectional(&self) -> bool {
        (self.0 & 0x02) != 0
    }

    /// Whether `side` opened this stream.
    pub fn is_local(&self, side: Side) -> bool {
        self.initiator() == side
    }

    /// Index of the ID's category, 0 through 3.
    pub fn category(&self) -> usize {
        (self.0 & 0x03) as usize
    }

    /// Position of this ID within its category (0 for the first stream).
    pub fn sequence(&self) -> u64 {
        self.0 >> 2
    }

    /// The next ID of the same category, or `None` past the varint range.
    pub fn next(&self) -> Option<StreamId> {
        self.0
            .checked_add(4)
            .filter(|id| *id <= MAX_STREAM_ID)
            .map(StreamId)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<StreamId> for u64 {
    fn from(id: StreamId) -> u64 {
        id.0
    }
}

/// Maximum Stream ID value (2^62 - 1)
pub const MAX_STREAM_ID: u64 = varint::MAX;

#[cfg(test)]
mod tests {
    use super::*;

    mod stream_id_tests {
        use super::*;

        #[test]
        fn test_category_bits() {
            let cases = [
                (0, Side::Client, StreamDirection::Bidirectional),
                (1, Side::Server, StreamDirection::Bidirectional),
                (2, Side::Client, StreamDirection::Unidirectional),
                (3, Side::Server, StreamDirection::Unidirectional),
            ];
            for (raw, side, direction) in cases {
                let id = StreamId::new(raw + 8);
                assert_eq!(id.initiator(), side);
                assert_eq!(id.direction(), direction);
                assert_eq!(id.category(), raw as usize);
                assert_eq!(id.sequence(), 2);
                assert_eq!(StreamId::first(side, direction), StreamId::new(raw));
            }
        }

        #[test]
        fn test_next_stays_in_category() {
            let id = StreamId::first(Side::Server, StreamDirection::Unidirectional);
            let next = id.next().unwrap();
            assert_eq!(next.value(), 7);
            assert_eq!(next.category(), id.category());
            assert!(StreamId::new(MAX_STREAM_ID).next().is_none());
        }

        #[test]
        fn test_is_local() {
            let id = StreamId::new(4);
            assert!(id.is_local(Side::Client));
            assert!(!id.is_local(Side::Server));
            assert!(id.is_bidirectional());
        }
    }

    mod side_tests {
        use super::*;

        #[test]
        fn test_opposite() {
            assert_eq!(Side::Client.opposite(), Side::Server);
            assert_eq!(Side::Server.opposite(), Side::Client);
            assert!(Side::Client.is_client());
            assert!(Side::Server.is_server());
        }
    }
}
