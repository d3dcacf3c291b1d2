//! slic-proto: wire format of the Slic multiplexed stream transport
//!
//! This crate has no I/O. It describes the bytes two Slic endpoints exchange
//! over a duplex connection and leaves reading, writing and state to the
//! `slic` crate.
//!
//! # Module Organization
//!
//! - `varint`: 62-bit variable-length integers
//! - `types`: stream IDs, sides and directions
//! - `frames`: frame types, header and body codec
//! - `params`: parameter block carried by Initialize and InitializeAck
//! - `version`: protocol versions and negotiation helper
//! - `error`: decode and encode failures

#![forbid(unsafe_code)]

pub mod error;
pub mod frames;
pub mod params;
pub mod types;
pub mod varint;
pub mod version;

pub use error::{Error, Result};
pub use frames::{Frame, FrameHeader, FrameType};
pub use params::Parameters;
pub use types::{Side, StreamDirection, StreamId};
