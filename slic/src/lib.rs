//! # Slic
//!
//! Multiplexed stream transport over a single reliable byte channel.
//!
//! A [`SlicConnection`] carries many independent [`Stream`]s, each with its
//! own per-stream flow control. Frames from all streams are interleaved on
//! the wire by a single [`ConnectionWriter`](writer::ConnectionWriter) task
//! and demultiplexed by a read loop task.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use slic::{SlicClientTransport, SlicConfig};
//!
//! let conn = SlicClientTransport::new(SlicConfig::default())
//!     .connect("127.0.0.1:4062")
//!     .await?;
//! let stream = conn.open_stream(true).await?;
//! stream.write_last(&b"hello"[..]).await?;
//! let reply = stream.read_to_end().await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```
//!
//! Wire format and codec live in the `slic-proto` crate.

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod duplex;
pub mod error;
pub mod flow_control;
pub mod stream;
pub mod transport;
pub mod writer;

pub use config::SlicConfig;
pub use connection::{ConnectionState, NegotiatedParameters, SlicConnection};
pub use duplex::{DuplexConnection, DuplexRead, DuplexWrite, LogDuplex, TokioDuplex};
pub use error::{ConnectionError, StreamError};
pub use stream::{HalfState, Stream, ABANDONED_ERROR_CODE, REFUSED_ERROR_CODE};
pub use transport::{SlicClientTransport, SlicListener, SlicServerTransport};

pub use slic_proto::{Side, StreamDirection, StreamId};
