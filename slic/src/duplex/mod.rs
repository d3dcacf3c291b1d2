//! Underlying duplex byte channel.
//!
//! A Slic connection runs over any reliable, ordered byte channel such as a
//! TCP or TLS stream. The channel is split once: the read half belongs to the
//! connection's reader loop and the write half to the connection writer.
//! Dropping both halves closes the channel.

mod log;

pub use log::{LogDuplex, LogDuplexRead, LogDuplexWrite};

use std::io::{self, IoSlice};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Read half of a duplex connection.
#[async_trait]
pub trait DuplexRead: Send + 'static {
    /// Read into `buf`, returning the byte count. 0 means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Write half of a duplex connection.
#[async_trait]
pub trait DuplexWrite: Send + 'static {
    /// Write every byte of every segment, in order.
    async fn write(&mut self, segments: &[Bytes]) -> io::Result<()>;

    /// Half-close: the peer reads end of stream once buffered bytes drain.
    async fn shutdown_write(&mut self) -> io::Result<()>;
}

/// A duplex connection that can be split into its two halves.
pub trait DuplexConnection: Send + 'static {
    type Read: DuplexRead;
    type Write: DuplexWrite;

    fn split(self) -> (Self::Read, Self::Write);
}

/// Adapts a tokio byte stream (`TcpStream`, `DuplexStream`, TLS streams) to
/// [`DuplexConnection`].
#[derive(Debug)]
pub struct TokioDuplex<T> {
    inner: T,
}

impl<T> TokioDuplex<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

impl<T> DuplexConnection for TokioDuplex<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    type Read = TokioDuplexRead<T>;
    type Write = TokioDuplexWrite<T>;

    fn split(self) -> (Self::Read, Self::Write) {
        let (read, write) = tokio::io::split(self.inner);
        (TokioDuplexRead { inner: read }, TokioDuplexWrite { inner: write })
    }
}

pub struct TokioDuplexRead<T> {
    inner: ReadHalf<T>,
}

#[async_trait]
impl<T> DuplexRead for TokioDuplexRead<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).await
    }
}

pub struct TokioDuplexWrite<T> {
    inner: WriteHalf<T>,
}

#[async_trait]
impl<T> DuplexWrite for TokioDuplexWrite<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn write(&mut self, segments: &[Bytes]) -> io::Result<()> {
        write_all_vectored(&mut self.inner, segments).await?;
        self.inner.flush().await
    }

    async fn shutdown_write(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

/// Write all `segments` using vectored writes, resuming after short writes.
async fn write_all_vectored<W>(writer: &mut W, segments: &[Bytes]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut index = 0;
    let mut offset = 0;

    loop {
        while index < segments.len() && segments[index].len() == offset {
            index += 1;
            offset = 0;
        }
        if index == segments.len() {
            return Ok(());
        }

        let mut written = {
            let slices: Vec<IoSlice<'_>> = std::iter::once(IoSlice::new(&segments[index][offset..]))
                .chain(segments[index + 1..].iter().map(|s| IoSlice::new(s)))
                .collect();
            writer.write_vectored(&slices).await?
        };
        if written == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }

        while written > 0 {
            let left = segments[index].len() - offset;
            if written >= left {
                written -= left;
                index += 1;
                offset = 0;
            } else {
                offset += written;
                written = 0;
            }
        }
    }
}
