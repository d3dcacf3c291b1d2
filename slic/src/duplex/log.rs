//! Tracing wrapper around a duplex connection.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use super::{DuplexConnection, DuplexRead, DuplexWrite};

/// Wraps a [`DuplexConnection`] and traces every read, write and half-close
/// under the `slic::duplex` target.
#[derive(Debug)]
pub struct LogDuplex<D> {
    inner: D,
    label: String,
}

impl<D: DuplexConnection> LogDuplex<D> {
    /// `label` identifies the connection in log lines, e.g. the peer address.
    pub fn new(inner: D, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
        }
    }
}

impl<D: DuplexConnection> DuplexConnection for LogDuplex<D> {
    type Read = LogDuplexRead<D::Read>;
    type Write = LogDuplexWrite<D::Write>;

    fn split(self) -> (Self::Read, Self::Write) {
        let (read, write) = self.inner.split();
        (
            LogDuplexRead {
                inner: read,
                label: self.label.clone(),
            },
            LogDuplexWrite {
                inner: write,
                label: self.label,
            },
        )
    }
}

pub struct LogDuplexRead<R> {
    inner: R,
    label: String,
}

#[async_trait]
impl<R: DuplexRead> DuplexRead for LogDuplexRead<R> {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf).await {
            Ok(0) => {
                debug!(target: "slic::duplex", peer = %self.label, "read end of stream");
                Ok(0)
            }
            Ok(n) => {
                trace!(target: "slic::duplex", peer = %self.label, bytes = n, "read");
                Ok(n)
            }
            Err(e) => {
                debug!(target: "slic::duplex", peer = %self.label, error = %e, "read failed");
                Err(e)
            }
        }
    }
}

pub struct LogDuplexWrite<W> {
    inner: W,
    label: String,
}

#[async_trait]
impl<W: DuplexWrite> DuplexWrite for LogDuplexWrite<W> {
    async fn write(&mut self, segments: &[Bytes]) -> io::Result<()> {
        let bytes: usize = segments.iter().map(Bytes::len).sum();
        let result = self.inner.write(segments).await;
        match &result {
            Ok(()) => trace!(
                target: "slic::duplex",
                peer = %self.label,
                segments = segments.len(),
                bytes,
                "write"
            ),
            Err(e) => debug!(target: "slic::duplex", peer = %self.label, error = %e, "write failed"),
        }
        result
    }

    async fn shutdown_write(&mut self) -> io::Result<()> {
        let result = self.inner.shutdown_write().await;
        debug!(target: "slic::duplex", peer = %self.label, ok = result.is_ok(), "shutdown write");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplex::TokioDuplex;

    #[tokio::test]
    async fn test_wrapper_is_transparent() {
        let (a, b) = tokio::io::duplex(64);
        let (_, mut writer) = LogDuplex::new(TokioDuplex::new(a), "a").split();
        let (mut reader, _) = LogDuplex::new(TokioDuplex::new(b), "b").split();

        writer
            .write(&[Bytes::from_static(b"ab"), Bytes::from_static(b"cd")])
            .await
            .unwrap();
        writer.shutdown_write().await.unwrap();

        let mut buf = [0u8; 16];
        let mut received = Vec::new();
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, b"abcd");
    }
}
