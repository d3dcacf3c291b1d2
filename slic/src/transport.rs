//! TCP client and server transports.
//!
//! Both wrap the accepted or connected `TcpStream` in a [`LogDuplex`] so the
//! raw byte traffic of every connection can be traced under the
//! `slic::duplex` target.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use crate::config::SlicConfig;
use crate::connection::SlicConnection;
use crate::duplex::{LogDuplex, TokioDuplex};
use crate::error::ConnectionError;

/// Duplex channel produced by the TCP transports.
pub type TcpDuplex = LogDuplex<TokioDuplex<TcpStream>>;

fn wrap(stream: TcpStream, peer: SocketAddr) -> io::Result<TcpDuplex> {
    stream.set_nodelay(true)?;
    Ok(LogDuplex::new(TokioDuplex::new(stream), peer.to_string()))
}

/// Opens client connections.
#[derive(Debug, Clone, Default)]
pub struct SlicClientTransport {
    config: SlicConfig,
}

impl SlicClientTransport {
    pub fn new(config: SlicConfig) -> Self {
        Self { config }
    }

    /// Connect over TCP and run the client handshake.
    pub async fn connect(&self, addr: impl ToSocketAddrs) -> Result<SlicConnection, ConnectionError> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        debug!(%peer, "tcp connected");
        SlicConnection::connect(wrap(stream, peer)?, self.config.clone()).await
    }
}

/// Accepts server connections.
#[derive(Debug, Clone, Default)]
pub struct SlicServerTransport {
    config: SlicConfig,
}

impl SlicServerTransport {
    pub fn new(config: SlicConfig) -> Self {
        Self { config }
    }

    pub async fn listen(&self, addr: impl ToSocketAddrs) -> io::Result<SlicListener> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "listening");
        Ok(SlicListener {
            listener,
            config: self.config.clone(),
        })
    }
}

/// Bound listener. Each accepted TCP connection still has to complete the
/// server handshake.
#[derive(Debug)]
pub struct SlicListener {
    listener: TcpListener,
    config: SlicConfig,
}

impl SlicListener {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept the next TCP connection without handshaking it.
    ///
    /// Run [`SlicConnection::accept`] on the result, typically in a spawned
    /// task so a slow client cannot stall the accept loop.
    pub async fn accept_duplex(&self) -> io::Result<(TcpDuplex, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        debug!(%peer, "tcp accepted");
        Ok((wrap(stream, peer)?, peer))
    }

    /// Accept the next TCP connection and run the server handshake.
    pub async fn accept(&self) -> Result<(SlicConnection, SocketAddr), ConnectionError> {
        let (duplex, peer) = self.accept_duplex().await?;
        let connection = SlicConnection::accept(duplex, self.config.clone()).await?;
        Ok((connection, peer))
    }

    pub fn config(&self) -> &SlicConfig {
        &self.config
    }
}
