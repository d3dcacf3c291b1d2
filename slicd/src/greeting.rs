//! Greeting service.
//!
//! Every stream a client opens carries a name; the server answers on the
//! same stream with `Hello, <name>!` and ends it.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::BytesMut;
use slic::{SlicClientTransport, SlicConfig, SlicConnection, SlicListener, Stream, StreamError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::GreetingConfig;

/// Error code for resetting a request whose name exceeds the limit.
pub const NAME_TOO_LONG: u64 = 0x10;

pub fn greeting(name: &str) -> String {
    format!("Hello, {name}!")
}

/// Accept connections until `shutdown` completes, then shut every
/// connection down gracefully.
pub async fn serve(
    listener: SlicListener,
    app: GreetingConfig,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept_duplex() => {
                let (duplex, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let config = listener.config().clone();
                let app = app.clone();
                let stop = stop_rx.clone();
                connections.spawn(async move {
                    match SlicConnection::accept(duplex, config).await {
                        Ok(conn) => serve_connection(conn, peer, app, stop).await,
                        Err(e) => warn!(%peer, error = %e, "handshake failed"),
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    info!(connections = connections.len(), "Stopping greeting server");
    let _ = stop_tx.send(true);
    while connections.join_next().await.is_some() {}
    Ok(())
}

async fn serve_connection(
    conn: SlicConnection,
    peer: SocketAddr,
    app: GreetingConfig,
    mut stop: watch::Receiver<bool>,
) {
    info!(%peer, "connection accepted");
    let mut requests = JoinSet::new();

    loop {
        tokio::select! {
            accepted = conn.accept_stream() => match accepted {
                Ok(stream) => {
                    requests.spawn(answer(stream, app.max_name_len));
                }
                Err(_) => break,
            },
            _ = stop.changed() => {
                // Requests in flight keep running until the deadline.
                if let Err(e) = conn.shutdown(app.shutdown_timeout()).await {
                    warn!(%peer, error = %e, "graceful shutdown failed");
                }
                break;
            }
            Some(_) = requests.join_next(), if !requests.is_empty() => {}
        }
    }

    match conn.closed().await {
        Ok(reason) => info!(%peer, %reason, "connection closed"),
        Err(e) => warn!(%peer, error = %e, "connection aborted"),
    }
}

async fn answer(stream: Stream, max_name_len: usize) {
    match read_name(&stream, max_name_len).await {
        Ok(Some(name)) => {
            debug!(stream_id = ?stream.id(), %name, "greeting");
            if let Err(e) = stream.write_last(greeting(&name).into_bytes()).await {
                debug!(error = %e, "failed to send greeting");
            }
        }
        Ok(None) => {
            debug!(stream_id = ?stream.id(), max_name_len, "name too long");
            stream.reset(NAME_TOO_LONG);
        }
        Err(e) => debug!(error = %e, "failed to read name"),
    }
}

/// Read the whole request. `None` if it exceeds `max` bytes.
async fn read_name(stream: &Stream, max: usize) -> Result<Option<String>, StreamError> {
    let mut name = BytesMut::new();
    while let Some(chunk) = stream.read().await? {
        if name.len() + chunk.len() > max {
            return Ok(None);
        }
        name.extend_from_slice(&chunk);
    }
    Ok(Some(String::from_utf8_lossy(&name).into_owned()))
}

/// Connect to `addr`, send `name` and return the server's reply.
pub async fn hello(
    addr: &str,
    config: SlicConfig,
    name: &str,
    shutdown_timeout: Duration,
) -> Result<String> {
    let conn = SlicClientTransport::new(config)
        .connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;

    let stream = conn.open_stream(true).await.context("failed to open stream")?;
    stream
        .write_last(name.as_bytes().to_vec())
        .await
        .context("failed to send name")?;
    let reply = stream
        .read_to_end()
        .await
        .context("failed to read greeting")?;
    drop(stream);

    let reason = conn
        .shutdown(shutdown_timeout)
        .await
        .context("connection shutdown failed")?;
    debug!(%reason, "connection closed");
    Ok(String::from_utf8_lossy(&reply).into_owned())
}
