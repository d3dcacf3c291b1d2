//! End-to-end tests: two connections talking over an in-memory duplex.

use std::time::Duration;

use bytes::Bytes;
use slic::{
    ConnectionError, ConnectionState, HalfState, SlicConfig, SlicConnection, StreamError,
    StreamId, TokioDuplex, ABANDONED_ERROR_CODE,
};
use tokio::time::timeout;
use tokio_stream::StreamExt;

const WAIT: Duration = Duration::from_secs(5);

async fn pair(client: SlicConfig, server: SlicConfig) -> (SlicConnection, SlicConnection) {
    let (a, b) = tokio::io::duplex(256 * 1024);
    let (client, server) = tokio::join!(
        SlicConnection::connect(TokioDuplex::new(a), client),
        SlicConnection::accept(TokioDuplex::new(b), server),
    );
    (client.unwrap(), server.unwrap())
}

async fn default_pair() -> (SlicConnection, SlicConnection) {
    pair(SlicConfig::default(), SlicConfig::default()).await
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_echo_on_bidirectional_stream() {
    let (client, server) = default_pair().await;

    let stream = client.open_stream(true).await.unwrap();
    assert_eq!(stream.id(), None);
    stream.write_last(&b"0123456789"[..]).await.unwrap();
    assert_eq!(stream.id(), Some(StreamId::new(0)));
    assert_eq!(stream.send_state(), HalfState::Closed);

    let accepted = server.accept_stream().await.unwrap();
    assert_eq!(accepted.id(), Some(StreamId::new(0)));
    assert!(!accepted.is_local());
    assert_eq!(&accepted.read_to_end().await.unwrap()[..], b"0123456789");
    accepted.write_last(&b"hello"[..]).await.unwrap();

    assert_eq!(&stream.read_to_end().await.unwrap()[..], b"hello");
    assert!(stream.is_closed());
    assert!(accepted.is_closed());
}

#[tokio::test]
async fn test_large_write_arrives_in_order() {
    let small = SlicConfig {
        pause_writer_threshold: 4096,
        resume_writer_threshold: 1024,
        max_stream_frame_size: 1000,
        ..Default::default()
    };
    let (client, server) = pair(small.clone(), small).await;
    let payload = pattern(1024 * 1024);

    let stream = client.open_stream(true).await.unwrap();
    let writer = {
        let stream = stream.clone();
        let payload = payload.clone();
        tokio::spawn(async move { stream.write_last(payload).await })
    };

    let accepted = server.accept_stream().await.unwrap();
    let mut received = Vec::new();
    let chunks = accepted.chunks();
    tokio::pin!(chunks);
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.unwrap();
        assert!(chunk.len() <= 1000);
        received.extend_from_slice(&chunk);
    }

    writer.await.unwrap().unwrap();
    assert_eq!(received, payload);
}

#[tokio::test]
async fn test_reset_only_affects_one_stream() {
    let (client, server) = default_pair().await;

    let a = client.open_stream(true).await.unwrap();
    let b = client.open_stream(true).await.unwrap();
    a.write(&b"a"[..]).await.unwrap();
    b.write(&b"b"[..]).await.unwrap();

    let server_a = server.accept_stream().await.unwrap();
    let server_b = server.accept_stream().await.unwrap();
    assert_eq!(server_a.id(), Some(StreamId::new(0)));
    assert_eq!(server_b.id(), Some(StreamId::new(4)));
    assert_eq!(&server_a.read().await.unwrap().unwrap()[..], b"a");

    a.reset(7);
    assert!(matches!(
        a.write(&b"more"[..]).await,
        Err(StreamError::Reset { error_code: 7, remote: false })
    ));
    assert!(matches!(
        timeout(WAIT, server_a.read()).await.unwrap(),
        Err(StreamError::Reset { error_code: 7, remote: true })
    ));

    b.write_last(&b"b2"[..]).await.unwrap();
    assert_eq!(&server_b.read_to_end().await.unwrap()[..], b"bb2");
    assert!(matches!(client.state(), ConnectionState::Established));
}

#[tokio::test]
async fn test_open_waits_for_free_slot() {
    let server_config = SlicConfig {
        max_bidirectional_streams: 1,
        ..Default::default()
    };
    let (client, server) = pair(SlicConfig::default(), server_config).await;

    let first = client.try_open_stream(true).unwrap();
    assert!(matches!(
        client.try_open_stream(true),
        Err(StreamError::Capacity { limit: 1, .. })
    ));

    let waiting = {
        let client = client.clone();
        tokio::spawn(async move { client.open_stream(true).await })
    };

    first.write_last(&b"ping"[..]).await.unwrap();
    let accepted = server.accept_stream().await.unwrap();
    assert_eq!(&accepted.read_to_end().await.unwrap()[..], b"ping");
    tokio::task::yield_now().await;
    assert!(!waiting.is_finished());

    accepted.write_last(&b"pong"[..]).await.unwrap();
    assert_eq!(&first.read_to_end().await.unwrap()[..], b"pong");

    let second = timeout(WAIT, waiting).await.unwrap().unwrap().unwrap();
    second.write_last(&b"again"[..]).await.unwrap();
    assert_eq!(second.id(), Some(StreamId::new(4)));
}

#[tokio::test]
async fn test_slot_frees_only_after_peer_reads_to_end() {
    let server_config = SlicConfig {
        max_unidirectional_streams: 1,
        ..Default::default()
    };
    let (client, server) = pair(SlicConfig::default(), server_config).await;

    let first = client.open_stream(false).await.unwrap();
    first.write_last(&b"unread"[..]).await.unwrap();
    let accepted = server.accept_stream().await.unwrap();

    let waiting = {
        let client = client.clone();
        tokio::spawn(async move { client.open_stream(false).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiting.is_finished(), "peer has not read the first stream");
    assert_eq!(server.stream_count(), 1);

    assert_eq!(&accepted.read_to_end().await.unwrap()[..], b"unread");
    let second = timeout(WAIT, waiting).await.unwrap().unwrap().unwrap();
    second.write_last(&b"next"[..]).await.unwrap();
    let accepted = server.accept_stream().await.unwrap();
    assert_eq!(&accepted.read_to_end().await.unwrap()[..], b"next");
    assert!(matches!(server.state(), ConnectionState::Established));
}

#[tokio::test]
async fn test_version_negotiation_retries_once() {
    let client_config = SlicConfig {
        versions: vec![1, 2],
        ..Default::default()
    };
    let server_config = SlicConfig {
        versions: vec![2],
        ..Default::default()
    };
    let (client, server) = pair(client_config, server_config).await;
    assert_eq!(client.parameters().version, 2);
    assert_eq!(server.parameters().version, 2);
}

#[tokio::test]
async fn test_no_common_version_fails() {
    let (a, b) = tokio::io::duplex(4096);
    let server_config = SlicConfig {
        versions: vec![2],
        ..Default::default()
    };
    let (client, server) = tokio::join!(
        SlicConnection::connect(TokioDuplex::new(a), SlicConfig::default()),
        SlicConnection::accept(TokioDuplex::new(b), server_config),
    );
    assert!(matches!(
        client,
        Err(ConnectionError::UnsupportedVersion { ref peer_versions }) if peer_versions == &[2]
    ));
    assert!(server.is_err());
}

#[tokio::test]
async fn test_abort_fails_every_pending_read_with_same_cause() {
    let (client, server) = default_pair().await;

    let mut readers = Vec::new();
    for _ in 0..3 {
        let stream = client.open_stream(true).await.unwrap();
        stream.write(&b"x"[..]).await.unwrap();
        let _ = server.accept_stream().await.unwrap();
        readers.push(tokio::spawn(async move { stream.read().await }));
    }
    tokio::task::yield_now().await;

    client.abort("test abort");
    let cause = match client.closed().await {
        Err(ConnectionError::Closed(reason)) => reason,
        other => panic!("unexpected close result: {other:?}"),
    };
    assert_eq!(cause, "test abort");
    for reader in readers {
        match timeout(WAIT, reader).await.unwrap().unwrap() {
            Err(StreamError::Connection(ConnectionError::Closed(reason))) => {
                assert_eq!(reason, cause)
            }
            other => panic!("unexpected read result: {other:?}"),
        }
    }
    assert!(matches!(
        client.open_stream(true).await,
        Err(StreamError::Connection(ConnectionError::Closed(_)))
    ));

    // The peer sees the channel close with streams still open.
    assert!(matches!(
        timeout(WAIT, server.closed()).await.unwrap(),
        Err(ConnectionError::ClosedByPeer)
    ));
}

#[tokio::test]
async fn test_graceful_shutdown_reports_reason() {
    let (client, server) = default_pair().await;

    let stream = client.open_stream(true).await.unwrap();
    stream.write_last(&b"bye"[..]).await.unwrap();
    let accepted = server.accept_stream().await.unwrap();
    accepted.read_to_end().await.unwrap();
    accepted.finish().await.unwrap();
    assert!(stream.read_to_end().await.unwrap().is_empty());

    let reason = client.shutdown(WAIT).await.unwrap();
    assert_eq!(reason, "connection shut down");
    assert_eq!(
        timeout(WAIT, server.closed()).await.unwrap().unwrap(),
        "connection closed by peer"
    );
    assert!(server.accept_stream().await.is_err());
}

#[tokio::test]
async fn test_shutdown_waits_for_open_streams() {
    let (client, server) = default_pair().await;

    let stream = client.open_stream(true).await.unwrap();
    stream.write(&b"first"[..]).await.unwrap();
    let accepted = server.accept_stream().await.unwrap();

    let shutdown = {
        let client = client.clone();
        tokio::spawn(async move { client.shutdown(WAIT).await })
    };
    timeout(WAIT, async {
        while matches!(client.state(), ConnectionState::Established) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(matches!(client.state(), ConnectionState::ShuttingDown));
    assert!(matches!(
        client.try_open_stream(true),
        Err(StreamError::Connection(ConnectionError::ShuttingDown))
    ));

    stream.write_last(&b" last"[..]).await.unwrap();
    assert_eq!(&accepted.read_to_end().await.unwrap()[..], b"first last");
    accepted.finish().await.unwrap();
    stream.read_to_end().await.unwrap();

    assert_eq!(shutdown.await.unwrap().unwrap(), "connection shut down");
}

#[tokio::test]
async fn test_shutdown_deadline_aborts() {
    let (client, server) = default_pair().await;

    let stream = client.open_stream(true).await.unwrap();
    stream.write(&b"stuck"[..]).await.unwrap();
    let _accepted = server.accept_stream().await.unwrap();

    assert!(matches!(
        client.shutdown(Duration::from_millis(50)).await,
        Err(ConnectionError::ShutdownTimeout)
    ));
    assert!(matches!(
        stream.read().await,
        Err(StreamError::Connection(ConnectionError::ShutdownTimeout))
    ));
}

#[tokio::test]
async fn test_stop_sending_fails_peer_writes() {
    let (client, server) = default_pair().await;

    let stream = client.open_stream(true).await.unwrap();
    stream.write(&b"start"[..]).await.unwrap();
    let accepted = server.accept_stream().await.unwrap();
    accepted.stop_sending(9);
    assert!(matches!(
        accepted.read().await,
        Err(StreamError::Stopped { error_code: 9, remote: false })
    ));

    let result = timeout(WAIT, async {
        loop {
            if let Err(err) = stream.write(Bytes::from_static(b"more")).await {
                return err;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(matches!(
        result,
        StreamError::Stopped { error_code: 9, remote: true }
    ));
}

#[tokio::test]
async fn test_unidirectional_stream_directions() {
    let (client, server) = default_pair().await;

    let stream = client.open_stream(false).await.unwrap();
    assert!(!stream.is_bidirectional());
    assert!(matches!(stream.read().await, Err(StreamError::NotReadable)));
    stream.write_last(&b"one way"[..]).await.unwrap();
    assert_eq!(stream.id(), Some(StreamId::new(2)));
    assert!(stream.is_closed());

    let accepted = server.accept_stream().await.unwrap();
    assert!(matches!(
        accepted.write(&b"back"[..]).await,
        Err(StreamError::NotWritable)
    ));
    assert_eq!(&accepted.read_to_end().await.unwrap()[..], b"one way");
}

#[tokio::test]
async fn test_server_opened_streams() {
    let (client, server) = default_pair().await;

    let stream = server.open_stream(true).await.unwrap();
    stream.write_last(&b"push"[..]).await.unwrap();
    assert_eq!(stream.id(), Some(StreamId::new(1)));

    let incoming = client.incoming();
    tokio::pin!(incoming);
    let accepted = timeout(WAIT, incoming.next()).await.unwrap().unwrap();
    assert_eq!(accepted.id(), Some(StreamId::new(1)));
    assert_eq!(&accepted.read_to_end().await.unwrap()[..], b"push");
}

#[tokio::test]
async fn test_dropped_stream_is_reset() {
    let (client, server) = default_pair().await;

    let stream = client.open_stream(true).await.unwrap();
    stream.write(&b"partial"[..]).await.unwrap();
    let accepted = server.accept_stream().await.unwrap();
    assert_eq!(&accepted.read().await.unwrap().unwrap()[..], b"partial");

    drop(stream);
    assert!(matches!(
        timeout(WAIT, accepted.read()).await.unwrap(),
        Err(StreamError::Reset { error_code, remote: true }) if error_code == ABANDONED_ERROR_CODE
    ));
    // Both sides gave the slot back.
    tokio::task::yield_now().await;
    assert_eq!(client.stream_count(), 0);
}

#[tokio::test]
async fn test_unstarted_stream_is_invisible_to_peer() {
    let (client, server) = default_pair().await;

    let unused = client.open_stream(true).await.unwrap();
    let used = client.open_stream(true).await.unwrap();
    used.write_last(&b"used"[..]).await.unwrap();
    drop(unused);

    let accepted = server.accept_stream().await.unwrap();
    assert_eq!(accepted.id(), Some(StreamId::new(0)));
    assert_eq!(&accepted.read_to_end().await.unwrap()[..], b"used");
    assert_eq!(client.stream_count(), 1);
}
