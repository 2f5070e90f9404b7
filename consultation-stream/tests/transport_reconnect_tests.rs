//! Integration tests for the transcription transport:
//! connection lifecycle, exponential-backoff reconnection, terminal
//! configuration failures, and disconnect quiescence — all against a local
//! in-process WebSocket endpoint.

mod common;

use common::{bind_endpoint, results_frame, wait_until, BrokenIssuer, TestIssuer};
use consultation_stream::{
    AudioFrame, ConnectionState, ReconnectConfig, TranscriptionTransport, TransportEvent,
    TransportFailure,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

const KEEPALIVE: Duration = Duration::from_secs(8);

fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        base_delay_ms: 5,
        max_delay_ms: 40,
        max_attempts,
    }
}

fn transport(url: &str, reconnect: ReconnectConfig) -> TranscriptionTransport {
    TranscriptionTransport::new(
        Uuid::new_v4(),
        reconnect,
        KEEPALIVE,
        Arc::new(TestIssuer {
            url: url.to_string(),
        }),
    )
}

async fn wait_for_state(
    transport: &TranscriptionTransport,
    target: ConnectionState,
) -> bool {
    let watch = transport.watch_state();
    wait_until(|| *watch.borrow() == target, Duration::from_secs(5)).await
}

#[tokio::test]
async fn test_final_segments_arrive_in_remote_order() {
    let (listener, url) = bind_endpoint().await;

    // Endpoint sends three final results, then idles
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        for text in ["first segment", "second segment", "third segment"] {
            socket
                .send(Message::Text(results_frame(text, true)))
                .await
                .unwrap();
        }
        // Keep the connection open until the client closes it
        while socket.next().await.is_some() {}
    });

    let mut transport = transport(&url, fast_reconnect(5));
    let (event_tx, mut events) = mpsc::channel(32);
    transport.connect(event_tx).unwrap();

    let mut received = Vec::new();
    while received.len() < 3 {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(TransportEvent::Final(segment))) => received.push(segment.text),
            Ok(Some(_)) => {}
            other => panic!("stream ended early: {other:?}"),
        }
    }

    assert_eq!(
        received,
        vec!["first segment", "second segment", "third segment"]
    );

    transport.disconnect().await;
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_interim_and_final_classification() {
    let (listener, url) = bind_endpoint().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        socket
            .send(Message::Text(results_frame("partial tho", false)))
            .await
            .unwrap();
        socket
            .send(Message::Text(results_frame("partial thought complete", true)))
            .await
            .unwrap();
        while socket.next().await.is_some() {}
    });

    let mut transport = transport(&url, fast_reconnect(5));
    let (event_tx, mut events) = mpsc::channel(32);
    transport.connect(event_tx).unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(first, TransportEvent::Interim(ref s) if s.text == "partial tho"));
    assert!(
        matches!(second, TransportEvent::Final(ref s) if s.text == "partial thought complete")
    );

    transport.disconnect().await;
}

#[tokio::test]
async fn test_survives_unexpected_closes_then_delivers() {
    let (listener, url) = bind_endpoint().await;
    let connections = Arc::new(AtomicUsize::new(0));
    let server_connections = Arc::clone(&connections);

    // First two connections are dropped right after the handshake; the
    // third behaves
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let n = server_connections.fetch_add(1, Ordering::SeqCst);
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            if n < 2 {
                let _ = socket.close(None).await;
                continue;
            }
            socket
                .send(Message::Text(results_frame("back online", true)))
                .await
                .unwrap();
            while socket.next().await.is_some() {}
        }
    });

    let mut transport = transport(&url, fast_reconnect(5));
    let (event_tx, mut events) = mpsc::channel(32);
    transport.connect(event_tx).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("transport should reconnect and deliver")
        .unwrap();

    assert!(matches!(event, TransportEvent::Final(ref s) if s.text == "back online"));
    assert_eq!(connections.load(Ordering::SeqCst), 3);
    assert_eq!(transport.state(), ConnectionState::Connected);

    transport.disconnect().await;
}

#[tokio::test]
async fn test_fails_after_max_reconnect_attempts() {
    let (listener, url) = bind_endpoint().await;

    // Accept one connection, close it, then vanish entirely
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = socket.close(None).await;
        drop(listener);
    });

    let mut transport = transport(&url, fast_reconnect(2));
    let (event_tx, mut events) = mpsc::channel(32);
    transport.connect(event_tx).unwrap();

    let failure = loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("expected terminal failure")
        {
            Some(TransportEvent::Failed(failure)) => break failure,
            Some(_) => {}
            None => panic!("event channel closed without failure"),
        }
    };

    assert!(
        matches!(failure, TransportFailure::RetriesExhausted { attempts: 2 }),
        "got {failure:?}"
    );
    assert_eq!(transport.state(), ConnectionState::Failed);

    // The worker is gone; the event channel drains to closed
    assert!(events.recv().await.is_none());

    transport.disconnect().await;
}

#[tokio::test]
async fn test_configuration_error_is_terminal_without_retry() {
    let mut transport = TranscriptionTransport::new(
        Uuid::new_v4(),
        fast_reconnect(5),
        KEEPALIVE,
        Arc::new(BrokenIssuer),
    );

    let (event_tx, mut events) = mpsc::channel(32);
    transport.connect(event_tx).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();

    assert!(
        matches!(event, TransportEvent::Failed(TransportFailure::Configuration(_))),
        "got {event:?}"
    );
    assert_eq!(transport.state(), ConnectionState::Failed);

    // Reported once, no retry: the channel closes with no further events
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_disconnect_quiesces_inbound_events() {
    let (listener, url) = bind_endpoint().await;

    // Endpoint floods results until the connection drops
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut n = 0u32;
        loop {
            n += 1;
            if socket
                .send(Message::Text(results_frame(&format!("chatter {n}"), true)))
                .await
                .is_err()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });

    let mut transport = transport(&url, fast_reconnect(5));
    let (event_tx, mut events) = mpsc::channel(256);
    transport.connect(event_tx).unwrap();

    // Let some traffic flow, then cut the line
    let _ = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    transport.disconnect().await;

    // Buffered events may drain, but the channel must close: the worker is
    // gone and nothing can send after disconnect returned
    let quiesced = tokio::time::timeout(Duration::from_secs(1), async {
        while events.recv().await.is_some() {}
    })
    .await;
    assert!(quiesced.is_ok(), "events kept flowing after disconnect");

    // Terminal: a second connect on this instance is rejected
    let (event_tx, _events) = mpsc::channel(8);
    assert!(transport.connect(event_tx).is_err());
}

#[tokio::test]
async fn test_frames_flow_only_while_connected() {
    let (listener, url) = bind_endpoint().await;
    let binary_count = Arc::new(AtomicUsize::new(0));
    let server_count = Arc::clone(&binary_count);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = socket.next().await {
            if let Message::Binary(payload) = message {
                server_count.fetch_add(1, Ordering::SeqCst);
                // Acknowledge with a final result so the client can observe
                // that its audio arrived
                let ack = results_frame(&format!("ack {}", payload.len()), true);
                let _ = socket.send(Message::Text(ack)).await;
            }
        }
    });

    let mut transport = transport(&url, fast_reconnect(5));

    // Not connected yet: frames are dropped on the floor, not queued
    transport.send_frame(AudioFrame::new(vec![1; 160], 16_000));

    let (event_tx, mut events) = mpsc::channel(32);
    transport.connect(event_tx).unwrap();
    assert!(wait_for_state(&transport, ConnectionState::Connected).await);

    transport.send_frame(AudioFrame::new(vec![2; 160], 16_000));

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(
        matches!(event, TransportEvent::Final(ref s) if s.text == "ack 320"),
        "got {event:?}"
    );
    assert_eq!(
        binary_count.load(Ordering::SeqCst),
        1,
        "the pre-connect frame must not have been queued"
    );

    transport.disconnect().await;
}

#[tokio::test]
async fn test_connect_is_idempotent_while_active() {
    let (listener, url) = bind_endpoint().await;
    let connections = Arc::new(AtomicUsize::new(0));
    let server_connections = Arc::clone(&connections);

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            server_connections.fetch_add(1, Ordering::SeqCst);
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            while socket.next().await.is_some() {}
        }
    });

    let mut transport = transport(&url, fast_reconnect(5));
    let (event_tx, _events) = mpsc::channel(32);
    transport.connect(event_tx).unwrap();
    assert!(wait_for_state(&transport, ConnectionState::Connected).await);

    // Repeated connects while connected are a no-op
    let (event_tx2, _events2) = mpsc::channel(32);
    transport.connect(event_tx2).unwrap();
    let (event_tx3, _events3) = mpsc::channel(32);
    transport.connect(event_tx3).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connections.load(Ordering::SeqCst), 1);

    transport.disconnect().await;
}
