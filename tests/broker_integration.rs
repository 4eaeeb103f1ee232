//! End-to-end tests against a real rendezvous broker bound to a loopback
//! port, driven by real `tokio-tungstenite` client connections. Covers the
//! rendezvous happy path, key collision, and hold timeout scenarios.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;

use peerlink::broker::BrokerPool;

async fn spawn_broker() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let pool = BrokerPool::new();

    tokio::spawn(async move {
        loop {
            let (tcp_stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                if let Ok(ws_stream) =
                    tokio_tungstenite::accept_async(MaybeTlsStream::Plain(tcp_stream)).await
                {
                    pool.handle_connection(ws_stream).await;
                }
            });
        }
    });

    format!("ws://{addr}")
}

async fn dial(url: &str) -> tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>> {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

async fn recv_text(
    stream: &mut tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
) -> String {
    match stream.next().await {
        Some(Ok(Message::Text(t))) => t.to_string(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_s1_rendezvous_happy_path_and_byte_echo() {
    let url = spawn_broker().await;

    let mut a = dial(&url).await;
    a.send(Message::Text("ab".into())).await.unwrap();
    assert_eq!(recv_text(&mut a).await, "OFFER");

    let mut b = dial(&url).await;
    b.send(Message::Text("ab".into())).await.unwrap();
    assert_eq!(recv_text(&mut b).await, "ANSWER");

    assert_eq!(recv_text(&mut a).await, "Ready");
    assert_eq!(recv_text(&mut b).await, "Ready");

    a.send(Message::Text("hoi".into())).await.unwrap();
    assert_eq!(recv_text(&mut b).await, "hoi");

    b.send(Message::Text("hey".into())).await.unwrap();
    assert_eq!(recv_text(&mut a).await, "hey");

    a.close(None).await.unwrap();
    // b's next read must observe the relay tearing down, not just time out.
    let result = tokio::time::timeout(Duration::from_secs(2), b.next())
        .await
        .expect("broker must close b's socket once a disconnects, not leave it hanging");
    match result {
        Some(Ok(Message::Close(_))) | None => {}
        other => panic!("expected close/EOF after peer closed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_s2_rendezvous_collision() {
    let url = spawn_broker().await;

    let mut a = dial(&url).await;
    a.send(Message::Text("collide".into())).await.unwrap();
    assert_eq!(recv_text(&mut a).await, "OFFER");

    // A third client arrives before an answerer claims the slot... wait,
    // the slot isn't "both filled" until an answerer arrives. To exercise
    // the true collision case we first let b become the answerer, then
    // have c arrive while the pair is relaying.
    let mut b = dial(&url).await;
    b.send(Message::Text("collide".into())).await.unwrap();
    assert_eq!(recv_text(&mut b).await, "ANSWER");
    assert_eq!(recv_text(&mut a).await, "Ready");
    assert_eq!(recv_text(&mut b).await, "Ready");

    let mut c = dial(&url).await;
    c.send(Message::Text("collide".into())).await.unwrap();
    assert_eq!(recv_text(&mut c).await, "KO: slot already allocated");
}

#[tokio::test]
async fn test_s3_hold_timeout() {
    // This test exercises the real 10s hold window, so it is slower than
    // the rest of the suite by design.
    let url = spawn_broker().await;

    let mut a = dial(&url).await;
    a.send(Message::Text("lonely".into())).await.unwrap();
    assert_eq!(recv_text(&mut a).await, "OFFER");

    let msg = tokio::time::timeout(Duration::from_secs(12), recv_text(&mut a))
        .await
        .expect("broker should respond within the hold window");
    assert_eq!(msg, "Fatal: timeout");

    // The key is immediately reusable once the slot is released.
    let mut a2 = dial(&url).await;
    a2.send(Message::Text("lonely".into())).await.unwrap();
    assert_eq!(recv_text(&mut a2).await, "OFFER");
}
