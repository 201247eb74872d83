//! In-process job feed used by the integration tests.
//!
//! Binds a WebSocket server on `127.0.0.1:0`. Every accepted
//! connection is handed to the test as a [`FeedConn`] that records the
//! text frames the client sent and lets the test push frames back.

#![allow(dead_code)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use jobfeed_client::{ClientConfig, FeedEvent};
use jobfeed_core::protocol::JobUpdate;

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

pub struct MockFeed {
    pub url: String,
    conns: mpsc::UnboundedReceiver<FeedConn>,
}

/// Server side of one client connection. Dropping it drops the socket
/// without a close handshake.
pub struct FeedConn {
    frames: mpsc::UnboundedReceiver<String>,
    push: mpsc::UnboundedSender<Message>,
}

impl MockFeed {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conns) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else {
                        return;
                    };
                    let (mut sink, mut stream) = ws.split();
                    let (push, mut push_rx) = mpsc::unbounded_channel::<Message>();
                    let (frame_tx, frames) = mpsc::unbounded_channel::<String>();
                    if conn_tx.send(FeedConn { frames, push }).is_err() {
                        return;
                    }

                    loop {
                        tokio::select! {
                            outbound = push_rx.recv() => match outbound {
                                Some(msg) => {
                                    let is_close = matches!(msg, Message::Close(_));
                                    if sink.send(msg).await.is_err() || is_close {
                                        break;
                                    }
                                }
                                None => break,
                            },
                            inbound = stream.next() => match inbound {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = frame_tx.send(text);
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                        }
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}/ws/jobs/"),
            conns,
        }
    }

    /// Wait for the client to open a connection.
    pub async fn accept(&mut self) -> FeedConn {
        tokio::time::timeout(WAIT, self.conns.recv())
            .await
            .expect("timed out waiting for a client connection")
            .expect("feed server stopped")
    }

    /// Assert no new connection arrives for a short while.
    pub async fn expect_no_connection(&mut self) {
        let result = tokio::time::timeout(Duration::from_millis(300), self.conns.recv()).await;
        assert!(result.is_err(), "unexpected client connection");
    }

    /// Client config pointed at this feed with fast retries.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.url.clone());
        config.reconnect_delay = Duration::from_millis(50);
        config.connect_timeout = Duration::from_secs(2);
        config
    }
}

/// A feed that completes the handshake and then never reads, so the
/// client's writes eventually block. Returns its URL.
pub async fn start_unread_feed() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = accept_async(stream).await {
                held.push(ws);
            }
        }
    });

    format!("ws://{addr}/ws/jobs/")
}

impl FeedConn {
    /// Next text frame sent by the client.
    pub async fn next_frame(&mut self) -> String {
        tokio::time::timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("connection closed before a frame arrived")
    }

    /// Assert the client sends nothing for a short while.
    pub async fn expect_silence(&mut self) {
        let result = tokio::time::timeout(Duration::from_millis(200), self.frames.recv()).await;
        if let Ok(Some(frame)) = result {
            panic!("unexpected frame from client: {frame}");
        }
    }

    /// Wait until the client side closes the connection.
    pub async fn wait_closed(&mut self) {
        let closed = tokio::time::timeout(WAIT, async {
            while self.frames.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "client did not close the connection");
    }

    pub fn push(&self, text: &str) {
        self.push
            .send(Message::Text(text.to_string()))
            .expect("connection task gone");
    }

    /// Close with a proper close frame.
    pub fn close(self) {
        let _ = self.push.send(Message::Close(None));
    }
}

pub fn subscribe_frame(id: &str) -> String {
    format!(r#"{{"action":"subscribe","job_id":"{id}"}}"#)
}

pub fn unsubscribe_frame(id: &str) -> String {
    format!(r#"{{"action":"unsubscribe","job_id":"{id}"}}"#)
}

/// Next event of any kind.
pub async fn next_event(rx: &mut broadcast::Receiver<FeedEvent>) -> FeedEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a feed event")
        .expect("event channel closed")
}

/// Next job update, skipping connection lifecycle events.
pub async fn next_update(rx: &mut broadcast::Receiver<FeedEvent>) -> JobUpdate {
    loop {
        if let FeedEvent::Update(update) = next_event(rx).await {
            return update;
        }
    }
}

/// Attempt number of the next scheduled reconnect.
pub async fn next_reconnect_attempt(rx: &mut broadcast::Receiver<FeedEvent>) -> u32 {
    loop {
        if let FeedEvent::Reconnecting { attempt, .. } = next_event(rx).await {
            return attempt;
        }
    }
}

/// Wait until the client reports an open connection.
pub async fn wait_connected(rx: &mut broadcast::Receiver<FeedEvent>) {
    loop {
        if let FeedEvent::Connected { .. } = next_event(rx).await {
            return;
        }
    }
}
