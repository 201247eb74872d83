//! WebSocket connector for the job-status feed.
//!
//! [`FeedConnector`] holds the endpoint and handshake deadline. Each
//! call to [`FeedConnector::connect`] opens a fresh
//! [`FeedConnection`] tagged with a new session id.

use std::fmt;
use std::time::Duration;

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

/// The raw WebSocket stream type used for the feed.
pub type FeedStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection settings for one feed endpoint.
#[derive(Debug, Clone)]
pub struct FeedConnector {
    url: String,
    connect_timeout: Duration,
}

/// A live connection to the feed.
pub struct FeedConnection {
    /// Identifies this connection in logs and events.
    pub session_id: Uuid,
    pub ws_stream: FeedStream,
}

impl fmt::Debug for FeedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedConnection")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl FeedConnector {
    /// * `url`             - WebSocket URL, e.g. `wss://host/ws/jobs/`.
    /// * `connect_timeout` - deadline for the whole handshake.
    pub fn new(url: String, connect_timeout: Duration) -> Self {
        Self {
            url,
            connect_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open a WebSocket connection to the feed.
    ///
    /// An attempt that does not finish within the connect timeout is
    /// abandoned and reported as [`FeedClientError::Timeout`].
    pub async fn connect(&self) -> Result<FeedConnection, FeedClientError> {
        let session_id = Uuid::new_v4();

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| FeedClientError::Timeout(self.connect_timeout))?
                .map_err(|e| {
                    FeedClientError::Connection(format!(
                        "Failed to connect to job feed at {}: {e}",
                        self.url
                    ))
                })?;

        tracing::info!(
            session_id = %session_id,
            "Connected to job feed at {}",
            self.url,
        );

        Ok(FeedConnection {
            session_id,
            ws_stream,
        })
    }
}

/// Errors surfaced by the feed client.
#[derive(Debug, thiserror::Error)]
pub enum FeedClientError {
    /// Failed to establish a WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The handshake did not complete in time.
    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The caller passed an empty job id.
    #[error("Invalid job id: {0}")]
    InvalidJobId(String),

    /// The client has been shut down.
    #[error("Job feed client is shut down")]
    Closed,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = FeedConnector::new(format!("ws://{addr}/ws/jobs/"), Duration::from_secs(5));
        assert_matches!(connector.connect().await, Err(FeedClientError::Connection(_)));
    }

    #[tokio::test]
    async fn connect_times_out_when_handshake_stalls() {
        // Accepts TCP but never answers the HTTP upgrade.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connector =
            FeedConnector::new(format!("ws://{addr}/ws/jobs/"), Duration::from_millis(100));
        assert_matches!(connector.connect().await, Err(FeedClientError::Timeout(_)));
        drop(listener);
    }

    #[tokio::test]
    async fn connection_debug_shows_session_id() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio_tungstenite::accept_async(stream).await.unwrap()
        });

        let connector = FeedConnector::new(format!("ws://{addr}/ws/jobs/"), Duration::from_secs(5));
        let conn = connector.connect().await.unwrap();
        let shown = format!("{conn:?}");
        assert!(shown.contains(&conn.session_id.to_string()));
        drop(server.await.unwrap());
    }
}
