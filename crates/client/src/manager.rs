//! The job feed client and its connection task.
//!
//! [`JobFeedClient`] is a cheap handle. All state lives in a single
//! background task that owns the socket, the retry timer, and the
//! [`FeedState`]; handle methods only enqueue commands for it, so
//! requests are applied in call order and never race with socket
//! events.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use jobfeed_core::protocol::{Action, ClientMessage, JobUpdate};
use jobfeed_core::{CoreError, JobId};

use crate::client::{FeedClientError, FeedConnection, FeedConnector, FeedStream};
use crate::config::ClientConfig;
use crate::events::FeedEvent;
use crate::processor::{process_frame, FrameOutcome};
use crate::reconnect::RetryDecision;
use crate::state::{ConnectionState, FeedState};

/// How long [`JobFeedClient::shutdown`] waits for the task to exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long disposal waits for the close handshake to go out.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type ConnectFuture = Pin<Box<dyn Future<Output = Result<FeedConnection, FeedClientError>> + Send>>;

/// Requests from the handle to the connection task.
enum Command {
    Track(JobId),
    Untrack(JobId),
    Connect,
    Tracked(oneshot::Sender<Vec<JobId>>),
}

/// Handle to a job feed connection.
///
/// Create one per owning view or service with [`JobFeedClient::new`]
/// (idle until [`connect`](Self::connect)) or [`JobFeedClient::start`]
/// (connects immediately). Must be created inside a tokio runtime.
/// Dropping the handle stops the connection task.
pub struct JobFeedClient {
    commands: mpsc::UnboundedSender<Command>,
    event_tx: broadcast::Sender<FeedEvent>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl JobFeedClient {
    /// Spawn the connection task in the `Disconnected` state.
    pub fn new(config: ClientConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let worker = FeedWorker::new(config, event_tx.clone(), state_tx, cancel.clone());
        let task = tokio::spawn(worker.run(command_rx));

        Self {
            commands,
            event_tx,
            state_rx,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Spawn the connection task and connect right away.
    pub fn start(config: ClientConfig) -> Self {
        let client = Self::new(config);
        // Cannot fail: the task was just spawned.
        let _ = client.send(Command::Connect);
        client
    }

    /// Start receiving job updates and connection events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<FeedEvent> {
        self.event_tx.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every connection state change,
    /// including [`ConnectionState::GaveUp`].
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Start tracking a job. Idempotent.
    ///
    /// The subscribe request goes out immediately when connected and is
    /// queued otherwise.
    pub fn track(&self, job_id: impl Into<String>) -> Result<(), FeedClientError> {
        let job_id = parse_job_id(job_id)?;
        self.send(Command::Track(job_id))
    }

    /// Stop tracking a job. Unknown ids are ignored.
    pub fn untrack(&self, job_id: impl Into<String>) -> Result<(), FeedClientError> {
        let job_id = parse_job_id(job_id)?;
        self.send(Command::Untrack(job_id))
    }

    /// Open the connection unless one is already connecting or open.
    ///
    /// After the client gave up, this starts over with a fresh retry
    /// budget. While a retry is pending, it connects without waiting.
    pub fn connect(&self) -> Result<(), FeedClientError> {
        self.send(Command::Connect)
    }

    /// Tracked job ids, in the order they were tracked.
    pub async fn tracked(&self) -> Result<Vec<JobId>, FeedClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Tracked(tx))?;
        rx.await.map_err(|_| FeedClientError::Closed)
    }

    /// Close the connection, cancel any pending retry, and wait for the
    /// connection task to exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job feed client");
        self.cancel.cancel();

        if let Some(task) = self.task.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                tracing::warn!("Job feed task did not exit in time");
            }
        }
    }

    fn send(&self, command: Command) -> Result<(), FeedClientError> {
        self.commands
            .send(command)
            .map_err(|_| FeedClientError::Closed)
    }
}

impl Drop for JobFeedClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn parse_job_id(raw: impl Into<String>) -> Result<JobId, FeedClientError> {
    JobId::new(raw).map_err(|e| FeedClientError::InvalidJobId(e.to_string()))
}

/// An open connection, split into its write and read halves.
struct Session {
    id: Uuid,
    sink: SplitSink<FeedStream, Message>,
    stream: SplitStream<FeedStream>,
}

/// Why a message did not reach the feed.
#[derive(Debug, thiserror::Error)]
enum SendError {
    #[error("encode error: {0}")]
    Encode(#[from] CoreError),

    #[error("send error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("cancelled")]
    Cancelled,
}

impl SendError {
    /// Only socket failures end the connection.
    fn drops_connection(&self) -> bool {
        !matches!(self, SendError::Encode(_))
    }
}

/// State owned by the connection task.
struct FeedWorker {
    config: ClientConfig,
    connector: FeedConnector,
    state: FeedState,
    event_tx: broadcast::Sender<FeedEvent>,
    state_tx: watch::Sender<ConnectionState>,
    session: Option<Session>,
    connecting: Option<ConnectFuture>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    cancel: CancellationToken,
}

impl FeedWorker {
    fn new(
        config: ClientConfig,
        event_tx: broadcast::Sender<FeedEvent>,
        state_tx: watch::Sender<ConnectionState>,
        cancel: CancellationToken,
    ) -> Self {
        let connector = FeedConnector::new(config.endpoint_url.clone(), config.connect_timeout);
        let state = FeedState::new(config.retry_policy(), config.resubscribe_on_reconnect);
        Self {
            config,
            connector,
            state,
            event_tx,
            state_tx,
            session: None,
            connecting: None,
            retry_timer: None,
            cancel,
        }
    }

    /// Serve commands and socket events until cancelled or until every
    /// handle is gone.
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let cancel = self.cancel.clone();
        tracing::debug!(url = %self.connector.url(), "Job feed task started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                result = wait_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result).await;
                }
                _ = wait_retry(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    self.start_connect();
                }
                frame = next_frame(&mut self.session) => {
                    let session_id = self.session.as_ref().map(|s| s.id).unwrap_or_default();
                    match process_frame(frame, self.config.id_field, session_id) {
                        FrameOutcome::Update(update) => self.on_update(update).await,
                        FrameOutcome::Skip => {}
                        FrameOutcome::Closed(reason) => self.connection_lost(reason),
                    }
                }
            }
        }

        self.dispose().await;
        tracing::debug!("Job feed task exited");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Track(job_id) => {
                tracing::debug!(job_id = %job_id, "Tracking job");
                if let Some(message) = self.state.track(job_id) {
                    self.send_or_drop(message).await;
                }
            }
            Command::Untrack(job_id) => {
                tracing::debug!(job_id = %job_id, "Untracking job");
                if let Some(message) = self.state.untrack(&job_id) {
                    self.send_or_drop(message).await;
                }
            }
            Command::Connect => self.start_connect(),
            Command::Tracked(reply) => {
                let _ = reply.send(self.state.tracked().to_vec());
            }
        }
    }

    /// Begin a connection attempt unless one is already live.
    fn start_connect(&mut self) {
        if !self.state.begin_connect() {
            tracing::debug!("Job feed already connecting or connected");
            return;
        }
        // An explicit connect supersedes a scheduled retry.
        self.retry_timer = None;
        self.publish_state();

        tracing::info!(
            url = %self.connector.url(),
            attempt = self.state.retries(),
            "Connecting to job feed",
        );
        let connector = self.connector.clone();
        self.connecting = Some(Box::pin(async move { connector.connect().await }));
    }

    async fn on_connect_result(&mut self, result: Result<FeedConnection, FeedClientError>) {
        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "Job feed connection attempt failed");
                self.connection_lost(e.to_string());
                return;
            }
        };

        let (sink, stream) = conn.ws_stream.split();
        self.session = Some(Session {
            id: conn.session_id,
            sink,
            stream,
        });

        let queued = self.state.on_open();
        self.publish_state();
        self.emit(FeedEvent::Connected {
            session_id: conn.session_id,
        });
        tracing::info!(
            session_id = %conn.session_id,
            queued = queued.len(),
            "Job feed connection open, flushing queued subscriptions",
        );

        let mut queued = queued.into_iter();
        while let Some(message) = queued.next() {
            if let Err(e) = self.send_message(&message).await {
                let fatal = e.drops_connection();
                self.state.requeue(&message.job_id);
                if fatal {
                    for rest in queued.by_ref() {
                        self.state.requeue(&rest.job_id);
                    }
                }
                self.on_send_failed(&message, e);
                if fatal {
                    return;
                }
            }
        }
    }

    async fn on_update(&mut self, update: JobUpdate) {
        if !self.state.is_tracked(&update.job_id) {
            tracing::trace!(job_id = %update.job_id, "Dropping update for untracked job");
            return;
        }

        let finished = self.config.untrack_on_terminal && update.status.is_terminal();
        let job_id = update.job_id.clone();
        self.emit(FeedEvent::Update(update));

        if finished {
            tracing::debug!(job_id = %job_id, "Job finished, untracking");
            if let Some(message) = self.state.untrack(&job_id) {
                self.send_or_drop(message).await;
            }
        }
    }

    /// Send a message; a failed write tears the connection down.
    async fn send_or_drop(&mut self, message: ClientMessage) {
        if let Err(e) = self.send_message(&message).await {
            self.on_send_failed(&message, e);
        }
    }

    /// A subscribe that did not go out goes back in the queue, so the
    /// id is re-sent on the next open.
    fn on_send_failed(&mut self, message: &ClientMessage, error: SendError) {
        if message.action == Action::Subscribe {
            self.state.requeue(&message.job_id);
        }
        match error {
            SendError::Encode(e) => {
                tracing::error!(job_id = %message.job_id, error = %e, "Failed to encode feed message");
            }
            SendError::Socket(e) => self.connection_lost(format!("send error: {e}")),
            SendError::Cancelled => {
                tracing::debug!(job_id = %message.job_id, "Send abandoned on shutdown");
            }
        }
    }

    /// Write one message. The write is abandoned if the client is shut
    /// down while the feed is not reading.
    async fn send_message(&mut self, message: &ClientMessage) -> Result<(), SendError> {
        let frame = message.encode(self.config.id_field)?;

        let Some(session) = self.session.as_mut() else {
            return Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed.into());
        };

        tracing::debug!(
            session_id = %session.id,
            job_id = %message.job_id,
            action = message.action.as_str(),
            "Sending feed message",
        );
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SendError::Cancelled),
            result = session.sink.send(Message::Text(frame)) => Ok(result?),
        }
    }

    /// The current attempt failed or the open connection dropped:
    /// schedule a retry or give up.
    fn connection_lost(&mut self, reason: String) {
        if let Some(session) = self.session.take() {
            tracing::warn!(session_id = %session.id, reason = %reason, "Job feed connection lost");
        }
        self.emit(FeedEvent::Disconnected {
            reason: reason.clone(),
        });

        match self.state.on_closed() {
            RetryDecision::Retry { attempt, delay } => {
                tracing::info!(
                    attempt,
                    max_attempts = self.config.max_reconnect_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting to job feed ({attempt}/{})",
                    self.config.max_reconnect_attempts,
                );
                self.emit(FeedEvent::Reconnecting {
                    attempt,
                    max_attempts: self.config.max_reconnect_attempts,
                    delay_ms: delay.as_millis() as u64,
                });
                self.retry_timer = Some(Box::pin(tokio::time::sleep(delay)));
            }
            RetryDecision::GiveUp { attempts } => {
                tracing::error!(
                    attempts,
                    "Max reconnection attempts reached, job feed client is idle",
                );
                self.emit(FeedEvent::GaveUp { attempts });
            }
        }
        self.publish_state();
    }

    /// Close the socket and drop any in-flight attempt or retry.
    async fn dispose(&mut self) {
        self.retry_timer = None;
        self.connecting = None;

        if let Some(mut session) = self.session.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, session.sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(session_id = %session.id, error = %e, "Error closing job feed socket");
                }
                Err(_) => {
                    tracing::debug!(session_id = %session.id, "Job feed socket did not close in time");
                }
            }
            tracing::info!(session_id = %session.id, "Job feed connection closed");
        }

        self.state.on_disposed();
        self.publish_state();
    }

    fn emit(&self, event: FeedEvent) {
        // Ignore the SendError: it only means nobody is subscribed.
        let _ = self.event_tx.send(event);
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.state.state());
    }
}

async fn wait_connect(
    connecting: &mut Option<ConnectFuture>,
) -> Result<FeedConnection, FeedClientError> {
    match connecting {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn wait_retry(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(
    session: &mut Option<Session>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match session {
        Some(session) => session.stream.next().await,
        None => std::future::pending().await,
    }
}
