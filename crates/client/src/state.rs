//! Connection and subscription bookkeeping for the feed client.
//!
//! [`FeedState`] performs no IO. The connection task feeds it
//! transport events (`on_open`, `on_closed`) and caller requests
//! (`track`, `untrack`), and sends whatever [`ClientMessage`]s it hands
//! back. Keeping the rules here lets them be exercised without a
//! socket.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use jobfeed_core::protocol::ClientMessage;
use jobfeed_core::JobId;

use crate::reconnect::{RetryDecision, RetryPolicy};

/// Lifecycle of the single feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// No connection has been requested yet, or the client was disposed.
    Disconnected,
    /// A handshake is in flight.
    Connecting,
    Open,
    /// The last connection dropped or failed; a retry may be pending.
    Closed,
    /// The retry ceiling was reached. Only an explicit connect leaves it.
    GaveUp,
}

/// Subscription set, pending queue, and retry counter.
#[derive(Debug)]
pub struct FeedState {
    policy: RetryPolicy,
    resubscribe: bool,
    state: ConnectionState,
    retries: u32,
    /// Tracked ids in the order they were tracked.
    tracked: Vec<JobId>,
    tracked_set: HashSet<JobId>,
    /// Tracked ids whose subscribe has not been sent yet.
    pending: VecDeque<JobId>,
}

impl FeedState {
    pub fn new(policy: RetryPolicy, resubscribe: bool) -> Self {
        Self {
            policy,
            resubscribe,
            state: ConnectionState::Disconnected,
            retries: 0,
            tracked: Vec::new(),
            tracked_set: HashSet::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive reconnect attempts since the last successful open.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn tracked(&self) -> &[JobId] {
        &self.tracked
    }

    pub fn is_tracked(&self, job_id: &JobId) -> bool {
        self.tracked_set.contains(job_id)
    }

    pub fn pending(&self) -> impl Iterator<Item = &JobId> {
        self.pending.iter()
    }

    /// Start tracking `job_id`.
    ///
    /// Returns the subscribe message to send right away when the
    /// connection is open; otherwise the id is queued. Tracking an id
    /// twice is a no-op.
    pub fn track(&mut self, job_id: JobId) -> Option<ClientMessage> {
        if !self.tracked_set.insert(job_id.clone()) {
            return None;
        }
        self.tracked.push(job_id.clone());

        if self.state == ConnectionState::Open {
            Some(ClientMessage::subscribe(job_id))
        } else {
            self.pending.push_back(job_id);
            None
        }
    }

    /// Stop tracking `job_id`.
    ///
    /// Returns the unsubscribe message when the connection is open.
    /// While disconnected the id is just dropped from the queue.
    pub fn untrack(&mut self, job_id: &JobId) -> Option<ClientMessage> {
        if !self.tracked_set.remove(job_id) {
            return None;
        }
        self.tracked.retain(|id| id != job_id);

        let was_pending = self.remove_pending(job_id);
        if self.state == ConnectionState::Open && !was_pending {
            Some(ClientMessage::unsubscribe(job_id.clone()))
        } else {
            None
        }
    }

    /// Put a tracked id back in the queue after its subscribe failed
    /// to go out.
    pub fn requeue(&mut self, job_id: &JobId) {
        if self.is_tracked(job_id) && !self.pending.contains(job_id) {
            self.pending.push_back(job_id.clone());
        }
    }

    /// Move to `Connecting` if a new connection may be opened.
    ///
    /// Returns `false` while already connecting or open, so at most one
    /// connection exists at a time. Leaving `GaveUp` this way starts
    /// the retry count from zero.
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => false,
            ConnectionState::GaveUp => {
                self.retries = 0;
                self.state = ConnectionState::Connecting;
                true
            }
            ConnectionState::Disconnected | ConnectionState::Closed => {
                self.state = ConnectionState::Connecting;
                true
            }
        }
    }

    /// The connection opened: reset the retry count and drain the
    /// queue, in tracking order, into subscribe messages.
    pub fn on_open(&mut self) -> Vec<ClientMessage> {
        self.state = ConnectionState::Open;
        self.retries = 0;
        self.pending
            .drain(..)
            .map(ClientMessage::subscribe)
            .collect()
    }

    /// The connection attempt failed or an open connection dropped.
    ///
    /// With resubscription enabled every tracked id goes back in the
    /// queue, since the feed forgets subscriptions with the connection.
    pub fn on_closed(&mut self) -> RetryDecision {
        if self.resubscribe {
            self.pending = self.tracked.iter().cloned().collect();
        }

        let decision = self.policy.decide(self.retries);
        match decision {
            RetryDecision::Retry { attempt, .. } => {
                self.retries = attempt;
                self.state = ConnectionState::Closed;
            }
            RetryDecision::GiveUp { .. } => {
                self.state = ConnectionState::GaveUp;
            }
        }
        decision
    }

    /// The client was disposed. Subscriptions are kept so the state
    /// stays inspectable; nothing is sent.
    pub fn on_disposed(&mut self) {
        if self.resubscribe {
            self.pending = self.tracked.iter().cloned().collect();
        }
        self.state = ConnectionState::Disconnected;
    }

    fn remove_pending(&mut self, job_id: &JobId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|id| id != job_id);
        self.pending.len() != before
    }
}
