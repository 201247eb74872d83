//! Events broadcast by the feed client.

use serde::Serialize;
use uuid::Uuid;

use jobfeed_core::protocol::JobUpdate;

/// Something the client observed, delivered to every subscriber.
#[derive(Debug, Clone, Serialize)]
pub enum FeedEvent {
    /// A connection to the feed opened.
    Connected { session_id: Uuid },

    /// A connection attempt failed or an open connection dropped.
    Disconnected { reason: String },

    /// A reconnect attempt is scheduled.
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },

    /// The retry ceiling was reached; the client stays idle until
    /// `connect` is called again.
    GaveUp { attempts: u32 },

    /// A status update for a tracked job.
    Update(JobUpdate),
}
