//! WebSocket client for the job-status feed.
//!
//! [`JobFeedClient`] keeps a single connection to the feed, tracks the
//! job ids a caller is interested in, re-sends their subscriptions
//! whenever the connection comes back, and retries a dropped
//! connection a bounded number of times with a fixed delay.
//!
//! Job updates and connection lifecycle changes are broadcast as
//! [`FeedEvent`]s; call [`JobFeedClient::subscribe_events`] to receive
//! them.

pub mod client;
pub mod config;
pub mod events;
pub mod manager;
pub mod processor;
pub mod reconnect;
pub mod state;

pub use client::{FeedClientError, FeedConnector};
pub use config::{ClientConfig, ConfigError};
pub use events::FeedEvent;
pub use manager::JobFeedClient;
pub use state::ConnectionState;
