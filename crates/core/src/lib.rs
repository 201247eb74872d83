//! Shared types for the job-status feed.
//!
//! Holds the job identifier and status types, the JSON wire protocol
//! spoken with the feed, and the progress view that presentation
//! layers render from status updates.

pub mod error;
pub mod progress;
pub mod protocol;
pub mod types;

pub use error::CoreError;
pub use types::{JobId, JobStatus, Timestamp};
