//! Fixed-delay reconnection policy for the feed connection.
//!
//! After a connection closes (or an attempt fails) the client waits a
//! constant delay and tries again, up to a ceiling of consecutive
//! attempts. The count restarts whenever a connection opens.

use std::time::Duration;

/// Tunable parameters for reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive attempts allowed without a successful open.
    pub max_attempts: u32,
    /// Delay before each attempt.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// What to do after a connection closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule attempt number `attempt` after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// The ceiling is reached; stop reconnecting.
    GiveUp { attempts: u32 },
}

impl RetryPolicy {
    /// Decide the next step given how many attempts have already been
    /// made since the last successful open.
    pub fn decide(&self, attempts_so_far: u32) -> RetryDecision {
        if attempts_so_far < self.max_attempts {
            RetryDecision::Retry {
                attempt: attempts_so_far + 1,
                delay: self.delay,
            }
        } else {
            RetryDecision::GiveUp {
                attempts: attempts_so_far,
            }
        }
    }
}
