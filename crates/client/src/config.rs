//! Client configuration.
//!
//! | Env Var                           | Default    |
//! |-----------------------------------|------------|
//! | `JOB_FEED_URL`                    | (required) |
//! | `JOB_FEED_MAX_RECONNECT_ATTEMPTS` | `5`        |
//! | `JOB_FEED_RECONNECT_DELAY_MS`     | `5000`     |
//! | `JOB_FEED_CONNECT_TIMEOUT_MS`     | `10000`    |
//! | `JOB_FEED_ID_FIELD`               | `job_id`   |
//! | `JOB_FEED_RESUBSCRIBE`            | `true`     |
//! | `JOB_FEED_UNTRACK_ON_TERMINAL`    | `false`    |

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use jobfeed_core::protocol::IdField;

use crate::reconnect::RetryPolicy;

/// Path of the job flavour of the feed.
pub const JOBS_FEED_PATH: &str = "/ws/jobs/";

/// Path of the task-status flavour of the feed.
pub const TASK_STATUS_FEED_PATH: &str = "/ws/task_status/";

const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Broadcast channel capacity for feed events.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Settings for a [`JobFeedClient`](crate::JobFeedClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the feed, e.g. `wss://host/ws/jobs/`.
    pub endpoint_url: String,
    /// Consecutive reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Fixed delay between a disconnect and the next attempt.
    pub reconnect_delay: Duration,
    /// Handshake deadline for a single connection attempt.
    pub connect_timeout: Duration,
    /// JSON key carrying the job identifier.
    pub id_field: IdField,
    /// Re-send every tracked subscription after a reconnect.
    pub resubscribe_on_reconnect: bool,
    /// Stop tracking a job once it reports a terminal status.
    pub untrack_on_terminal: bool,
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Configuration with default tuning for the given endpoint.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            id_field: IdField::JobId,
            resubscribe_on_reconnect: true,
            untrack_on_terminal: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Derive the endpoint from a host (`host[:port]`) and a feed path.
    pub fn for_host(host: &str, secure: bool, path: &str) -> Self {
        let scheme = if secure { "wss" } else { "ws" };
        Self::new(format!("{scheme}://{host}{path}"))
    }

    /// Job flavour of the feed: `/ws/jobs/`, keyed by `job_id`.
    pub fn jobs_feed(host: &str, secure: bool) -> Self {
        Self::for_host(host, secure, JOBS_FEED_PATH)
    }

    /// Task-status flavour of the feed: `/ws/task_status/`, keyed by
    /// `task_id`. Finished tasks are untracked automatically.
    pub fn task_status_feed(host: &str, secure: bool) -> Self {
        Self {
            id_field: IdField::TaskId,
            untrack_on_terminal: true,
            ..Self::for_host(host, secure, TASK_STATUS_FEED_PATH)
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint_url = lookup("JOB_FEED_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("JOB_FEED_URL"))?;

        let mut config = Self::new(endpoint_url);

        config.max_reconnect_attempts = parse_var(
            &lookup,
            "JOB_FEED_MAX_RECONNECT_ATTEMPTS",
            DEFAULT_MAX_RECONNECT_ATTEMPTS,
        )?;
        config.reconnect_delay = Duration::from_millis(parse_var(
            &lookup,
            "JOB_FEED_RECONNECT_DELAY_MS",
            DEFAULT_RECONNECT_DELAY_MS,
        )?);
        config.connect_timeout = Duration::from_millis(parse_var(
            &lookup,
            "JOB_FEED_CONNECT_TIMEOUT_MS",
            DEFAULT_CONNECT_TIMEOUT_MS,
        )?);
        config.id_field = parse_var(&lookup, "JOB_FEED_ID_FIELD", IdField::JobId)?;
        config.resubscribe_on_reconnect = parse_flag(&lookup, "JOB_FEED_RESUBSCRIBE", true)?;
        config.untrack_on_terminal = parse_flag(&lookup, "JOB_FEED_UNTRACK_ON_TERMINAL", false)?;

        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_reconnect_attempts,
            delay: self.reconnect_delay,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_flag<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected true or false".into(),
        }),
    }
}

/// Errors raised while loading a [`ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::new("ws://localhost/ws/jobs/");
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_millis(5000));
        assert_eq!(config.id_field, IdField::JobId);
        assert!(config.resubscribe_on_reconnect);
        assert!(!config.untrack_on_terminal);
    }

    #[test]
    fn for_host_builds_secure_url() {
        let config = ClientConfig::jobs_feed("dash.example.com", true);
        assert_eq!(config.endpoint_url, "wss://dash.example.com/ws/jobs/");
    }

    #[test]
    fn task_status_feed_uses_task_id() {
        let config = ClientConfig::task_status_feed("localhost:8000", false);
        assert_eq!(config.endpoint_url, "ws://localhost:8000/ws/task_status/");
        assert_eq!(config.id_field, IdField::TaskId);
        assert!(config.untrack_on_terminal);
    }

    #[test]
    fn from_lookup_requires_url() {
        let result = ClientConfig::from_lookup(lookup_from(&[]));
        assert_matches!(result, Err(ConfigError::Missing("JOB_FEED_URL")));

        let result = ClientConfig::from_lookup(lookup_from(&[("JOB_FEED_URL", "  ")]));
        assert_matches!(result, Err(ConfigError::Missing("JOB_FEED_URL")));
    }

    #[test]
    fn from_lookup_reads_overrides() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            ("JOB_FEED_URL", "ws://feed:8000/ws/task_status/"),
            ("JOB_FEED_MAX_RECONNECT_ATTEMPTS", "2"),
            ("JOB_FEED_RECONNECT_DELAY_MS", "250"),
            ("JOB_FEED_ID_FIELD", "task_id"),
            ("JOB_FEED_RESUBSCRIBE", "no"),
            ("JOB_FEED_UNTRACK_ON_TERMINAL", "1"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint_url, "ws://feed:8000/ws/task_status/");
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.id_field, IdField::TaskId);
        assert!(!config.resubscribe_on_reconnect);
        assert!(config.untrack_on_terminal);
    }

    #[test]
    fn from_lookup_rejects_bad_numbers() {
        let result = ClientConfig::from_lookup(lookup_from(&[
            ("JOB_FEED_URL", "ws://feed/ws/jobs/"),
            ("JOB_FEED_RECONNECT_DELAY_MS", "soon"),
        ]));
        assert_matches!(
            result,
            Err(ConfigError::Invalid { key: "JOB_FEED_RECONNECT_DELAY_MS", .. })
        );
    }

    #[test]
    fn from_lookup_rejects_bad_flags() {
        let result = ClientConfig::from_lookup(lookup_from(&[
            ("JOB_FEED_URL", "ws://feed/ws/jobs/"),
            ("JOB_FEED_RESUBSCRIBE", "maybe"),
        ]));
        assert_matches!(result, Err(ConfigError::Invalid { key: "JOB_FEED_RESUBSCRIBE", .. }));
    }

    #[test]
    fn retry_policy_mirrors_config() {
        let mut config = ClientConfig::new("ws://feed/ws/jobs/");
        config.max_reconnect_attempts = 3;
        config.reconnect_delay = Duration::from_millis(10);
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(10));
    }
}
