//! JSON wire protocol spoken with the job-status feed.
//!
//! Outbound frames ask the feed to start or stop pushing updates for a
//! job: `{"action": "subscribe", "job_id": "<id>"}`. Inbound frames
//! carry `{"job_id": "<id>", "status": "<STATE>", "result": <any>}`.
//!
//! Deployments disagree on the identifier key: the job flavour of the
//! feed uses `job_id`, the task-status flavour uses `task_id`. Both are
//! the same identifier, selected through [`IdField`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, JobStatus, Timestamp};

/// Name of the JSON key holding the job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdField {
    #[default]
    JobId,
    TaskId,
}

impl IdField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JobId => "job_id",
            Self::TaskId => "task_id",
        }
    }

    /// The key used by the other feed flavour.
    pub fn other(self) -> Self {
        match self {
            Self::JobId => Self::TaskId,
            Self::TaskId => Self::JobId,
        }
    }
}

impl fmt::Display for IdField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdField {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "job_id" => Ok(Self::JobId),
            "task_id" => Ok(Self::TaskId),
            other => Err(CoreError::Validation(format!(
                "unknown id field '{other}', expected 'job_id' or 'task_id'"
            ))),
        }
    }
}

/// Requested change to the feed's subscription set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// A frame sent from the client to the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub action: Action,
    pub job_id: JobId,
}

impl ClientMessage {
    pub fn subscribe(job_id: JobId) -> Self {
        Self {
            action: Action::Subscribe,
            job_id,
        }
    }

    pub fn unsubscribe(job_id: JobId) -> Self {
        Self {
            action: Action::Unsubscribe,
            job_id,
        }
    }

    /// Serialize into a JSON text frame using `field` as the id key.
    pub fn encode(&self, field: IdField) -> Result<String, CoreError> {
        let mut obj = serde_json::Map::new();
        obj.insert(
            "action".to_string(),
            serde_json::Value::String(self.action.as_str().to_string()),
        );
        obj.insert(
            field.as_str().to_string(),
            serde_json::Value::String(self.job_id.as_str().to_string()),
        );
        Ok(serde_json::to_string(&serde_json::Value::Object(obj))?)
    }
}

/// A status update for one job, as pushed by the feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobUpdate {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Arbitrary result payload; `None` when absent or `null`.
    pub result: Option<serde_json::Value>,
    /// When the frame was decoded on this side (UTC).
    pub received_at: Timestamp,
}

/// Inbound frame as it appears on the wire. Unknown keys (such as the
/// channel-layer `"type"`) are ignored.
#[derive(Debug, Deserialize)]
struct RawUpdate {
    job_id: Option<String>,
    task_id: Option<String>,
    status: JobStatus,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

impl RawUpdate {
    fn take_id(&mut self, field: IdField) -> Option<String> {
        match field {
            IdField::JobId => self.job_id.take(),
            IdField::TaskId => self.task_id.take(),
        }
    }
}

/// Parse an inbound text frame into a [`JobUpdate`].
///
/// The identifier is read from `field`, falling back to the other
/// flavour's key. Returns `Err` for malformed JSON, an unknown status,
/// or a missing/empty identifier; callers log and drop those frames.
pub fn decode_update(text: &str, field: IdField) -> Result<JobUpdate, CoreError> {
    let mut raw: RawUpdate =
        serde_json::from_str(text).map_err(|e| CoreError::Decode(e.to_string()))?;

    let id = raw
        .take_id(field)
        .or_else(|| raw.take_id(field.other()))
        .ok_or_else(|| CoreError::Decode(format!("missing '{field}' field")))?;

    let job_id = JobId::new(id).map_err(|e| CoreError::Decode(e.to_string()))?;

    Ok(JobUpdate {
        job_id,
        status: raw.status,
        result: raw.result.filter(|v| !v.is_null()),
        received_at: chrono::Utc::now(),
    })
}
