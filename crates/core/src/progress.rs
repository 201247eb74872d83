//! Presentation mapping from job status to a progress indicator.
//!
//! The feed only reports coarse lifecycle states, so progress is a
//! fixed step per state rather than a measured fraction.

use serde::Serialize;

use crate::protocol::JobUpdate;
use crate::types::{JobId, JobStatus};

/// Progress shown while the job is running.
pub const PROGRESS_STARTED: u8 = 25;
pub const PROGRESS_RUNNING: u8 = 50;
pub const PROGRESS_DONE: u8 = 100;

/// Completion percentage (0-100) for a job in `status`.
pub fn percent_for(status: JobStatus) -> u8 {
    match status {
        JobStatus::Started => PROGRESS_STARTED,
        JobStatus::Progress => PROGRESS_RUNNING,
        JobStatus::Success | JobStatus::Failure | JobStatus::Revoked => PROGRESS_DONE,
        JobStatus::Pending | JobStatus::Received | JobStatus::Retry => 0,
    }
}

/// Everything a renderer needs to draw one job's progress bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressView {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Completion percentage (0-100).
    pub percent: u8,
    /// Render in the error style.
    pub failed: bool,
    /// Result payload as compact JSON, if the feed sent one.
    pub result: Option<String>,
}

impl ProgressView {
    pub fn from_update(update: &JobUpdate) -> Self {
        Self {
            job_id: update.job_id.clone(),
            status: update.status,
            percent: percent_for(update.status),
            failed: update.status.is_failed(),
            result: update.result.as_ref().map(|v| v.to_string()),
        }
    }

    /// One-line text rendering, e.g. `42 [#####.....] 50% PROGRESS`.
    pub fn render_line(&self) -> String {
        const WIDTH: usize = 10;
        let filled = usize::from(self.percent) * WIDTH / 100;
        let bar: String = "#".repeat(filled) + &".".repeat(WIDTH - filled);
        let mut line = format!("{} [{bar}] {:>3}% {}", self.job_id, self.percent, self.status);
        if let Some(ref result) = self.result {
            line.push_str(" result=");
            line.push_str(result);
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(status: JobStatus, result: Option<serde_json::Value>) -> JobUpdate {
        JobUpdate {
            job_id: JobId::new("42").unwrap(),
            status,
            result,
            received_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn percent_per_status() {
        assert_eq!(percent_for(JobStatus::Pending), 0);
        assert_eq!(percent_for(JobStatus::Started), 25);
        assert_eq!(percent_for(JobStatus::Progress), 50);
        assert_eq!(percent_for(JobStatus::Success), 100);
        assert_eq!(percent_for(JobStatus::Failure), 100);
    }

    #[test]
    fn failure_renders_as_failed() {
        let view = ProgressView::from_update(&update(JobStatus::Failure, None));
        assert!(view.failed);
        assert_eq!(view.percent, 100);

        let view = ProgressView::from_update(&update(JobStatus::Success, None));
        assert!(!view.failed);
    }

    #[test]
    fn result_is_compact_json() {
        let view = ProgressView::from_update(&update(
            JobStatus::Success,
            Some(serde_json::json!({"ok": true})),
        ));
        assert_eq!(view.result.as_deref(), Some(r#"{"ok":true}"#));
    }

    #[test]
    fn render_line_shows_bar_and_percent() {
        let view = ProgressView::from_update(&update(JobStatus::Progress, None));
        assert_eq!(view.render_line(), "42 [#####.....]  50% PROGRESS");
    }
}
