//! `jobfeed-watch` -- follow job progress from the job-status feed.
//!
//! Connects to the feed, tracks the given job ids, and prints a
//! progress line for every update until all of them have finished.
//! Job ids come from the command line, or from `JOB_IDS` when no
//! arguments are given.
//!
//! # Environment variables
//!
//! | Variable                          | Required | Default  | Description                                   |
//! |-----------------------------------|----------|----------|-----------------------------------------------|
//! | `JOB_FEED_URL`                    | yes      | --       | Feed endpoint, e.g. `wss://host/ws/jobs/`     |
//! | `JOB_IDS`                         | no       | --       | Comma-separated job ids to follow             |
//! | `JOB_FEED_MAX_RECONNECT_ATTEMPTS` | no       | `5`      | Reconnect attempts before giving up           |
//! | `JOB_FEED_RECONNECT_DELAY_MS`     | no       | `5000`   | Delay between reconnect attempts              |
//! | `JOB_FEED_CONNECT_TIMEOUT_MS`     | no       | `10000`  | Handshake deadline                            |
//! | `JOB_FEED_ID_FIELD`               | no       | `job_id` | `job_id` or `task_id`                         |
//! | `JOB_FEED_RESUBSCRIBE`            | no       | `true`   | Re-send subscriptions after reconnecting      |
//! | `JOB_FEED_UNTRACK_ON_TERMINAL`    | no       | `false`  | Unsubscribe from jobs once they finish        |

use std::collections::HashSet;

use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobfeed_client::{ClientConfig, FeedEvent, JobFeedClient};
use jobfeed_core::progress::ProgressView;
use jobfeed_core::protocol::JobUpdate;
use jobfeed_core::JobId;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobfeed_watch=info,jobfeed_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    let job_ids = collect_job_ids(args, std::env::var("JOB_IDS").ok()).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid job id");
        std::process::exit(1);
    });
    if job_ids.is_empty() {
        tracing::error!("No job ids given; pass them as arguments or set JOB_IDS");
        std::process::exit(1);
    }

    tracing::info!(
        url = %config.endpoint_url,
        jobs = job_ids.len(),
        max_reconnect_attempts = config.max_reconnect_attempts,
        "Starting jobfeed-watch",
    );

    let client = JobFeedClient::new(config);
    let mut events = client.subscribe_events();
    let mut board = JobBoard::new(&job_ids);

    for job_id in &job_ids {
        if let Err(e) = client.track(job_id.as_str()) {
            tracing::error!(job_id = %job_id, error = %e, "Failed to track job");
        }
    }
    if let Err(e) = client.connect() {
        tracing::error!(error = %e, "Failed to start job feed client");
        std::process::exit(1);
    }

    let exit_code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break 130;
            }
            event = events.recv() => match event {
                Ok(FeedEvent::Update(update)) => {
                    println!("{}", ProgressView::from_update(&update).render_line());
                    if board.record(&update) {
                        tracing::info!(failed = board.failed(), "All jobs finished");
                        break if board.failed() > 0 { 2 } else { 0 };
                    }
                }
                Ok(FeedEvent::GaveUp { attempts }) => {
                    tracing::error!(attempts, "Lost the job feed and gave up reconnecting");
                    break 1;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event consumer fell behind, resubscribing running jobs");
                    resync_running(&client, &board);
                }
                Err(RecvError::Closed) => break 1,
            }
        }
    };

    client.shutdown().await;
    std::process::exit(exit_code);
}

/// Job ids from the arguments, or from the comma-separated `JOB_IDS`
/// value when there are none. Duplicates are dropped, order is kept.
fn collect_job_ids(
    args: Vec<String>,
    env_ids: Option<String>,
) -> Result<Vec<JobId>, jobfeed_core::CoreError> {
    let raw: Vec<String> = if args.is_empty() {
        env_ids
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    } else {
        args
    };

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for value in raw {
        let id = JobId::new(value)?;
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Re-send the subscriptions of jobs that have not finished. The feed
/// answers a subscribe with the job's current status, which replaces
/// any update dropped while the consumer lagged.
fn resync_running(client: &JobFeedClient, board: &JobBoard) {
    for job_id in board.running() {
        let result = client
            .untrack(job_id.as_str())
            .and_then(|()| client.track(job_id.as_str()));
        if let Err(e) = result {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to resubscribe job");
        }
    }
}

/// Which of the watched jobs are still running, in watch order.
struct JobBoard {
    running: Vec<JobId>,
    failed: usize,
}

impl JobBoard {
    fn new(job_ids: &[JobId]) -> Self {
        Self {
            running: job_ids.to_vec(),
            failed: 0,
        }
    }

    /// Record an update; returns `true` once every job has finished.
    fn record(&mut self, update: &JobUpdate) -> bool {
        if update.status.is_terminal() {
            if let Some(pos) = self.running.iter().position(|id| *id == update.job_id) {
                self.running.remove(pos);
                if update.status.is_failed() {
                    self.failed += 1;
                }
            }
        }
        self.running.is_empty()
    }

    fn running(&self) -> &[JobId] {
        &self.running
    }

    fn failed(&self) -> usize {
        self.failed
    }
}
