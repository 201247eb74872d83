//! Inbound frame handling.
//!
//! Turns raw WebSocket frames from the feed into [`FrameOutcome`]s.
//! Malformed text frames are logged and skipped; they never end the
//! connection.

use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use uuid::Uuid;

use jobfeed_core::protocol::{decode_update, IdField, JobUpdate};

/// Result of processing one item from the feed stream.
#[derive(Debug)]
pub enum FrameOutcome {
    /// A decoded job update, not yet filtered by tracked ids.
    Update(JobUpdate),
    /// Nothing to act on.
    Skip,
    /// The connection is finished.
    Closed(String),
}

/// Classify the next item read from the feed stream.
///
/// `None` means the stream is exhausted.
pub fn process_frame(
    frame: Option<Result<Message, WsError>>,
    id_field: IdField,
    session_id: Uuid,
) -> FrameOutcome {
    match frame {
        Some(Ok(Message::Text(text))) => match decode_update(&text, id_field) {
            Ok(update) => {
                tracing::debug!(
                    session_id = %session_id,
                    job_id = %update.job_id,
                    status = %update.status,
                    "Received job update",
                );
                FrameOutcome::Update(update)
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    raw_message = %text,
                    "Failed to parse job feed message",
                );
                FrameOutcome::Skip
            }
        },
        Some(Ok(Message::Binary(_))) => {
            tracing::trace!(session_id = %session_id, "Ignoring binary frame");
            FrameOutcome::Skip
        }
        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
            // Handled automatically by tungstenite.
            FrameOutcome::Skip
        }
        Some(Ok(Message::Frame(_))) => FrameOutcome::Skip,
        Some(Ok(Message::Close(frame))) => {
            tracing::info!(session_id = %session_id, ?frame, "Job feed closed the connection");
            let reason = match frame {
                Some(frame) => format!(
                    "closed by feed ({}): {}",
                    u16::from(frame.code),
                    frame.reason
                ),
                None => "closed by feed".to_string(),
            };
            FrameOutcome::Closed(reason)
        }
        Some(Err(e)) => {
            tracing::error!(session_id = %session_id, error = %e, "WebSocket receive error");
            FrameOutcome::Closed(format!("receive error: {e}"))
        }
        None => {
            tracing::info!(session_id = %session_id, "Job feed stream exhausted");
            FrameOutcome::Closed("stream exhausted".to_string())
        }
    }
}
