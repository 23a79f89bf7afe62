//! Run progress broadcaster for real-time pipeline status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Phase of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Accepted,
    Extracting,
    Transforming,
    CleaningUp,
    QualityCheck,
    Completed,
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Accepted => write!(f, "Accepted"),
            RunPhase::Extracting => write!(f, "Extracting"),
            RunPhase::Transforming => write!(f, "Transforming"),
            RunPhase::CleaningUp => write!(f, "Cleaning up"),
            RunPhase::QualityCheck => write!(f, "Quality check"),
            RunPhase::Completed => write!(f, "Completed"),
            RunPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Overall state of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Failed,
}

/// Progress event for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgressEvent {
    /// Unique run identifier.
    pub run_id: String,
    /// Tenant the run belongs to.
    pub client_name: String,
    /// Current phase of the run.
    pub phase: RunPhase,
    /// Overall run state.
    pub state: RunState,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunProgressEvent {
    pub fn new(run_id: &str, client_name: &str, phase: RunPhase, message: &str) -> Self {
        let state = match phase {
            RunPhase::Completed => RunState::Completed,
            RunPhase::Failed => RunState::Failed,
            _ => RunState::Running,
        };

        Self {
            run_id: run_id.to_string(),
            client_name: client_name.to_string(),
            phase,
            state,
            message: message.to_string(),
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(run_id: &str, client_name: &str, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(run_id, client_name, RunPhase::Failed, "Run failed")
        }
    }
}

/// Shared broadcaster handing out subscriptions to run progress events.
pub struct RunProgressBroadcaster {
    sender: Arc<broadcast::Sender<RunProgressEvent>>,
}

impl RunProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker bound to one run.
    pub fn tracker(&self, run_id: &str, client_name: &str) -> RunProgressTracker {
        RunProgressTracker {
            run_id: run_id.to_string(),
            client_name: client_name.to_string(),
            sender: Arc::clone(&self.sender),
        }
    }
}

impl Default for RunProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Emits events for one run. Sending with no subscribers is fine; the
/// event is simply dropped.
pub struct RunProgressTracker {
    run_id: String,
    client_name: String,
    sender: Arc<broadcast::Sender<RunProgressEvent>>,
}

impl RunProgressTracker {
    pub fn update_phase(&self, phase: RunPhase, message: &str) {
        let _ = self.sender.send(RunProgressEvent::new(
            &self.run_id,
            &self.client_name,
            phase,
            message,
        ));
    }

    pub fn completed(&self, message: &str) {
        let _ = self.sender.send(RunProgressEvent::new(
            &self.run_id,
            &self.client_name,
            RunPhase::Completed,
            message,
        ));
    }

    pub fn failed(&self, error: &str) {
        let _ = self
            .sender
            .send(RunProgressEvent::failed(&self.run_id, &self.client_name, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_derives_state() {
        let event = RunProgressEvent::new("r1", "acme", RunPhase::Extracting, "step A");
        assert_eq!(event.state, RunState::Running);

        let event = RunProgressEvent::new("r1", "acme", RunPhase::Completed, "done");
        assert_eq!(event.state, RunState::Completed);

        let event = RunProgressEvent::failed("r1", "acme", "boom");
        assert_eq!(event.state, RunState::Failed);
        assert_eq!(event.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_tracker_delivers_to_subscriber() {
        let broadcaster = RunProgressBroadcaster::default();
        let mut rx = broadcaster.subscribe();

        let tracker = broadcaster.tracker("run-1", "acme");
        tracker.update_phase(RunPhase::Extracting, "running extract");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id, "run-1");
        assert_eq!(event.client_name, "acme");
        assert_eq!(event.phase, RunPhase::Extracting);
    }

    #[test]
    fn test_send_without_subscribers_does_not_panic() {
        let broadcaster = RunProgressBroadcaster::default();
        let tracker = broadcaster.tracker("run-1", "acme");
        tracker.completed("all good");
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = RunProgressEvent::new("r1", "acme", RunPhase::QualityCheck, "cat 1/3");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["runId"], "r1");
        assert_eq!(json["clientName"], "acme");
        assert_eq!(json["phase"], "quality_check");
    }
}
