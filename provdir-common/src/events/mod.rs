//! Event types for the pipeline event system
//!
//! Events are broadcast via the EventBus so that progress reporting (console,
//! future UIs) stays decoupled from stage execution. Emission is lossy by
//! design: a run with no subscribers proceeds normally.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline event types
///
/// The first component to detect a condition emits the event; errors are not
/// re-emitted through multiple layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Pipeline run accepted and started
    RunStarted {
        run_id: Uuid,
        input_path: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage began processing the batch
    StageStarted {
        run_id: Uuid,
        stage: String,
        total_records: usize,
        timestamp: DateTime<Utc>,
    },

    /// A stage finished and checkpointed its output
    StageCompleted {
        run_id: Uuid,
        stage: String,
        processed: usize,
        failed_checks: usize,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An input row was rejected before entering the pipeline
    RowRejected {
        run_id: Uuid,
        line: usize,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A record was routed by the scoring stage
    RecordDecided {
        run_id: Uuid,
        identifier: String,
        decision: String,
        composite_score: f64,
        timestamp: DateTime<Utc>,
    },

    /// Run reached a terminal state successfully
    RunCompleted {
        run_id: Uuid,
        auto: usize,
        review: usize,
        hold: usize,
        rejected: usize,
        timestamp: DateTime<Utc>,
    },

    /// Run failed with a stage-level error
    RunFailed {
        run_id: Uuid,
        stage: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast event bus shared by the orchestrator and any observers
///
/// Thin wrapper over `tokio::sync::broadcast`: multiple producers, multiple
/// consumers, bounded buffer with oldest-event eviction for slow receivers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscriber case
    ///
    /// Progress events are advisory; the pipeline never blocks or fails on
    /// event delivery.
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of currently attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let run_id = Uuid::new_v4();
        bus.emit_lossy(PipelineEvent::RunStarted {
            run_id,
            input_path: "providers.csv".to_string(),
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            PipelineEvent::RunStarted { run_id: got, .. } => assert_eq!(got, run_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn emit_without_subscribers_is_not_an_error() {
        let bus = EventBus::new(4);
        bus.emit_lossy(PipelineEvent::RunFailed {
            run_id: Uuid::new_v4(),
            stage: "VERIFYING".to_string(),
            error: "store unreachable".to_string(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
