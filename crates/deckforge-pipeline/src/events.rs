//! Run progress events.
//!
//! [`PipelineEvent`]s go out on a [`tokio::sync::broadcast`] channel so that
//! observers (the CLI progress line, tests) can follow a run without reaching
//! into the orchestrator.

use serde::{Deserialize, Serialize};

use deckforge_types::StageKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        topic: String,
        slide_count: usize,
    },
    StageStarted {
        run_id: String,
        stage: StageKind,
    },
    StageCompleted {
        run_id: String,
        stage: StageKind,
        items: usize,
        fallbacks: usize,
        duration_ms: u64,
    },
    /// A slide's stage output was replaced by its fallback record.
    FallbackApplied {
        run_id: String,
        stage: StageKind,
        slide: usize,
        title: String,
        reason: String,
    },
    RunCompleted {
        run_id: String,
        slides: usize,
        summary: String,
        duration_ms: u64,
    },
    RunFailed {
        run_id: String,
        error: String,
    },
}

impl PipelineEvent {
    pub fn run_id(&self) -> &str {
        match self {
            PipelineEvent::RunStarted { run_id, .. }
            | PipelineEvent::StageStarted { run_id, .. }
            | PipelineEvent::StageCompleted { run_id, .. }
            | PipelineEvent::FallbackApplied { run_id, .. }
            | PipelineEvent::RunCompleted { run_id, .. }
            | PipelineEvent::RunFailed { run_id, .. } => run_id,
        }
    }
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Send to all current subscribers; dropped when nobody listens.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(PipelineEvent::StageStarted {
            run_id: "r1".into(),
            stage: StageKind::Validation,
        });

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1, e2);
        assert_eq!(e1.run_id(), "r1");
    }

    #[test]
    fn emit_with_no_subscribers_is_dropped() {
        let emitter = EventEmitter::new(4);
        emitter.emit(PipelineEvent::RunFailed {
            run_id: "r".into(),
            error: "outline failed".into(),
        });
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = PipelineEvent::FallbackApplied {
            run_id: "r".into(),
            stage: StageKind::Expansion,
            slide: 2,
            title: "Risks".into(),
            reason: "reply was not valid JSON".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "fallback_applied");
        assert_eq!(json["stage"], "expansion");
        assert_eq!(json["slide"], 2);

        let back: PipelineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
