//! The four pipeline stages.
//!
//! The outline stage is the only one that can fail a run. Expansion and
//! validation work slide by slide and formatting batch by batch; a failed
//! unit is replaced by its fallback record and the stage moves on, so their
//! outputs always have the same length and order as their inputs.

pub mod expansion;
pub mod formatting;
pub mod outline;
pub mod validation;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use deckforge_llm::GenerationService;
use deckforge_retrieval::ContextRetriever;
use deckforge_types::{Passage, StageError, StageKind};

use crate::config::PipelineConfig;
use crate::events::{EventEmitter, PipelineEvent};

/// Collaborators and bookkeeping shared by the stages of one run.
pub struct RunContext<'a> {
    pub run_id: &'a str,
    pub generator: &'a dyn GenerationService,
    pub retriever: &'a dyn ContextRetriever,
    pub config: &'a PipelineConfig,
    events: &'a EventEmitter,
    fallbacks: AtomicUsize,
}

impl<'a> RunContext<'a> {
    pub fn new(
        run_id: &'a str,
        generator: &'a dyn GenerationService,
        retriever: &'a dyn ContextRetriever,
        config: &'a PipelineConfig,
        events: &'a EventEmitter,
    ) -> Self {
        Self {
            run_id,
            generator,
            retriever,
            config,
            events,
            fallbacks: AtomicUsize::new(0),
        }
    }

    /// One generation call with the stage's model settings.
    pub async fn generate(&self, stage: StageKind, prompt: &str) -> Result<String, StageError> {
        let config = self.config.generation(stage);
        tracing::debug!(
            run_id = self.run_id,
            stage = %stage,
            model = %config.model,
            prompt_chars = prompt.len(),
            "generation request"
        );
        self.generator
            .generate(prompt, config)
            .await
            .map_err(|source| StageError::Generation { stage, source })
    }

    /// Up to `limit` passages for `query`. Retrieval failures are logged and
    /// treated as "no context".
    pub async fn retrieve(&self, stage: StageKind, query: &str, limit: usize) -> Vec<Passage> {
        if limit == 0 || query.trim().is_empty() {
            return Vec::new();
        }
        match self.retriever.query(query).await {
            Ok(mut passages) => {
                passages.truncate(limit);
                passages
            }
            Err(e) => {
                tracing::warn!(run_id = self.run_id, stage = %stage, error = %e, "context retrieval failed; continuing without context");
                Vec::new()
            }
        }
    }

    /// Record that slide `slide` of `stage` got its fallback record.
    pub fn fallback(&self, stage: StageKind, slide: usize, title: &str, error: &StageError) {
        tracing::warn!(
            run_id = self.run_id,
            stage = %stage,
            slide,
            title,
            kind = error.kind_label(),
            error = %error,
            "substituting fallback record"
        );
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        self.events.emit(PipelineEvent::FallbackApplied {
            run_id: self.run_id.to_string(),
            stage,
            slide,
            title: title.to_string(),
            reason: error.to_string(),
        });
    }

    pub(crate) fn begin(&self, stage: StageKind) -> Instant {
        tracing::info!(run_id = self.run_id, stage = %stage, "stage started");
        self.fallbacks.store(0, Ordering::Relaxed);
        self.events.emit(PipelineEvent::StageStarted {
            run_id: self.run_id.to_string(),
            stage,
        });
        Instant::now()
    }

    pub(crate) fn complete(&self, stage: StageKind, started: Instant, items: usize) {
        let fallbacks = self.fallbacks.swap(0, Ordering::Relaxed);
        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = self.run_id,
            stage = %stage,
            items,
            fallbacks,
            duration_ms,
            "stage completed"
        );
        self.events.emit(PipelineEvent::StageCompleted {
            run_id: self.run_id.to_string(),
            stage,
            items,
            fallbacks,
            duration_ms,
        });
    }

    pub(crate) fn emit(&self, event: PipelineEvent) {
        self.events.emit(event);
    }
}
