//! Runs the stages in order: outline, expansion, validation, formatting.
//!
//! [`PresentationPipeline::run`] never fails: a fatal stage error, or a panic
//! inside the run, produces [`FinalPresentation::pipeline_failed`].

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use deckforge_llm::GenerationService;
use deckforge_retrieval::ContextRetriever;
use deckforge_types::{FinalPresentation, StageError, StageKind};

use crate::config::PipelineConfig;
use crate::events::{EventEmitter, PipelineEvent};
use crate::stages::{expansion, formatting, outline, validation, RunContext};

/// Topic-to-deck pipeline over a generation service and a retriever.
#[derive(Clone)]
pub struct PresentationPipeline {
    generator: Arc<dyn GenerationService>,
    retriever: Arc<dyn ContextRetriever>,
    config: PipelineConfig,
    events: EventEmitter,
}

impl PresentationPipeline {
    pub fn new(
        generator: Arc<dyn GenerationService>,
        retriever: Arc<dyn ContextRetriever>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            generator,
            retriever,
            config,
            events: EventEmitter::default(),
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Run with the configured slide count.
    pub async fn run(&self, topic: &str) -> FinalPresentation {
        self.run_with(topic, self.config.slide_count).await
    }

    /// Run and absorb every failure into the "pipeline failed" deck.
    pub async fn run_with(&self, topic: &str, slide_count: usize) -> FinalPresentation {
        let run_id = Uuid::new_v4().to_string();
        let pipeline = self.clone();
        let topic = topic.to_string();
        let task_run_id = run_id.clone();
        let handle = tokio::spawn(async move {
            pipeline.execute(&task_run_id, &topic, slide_count).await
        });

        match handle.await {
            Ok(Ok(presentation)) => presentation,
            Ok(Err(_)) => FinalPresentation::pipeline_failed(),
            Err(join_error) => {
                tracing::error!(run_id = %run_id, error = %join_error, "pipeline run aborted");
                self.events.emit(PipelineEvent::RunFailed {
                    run_id,
                    error: join_error.to_string(),
                });
                FinalPresentation::pipeline_failed()
            }
        }
    }

    /// Run and surface a fatal stage error to the caller.
    pub async fn try_run(
        &self,
        topic: &str,
        slide_count: usize,
    ) -> Result<FinalPresentation, StageError> {
        let run_id = Uuid::new_v4().to_string();
        self.execute(&run_id, topic, slide_count).await
    }

    async fn execute(
        &self,
        run_id: &str,
        topic: &str,
        slide_count: usize,
    ) -> Result<FinalPresentation, StageError> {
        let started = Instant::now();
        let slide_count = if slide_count == 0 {
            tracing::warn!(run_id, "slide count 0 requested; using 1");
            1
        } else {
            slide_count
        };

        tracing::info!(run_id, topic, slide_count, "pipeline run started");
        self.events.emit(PipelineEvent::RunStarted {
            run_id: run_id.to_string(),
            topic: topic.to_string(),
            slide_count,
        });

        let ctx = RunContext::new(
            run_id,
            self.generator.as_ref(),
            self.retriever.as_ref(),
            &self.config,
            &self.events,
        );

        // Outline: the only fatal stage.
        let stage_started = ctx.begin(StageKind::Outline);
        let outline = match outline::generate_outline(&ctx, topic, slide_count).await {
            Ok(outline) => outline,
            Err(e) => {
                tracing::error!(run_id, kind = e.kind_label(), error = %e, "outline stage failed; aborting run");
                ctx.emit(PipelineEvent::RunFailed {
                    run_id: run_id.to_string(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };
        ctx.complete(StageKind::Outline, stage_started, outline.slides.len());

        let stage_started = ctx.begin(StageKind::Expansion);
        let expanded = expansion::expand_slides(&ctx, &outline).await;
        ctx.complete(StageKind::Expansion, stage_started, expanded.len());

        let stage_started = ctx.begin(StageKind::Validation);
        let validated = validation::validate_slides(&ctx, &expanded).await;
        ctx.complete(StageKind::Validation, stage_started, validated.len());

        let stage_started = ctx.begin(StageKind::Formatting);
        let presentation = formatting::format_slides(&ctx, &expanded, &validated).await;
        ctx.complete(StageKind::Formatting, stage_started, presentation.slides.len());

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id,
            slides = presentation.slides.len(),
            summary = %presentation.summary,
            duration_ms,
            "pipeline run completed"
        );
        ctx.emit(PipelineEvent::RunCompleted {
            run_id: run_id.to_string(),
            slides: presentation.slides.len(),
            summary: presentation.summary.clone(),
            duration_ms,
        });
        Ok(presentation)
    }
}

/// One-shot run with default settings.
pub async fn run_pipeline(
    generator: Arc<dyn GenerationService>,
    retriever: Arc<dyn ContextRetriever>,
    topic: &str,
    slide_count: usize,
) -> FinalPresentation {
    PresentationPipeline::new(generator, retriever, PipelineConfig::default())
        .run_with(topic, slide_count)
        .await
}
