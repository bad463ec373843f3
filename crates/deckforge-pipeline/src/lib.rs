//! Topic-to-slide-deck pipeline.
//!
//! Four stages run strictly in order, each one a JSON-only generation call
//! whose reply is parsed into the next stage's input:
//!
//! 1. outline: topic and retrieved passages → titled slides with bullets
//! 2. expansion: bullets → statements, per slide
//! 3. validation: statements checked against retrieved passages, per slide
//! 4. formatting: merged final slides with design hints, per batch
//!
//! Per-slide and per-batch failures are replaced by fallback records; only
//! the outline stage can fail a run, and [`PresentationPipeline::run`] turns
//! that into a single "pipeline failed" slide.

pub mod config;
pub mod events;
pub mod extraction;
pub mod orchestrator;
pub mod prompts;
pub mod render;
pub mod stages;

pub use config::{PipelineConfig, DEFAULT_BATCH_SIZE, DEFAULT_SLIDE_COUNT};
pub use events::{EventEmitter, PipelineEvent};
pub use extraction::{extract_json, parse_reply, strip_think};
pub use orchestrator::{run_pipeline, PresentationPipeline};
pub use prompts::PromptBuilder;
pub use render::{DeckFormat, DeckSink, JsonSink, MarkdownSink};
pub use stages::RunContext;
