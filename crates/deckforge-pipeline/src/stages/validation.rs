//! Fact validation of expanded statements against retrieved context.

use serde::Deserialize;

use deckforge_retrieval::excerpt;
use deckforge_types::{
    ExpandedSlide, Passage, ReviewStatus, StageError, StageKind, ValidatedSlide, ValidationEntry,
    EXPANSION_FAILED,
};

use super::RunContext;
use crate::extraction::parse_reply;
use crate::prompts::validation_prompt;

pub const INSUFFICIENT_CONTEXT_REASON: &str = "Insufficient context to verify this statement.";
pub const MISSING_REASON: &str = "Flagged for review without a reason.";
pub const NOT_COVERED_REASON: &str = "Statement was not covered by the validation reply.";
pub const EXPANSION_FAILED_REASON: &str = "Expansion failed for this slide; nothing to validate.";

#[derive(Debug, Deserialize)]
struct ValidationReply {
    validation: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Validate every expanded slide. One entry per input slide, in order; each
/// slide's entries line up with its `detailed_points`.
pub async fn validate_slides(ctx: &RunContext<'_>, slides: &[ExpandedSlide]) -> Vec<ValidatedSlide> {
    let mut validated = Vec::with_capacity(slides.len());
    for (index, slide) in slides.iter().enumerate() {
        if slide.is_expansion_failed() {
            tracing::debug!(run_id = ctx.run_id, slide = index, "skipping validation of failed expansion");
            validated.push(ValidatedSlide {
                title: slide.title.clone(),
                validation: vec![ValidationEntry::needs_review(
                    EXPANSION_FAILED,
                    EXPANSION_FAILED_REASON,
                )],
            });
            continue;
        }

        let passages = gather_context(ctx, slide).await;
        tracing::debug!(run_id = ctx.run_id, slide = index, passages = passages.len(), "validation context retrieved");

        let record = match validate_one(ctx, slide, &passages).await {
            Ok(validation) => ValidatedSlide {
                title: slide.title.clone(),
                validation,
            },
            Err(e) => {
                ctx.fallback(StageKind::Validation, index, &slide.title, &e);
                ValidatedSlide::validation_failed(&slide.title)
            }
        };
        validated.push(record);
    }
    validated
}

/// Query by title, then by the first statement; keep the first distinct
/// passages up to the configured limit, shortened to excerpts.
async fn gather_context(ctx: &RunContext<'_>, slide: &ExpandedSlide) -> Vec<Passage> {
    let limit = ctx.config.validation_passages;
    let queries = std::iter::once(slide.title.as_str())
        .chain(slide.detailed_points.first().map(String::as_str))
        .take(ctx.config.validation_queries);

    let mut kept: Vec<Passage> = Vec::new();
    for query in queries {
        if kept.len() >= limit {
            break;
        }
        // Full ranking: duplicates must not use up the limit.
        for passage in ctx.retrieve(StageKind::Validation, query, usize::MAX).await {
            if kept.len() >= limit {
                break;
            }
            if kept.iter().all(|p| p.content != passage.content) {
                kept.push(passage);
            }
        }
    }

    kept.into_iter()
        .map(|p| Passage {
            content: excerpt(&p.content, ctx.config.passage_excerpt_chars),
            source: p.source,
        })
        .collect()
}

async fn validate_one(
    ctx: &RunContext<'_>,
    slide: &ExpandedSlide,
    passages: &[Passage],
) -> Result<Vec<ValidationEntry>, StageError> {
    let reply = ctx
        .generate(StageKind::Validation, &validation_prompt(slide, passages))
        .await?;
    let parsed: ValidationReply = parse_reply(&reply).map_err(|message| StageError::MalformedReply {
        stage: StageKind::Validation,
        message,
    })?;

    if parsed.validation.len() != slide.detailed_points.len() {
        tracing::warn!(
            run_id = ctx.run_id,
            title = %slide.title,
            statements = slide.detailed_points.len(),
            entries = parsed.validation.len(),
            "validation entry count differs from statement count"
        );
    }
    Ok(align_entries(
        &slide.detailed_points,
        parsed.validation,
        !passages.is_empty(),
    ))
}

/// One entry per statement, in statement order. Missing entries become
/// `needs_review`; surplus entries are dropped. Without context nothing may
/// be `accurate`.
fn align_entries(points: &[String], raw: Vec<RawEntry>, has_context: bool) -> Vec<ValidationEntry> {
    let mut raw = raw.into_iter();
    points
        .iter()
        .map(|point| {
            let Some(entry) = raw.next() else {
                return ValidationEntry::needs_review(point, NOT_COVERED_REASON);
            };
            let reason = entry.reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
            match ReviewStatus::parse_lenient(&entry.status) {
                Some(ReviewStatus::Accurate) if has_context => ValidationEntry {
                    point: point.clone(),
                    status: ReviewStatus::Accurate,
                    reason,
                },
                Some(ReviewStatus::Accurate) => {
                    ValidationEntry::needs_review(point, INSUFFICIENT_CONTEXT_REASON)
                }
                Some(ReviewStatus::NeedsReview) => ValidationEntry::needs_review(
                    point,
                    reason.unwrap_or_else(|| MISSING_REASON.to_string()),
                ),
                None => ValidationEntry::needs_review(
                    point,
                    format!("Unrecognized status {:?}.", entry.status),
                ),
            }
        })
        .collect()
}
