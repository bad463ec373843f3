//! Merge expansion and validation into the final deck, in batches.

use serde::Deserialize;

use deckforge_types::{
    ExpandedSlide, FinalPresentation, FinalSlide, FinalStatement, ReviewStatus, StageError,
    StageKind, ValidatedSlide,
};

use super::RunContext;
use crate::extraction::parse_reply;
use crate::prompts::formatting_prompt;

pub const DEFAULT_DESIGN_HINT: &str = "Keep the layout clean and minimal";

#[derive(Debug, Deserialize)]
struct FormattingReply {
    slides: Vec<RawFinalSlide>,
}

#[derive(Debug, Deserialize)]
struct RawFinalSlide {
    #[serde(default)]
    content: Vec<RawStatement>,
}

#[derive(Debug, Deserialize)]
struct RawStatement {
    #[serde(default)]
    statement: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    design_hint: String,
}

/// Format the deck `batch_size` slides at a time and derive the summary from
/// the resulting statuses.
pub async fn format_slides(
    ctx: &RunContext<'_>,
    expanded: &[ExpandedSlide],
    validated: &[ValidatedSlide],
) -> FinalPresentation {
    if expanded.len() != validated.len() {
        tracing::warn!(
            run_id = ctx.run_id,
            expanded = expanded.len(),
            validated = validated.len(),
            "expansion and validation lengths differ; formatting the common prefix"
        );
    }
    let len = expanded.len().min(validated.len());
    let batch_size = ctx.config.batch_size.max(1);

    let mut slides = Vec::with_capacity(len);
    let mut start = 0;
    while start < len {
        let end = (start + batch_size).min(len);
        let batch_expanded = &expanded[start..end];
        let batch_validated = &validated[start..end];
        tracing::debug!(run_id = ctx.run_id, batch = start / batch_size, start, end, "formatting batch");

        match format_batch(ctx, batch_expanded, batch_validated).await {
            Ok(formatted) => {
                for (offset, raw) in formatted.into_iter().enumerate() {
                    slides.push(finish_slide(
                        ctx,
                        start + offset,
                        &batch_expanded[offset].title,
                        &batch_validated[offset],
                        raw,
                    ));
                }
            }
            Err(e) => {
                let request_failed = matches!(e, StageError::Generation { .. });
                for (offset, slide) in batch_expanded.iter().enumerate() {
                    ctx.fallback(StageKind::Formatting, start + offset, &slide.title, &e);
                    slides.push(if request_failed {
                        FinalSlide::optimization_failed(&slide.title)
                    } else {
                        FinalSlide::formatting_failed(&slide.title)
                    });
                }
            }
        }
        start = end;
    }

    FinalPresentation::from_slides(slides)
}

async fn format_batch(
    ctx: &RunContext<'_>,
    expanded: &[ExpandedSlide],
    validated: &[ValidatedSlide],
) -> Result<Vec<RawFinalSlide>, StageError> {
    let reply = ctx
        .generate(StageKind::Formatting, &formatting_prompt(expanded, validated))
        .await?;
    let parsed: FormattingReply = parse_reply(&reply).map_err(|message| StageError::MalformedReply {
        stage: StageKind::Formatting,
        message,
    })?;
    if parsed.slides.len() != expanded.len() {
        return Err(StageError::MalformedReply {
            stage: StageKind::Formatting,
            message: format!(
                "expected {} slides, reply had {}",
                expanded.len(),
                parsed.slides.len()
            ),
        });
    }
    Ok(parsed.slides)
}

/// Title comes from position; blank statements are dropped and blank hints
/// get a default.
///
/// A statement ends up `accurate` only when the model says so and the
/// validation entry at the same position agrees. Statements past the end of
/// the validation list always need review.
fn finish_slide(
    ctx: &RunContext<'_>,
    index: usize,
    title: &str,
    validated: &ValidatedSlide,
    raw: RawFinalSlide,
) -> FinalSlide {
    let content: Vec<FinalStatement> = raw
        .content
        .into_iter()
        .enumerate()
        .filter(|(_, s)| !s.statement.trim().is_empty())
        .map(|(position, s)| {
            let hint = s.design_hint.trim();
            FinalStatement {
                statement: s.statement.trim().to_string(),
                status: capped_status(&s.status, validated, position),
                design_hint: if hint.is_empty() {
                    DEFAULT_DESIGN_HINT.to_string()
                } else {
                    hint.to_string()
                },
            }
        })
        .collect();

    if content.is_empty() {
        let e = StageError::MalformedReply {
            stage: StageKind::Formatting,
            message: "slide had no statements".into(),
        };
        ctx.fallback(StageKind::Formatting, index, title, &e);
        return FinalSlide::formatting_failed(title);
    }

    FinalSlide {
        title: title.to_string(),
        content,
    }
}

fn capped_status(claimed: &str, validated: &ValidatedSlide, position: usize) -> ReviewStatus {
    let claimed = ReviewStatus::parse_lenient(claimed).unwrap_or(ReviewStatus::NeedsReview);
    let checked = validated
        .validation
        .get(position)
        .map(|entry| entry.status)
        .unwrap_or(ReviewStatus::NeedsReview);
    if claimed == ReviewStatus::Accurate && checked == ReviewStatus::Accurate {
        ReviewStatus::Accurate
    } else {
        ReviewStatus::NeedsReview
    }
}
