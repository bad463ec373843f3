//! Bullet points → self-contained statements, one generation call per slide.

use serde::Deserialize;

use deckforge_types::{ExpandedSlide, Outline, Slide, StageError, StageKind};

use super::RunContext;
use crate::extraction::parse_reply;
use crate::prompts::expansion_prompt;

#[derive(Debug, Deserialize)]
struct ExpansionReply {
    #[serde(default)]
    title: Option<String>,
    detailed_points: Vec<String>,
}

/// Expand every outline slide. The output has one entry per outline slide,
/// in order, and each entry keeps its outline slide's title.
pub async fn expand_slides(ctx: &RunContext<'_>, outline: &Outline) -> Vec<ExpandedSlide> {
    let mut expanded = Vec::with_capacity(outline.slides.len());
    for (index, slide) in outline.slides.iter().enumerate() {
        let record = match expand_one(ctx, slide).await {
            Ok(points) => ExpandedSlide {
                title: slide.title.clone(),
                detailed_points: points,
            },
            Err(e) => {
                ctx.fallback(StageKind::Expansion, index, &slide.title, &e);
                ExpandedSlide::expansion_failed(&slide.title)
            }
        };
        expanded.push(record);
    }
    expanded
}

async fn expand_one(ctx: &RunContext<'_>, slide: &Slide) -> Result<Vec<String>, StageError> {
    let reply = ctx
        .generate(StageKind::Expansion, &expansion_prompt(slide))
        .await?;
    let parsed: ExpansionReply = parse_reply(&reply).map_err(|message| StageError::MalformedReply {
        stage: StageKind::Expansion,
        message,
    })?;

    if let Some(title) = parsed.title.as_deref() {
        if title.trim() != slide.title {
            tracing::debug!(run_id = ctx.run_id, expected = %slide.title, got = title, "model renamed slide; keeping outline title");
        }
    }

    let points: Vec<String> = parsed
        .detailed_points
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if points.is_empty() {
        return Err(StageError::MalformedReply {
            stage: StageKind::Expansion,
            message: "reply had no detailed points".into(),
        });
    }
    Ok(points)
}
