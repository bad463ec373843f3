//! Topic → outline. Grounded on retrieved passages; any failure is fatal.

use serde::Deserialize;

use deckforge_types::{Outline, Slide, StageError, StageKind};

use super::RunContext;
use crate::extraction::parse_reply;
use crate::prompts::outline_prompt;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OutlineReply {
    Wrapped { slides: Vec<RawSlide> },
    Bare(Vec<RawSlide>),
}

#[derive(Debug, Deserialize)]
struct RawSlide {
    #[serde(default)]
    title: String,
    #[serde(default)]
    bullet_points: Vec<String>,
}

pub async fn generate_outline(
    ctx: &RunContext<'_>,
    topic: &str,
    slide_count: usize,
) -> Result<Outline, StageError> {
    let passages = ctx
        .retrieve(StageKind::Outline, topic, ctx.config.outline_passages)
        .await;
    tracing::debug!(run_id = ctx.run_id, passages = passages.len(), "outline context retrieved");

    let prompt = outline_prompt(topic, slide_count, &passages);
    let reply = ctx.generate(StageKind::Outline, &prompt).await?;

    let raw = match parse_reply::<OutlineReply>(&reply).map_err(StageError::MalformedOutline)? {
        OutlineReply::Wrapped { slides } | OutlineReply::Bare(slides) => slides,
    };
    if raw.is_empty() {
        return Err(StageError::MalformedOutline(
            "outline contained no slides".into(),
        ));
    }

    let received = raw.len();
    let mut slides: Vec<Slide> = raw
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            let title = s.title.trim();
            Slide {
                title: if title.is_empty() {
                    format!("Slide {}", i + 1)
                } else {
                    title.to_string()
                },
                bullet_points: s
                    .bullet_points
                    .into_iter()
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty())
                    .collect(),
            }
        })
        .collect();

    if received > slide_count {
        tracing::warn!(run_id = ctx.run_id, requested = slide_count, received, "outline has surplus slides; truncating");
        slides.truncate(slide_count);
    } else if received < slide_count {
        tracing::warn!(run_id = ctx.run_id, requested = slide_count, received, "outline is short; continuing with fewer slides");
    }

    Ok(Outline { slides })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::events::EventEmitter;
    use crate::stages::testing::{ok, transient, FixedRetriever, ScriptedGenerator};

    async fn run(reply: deckforge_types::Result<String>, count: usize) -> Result<Outline, StageError> {
        let generator = ScriptedGenerator::new([reply]);
        let retriever = FixedRetriever::with(&[("AI triage cuts wait times.", "notes.md")]);
        let config = PipelineConfig::default();
        let events = EventEmitter::default();
        let ctx = RunContext::new("t", &generator, &retriever, &config, &events);
        generate_outline(&ctx, "AI in healthcare", count).await
    }

    #[tokio::test]
    async fn parses_outline_and_embeds_context() {
        let generator = ScriptedGenerator::new([ok(
            r#"{"slides": [{"title": "Intro", "bullet_points": ["why", "how"]}, {"title": "Risks", "bullet_points": ["bias"]}]}"#,
        )]);
        let retriever = FixedRetriever::with(&[("AI triage cuts wait times.", "notes.md")]);
        let config = PipelineConfig::default();
        let events = EventEmitter::default();
        let ctx = RunContext::new("t", &generator, &retriever, &config, &events);

        let outline = generate_outline(&ctx, "AI in healthcare", 2).await.unwrap();
        assert_eq!(outline.slides.len(), 2);
        assert_eq!(outline.slides[1].title, "Risks");
        assert_eq!(outline.slides[0].bullet_points, vec!["why", "how"]);

        assert_eq!(*retriever.queries.lock().unwrap(), vec!["AI in healthcare"]);
        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].0.contains("AI triage cuts wait times."));
        assert_eq!(prompts[0].1.temperature, 0.3);
    }

    #[tokio::test]
    async fn surplus_slides_are_truncated() {
        let outline = run(
            ok(r#"```json
{"slides": [{"title": "A", "bullet_points": []}, {"title": "B", "bullet_points": []}, {"title": "C", "bullet_points": []}]}
```"#),
            2,
        )
        .await
        .unwrap();
        let titles: Vec<_> = outline.slides.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn short_outline_is_accepted() {
        let outline = run(ok(r#"{"slides": [{"title": "Only", "bullet_points": ["x"]}]}"#), 15)
            .await
            .unwrap();
        assert_eq!(outline.slides.len(), 1);
    }

    #[tokio::test]
    async fn bare_array_and_missing_titles() {
        let outline = run(ok(r#"[{"bullet_points": ["x"]}, {"title": "  Two  "}]"#), 2)
            .await
            .unwrap();
        assert_eq!(outline.slides[0].title, "Slide 1");
        assert_eq!(outline.slides[1].title, "Two");
        assert!(outline.slides[1].bullet_points.is_empty());
    }

    #[tokio::test]
    async fn empty_or_malformed_outline_is_fatal() {
        let err = run(ok(r#"{"slides": []}"#), 3).await.unwrap_err();
        assert!(matches!(err, StageError::MalformedOutline(_)));

        let err = run(ok("I could not produce an outline."), 3).await.unwrap_err();
        assert!(matches!(err, StageError::MalformedOutline(_)));
        assert_eq!(err.stage(), StageKind::Outline);
    }

    #[tokio::test]
    async fn request_failure_is_generation_error() {
        let err = run(transient(), 3).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::Generation {
                stage: StageKind::Outline,
                ..
            }
        ));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn retrieval_failure_means_no_context() {
        let generator =
            ScriptedGenerator::new([ok(r#"{"slides": [{"title": "A", "bullet_points": []}]}"#)]);
        let retriever = FixedRetriever {
            fail: true,
            ..Default::default()
        };
        let config = PipelineConfig::default();
        let events = EventEmitter::default();
        let ctx = RunContext::new("t", &generator, &retriever, &config, &events);

        let outline = generate_outline(&ctx, "AI", 1).await.unwrap();
        assert_eq!(outline.slides.len(), 1);
        assert!(!generator.prompts()[0].contains("### Context"));
    }
}
