//! JSON-only prompts for the four stages.
//!
//! Each prompt is assembled from prioritized sections by [`PromptBuilder`]:
//! the JSON-only contract first, then the task, retrieved context, the input
//! record and finally the exact reply shape.

use deckforge_types::{ExpandedSlide, Passage, Slide, ValidatedSlide};
use serde_json::json;

/// Opening of every stage prompt.
pub const JSON_ONLY_CONTRACT: &str = "You are an API that outputs ONLY valid JSON.\n\
Do NOT add explanations, reasoning, <think> tags, or commentary.\n\
Do NOT output anything before or after the JSON.";

/// Builds a stage prompt from ordered sections.
#[derive(Debug, Default)]
pub struct PromptBuilder {
    sections: Vec<PromptSection>,
}

#[derive(Debug, Clone)]
struct PromptSection {
    heading: String,
    content: String,
    priority: u8, // 0 = highest
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The JSON-only contract (always first).
    pub fn with_contract(mut self) -> Self {
        self.push("", JSON_ONLY_CONTRACT, 0);
        self
    }

    pub fn with_task(mut self, task: &str) -> Self {
        self.push("Task", task, 1);
        self
    }

    /// Retrieved passages, numbered and attributed. Skipped when empty.
    pub fn with_passages(mut self, passages: &[Passage]) -> Self {
        if !passages.is_empty() {
            let content = passages
                .iter()
                .enumerate()
                .map(|(i, p)| format!("[{}] ({})\n{}", i + 1, p.source, p.content))
                .collect::<Vec<_>>()
                .join("\n\n");
            self.push("Context", &content, 2);
        }
        self
    }

    /// Input record, labelled.
    pub fn with_input(mut self, label: &str, value: &serde_json::Value) -> Self {
        let body = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        self.push(label, &body, 3);
        self
    }

    /// Exact JSON shape the reply must have.
    pub fn with_reply_format(mut self, example: &serde_json::Value) -> Self {
        let body = serde_json::to_string_pretty(example).unwrap_or_else(|_| example.to_string());
        self.push("JSON format to return", &body, 4);
        self
    }

    pub fn build(mut self) -> String {
        // Stable sort keeps insertion order within a priority.
        self.sections.sort_by_key(|s| s.priority);
        self.sections
            .iter()
            .map(|s| {
                if s.heading.is_empty() {
                    s.content.clone()
                } else {
                    format!("### {}\n{}", s.heading, s.content)
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn push(&mut self, heading: &str, content: &str, priority: u8) {
        self.sections.push(PromptSection {
            heading: heading.to_string(),
            content: content.to_string(),
            priority,
        });
    }
}

// ---------------------------------------------------------------------------
// Stage prompts
// ---------------------------------------------------------------------------

pub fn outline_prompt(topic: &str, slide_count: usize, passages: &[Passage]) -> String {
    let task = format!(
        "Act as an expert presentation content outliner.\n\
         Generate a concise, structured outline of {slide_count} slides about {topic}.\n\
         You MUST generate EXACTLY {slide_count} slides. Do NOT reduce or increase the number of slides.\n\
         If content is insufficient, distribute available information evenly.\n\
         Use the context below where it is relevant."
    );
    PromptBuilder::new()
        .with_contract()
        .with_task(&task)
        .with_passages(passages)
        .with_reply_format(&json!({
            "slides": [
                {"title": "Slide 1 Title", "bullet_points": ["point1", "point2"]}
            ]
        }))
        .build()
}

pub fn expansion_prompt(slide: &Slide) -> String {
    PromptBuilder::new()
        .with_contract()
        .with_task(
            "For the given slide, expand EACH bullet point into a concise yet informative statement.\n\
             Treat every bullet point as a mini-topic and add relevant details, context, or implications.\n\
             Limit each expanded statement to a maximum of 30 words.\n\
             Return one statement per bullet point, in the same order.",
        )
        .with_input(
            "Slide to expand",
            &json!({"title": slide.title, "bullet_points": slide.bullet_points}),
        )
        .with_reply_format(&json!({
            "title": slide.title,
            "detailed_points": [
                "Expanded statement for bullet 1",
                "Expanded statement for bullet 2"
            ]
        }))
        .build()
}

pub fn validation_prompt(slide: &ExpandedSlide, passages: &[Passage]) -> String {
    PromptBuilder::new()
        .with_contract()
        .with_task(
            "Validate EACH statement in the given slide using only the context provided.\n\
             Mark a statement \"accurate\" only when the context supports it.\n\
             If context is insufficient, mark it as \"needs_review\" and give a reason.\n\
             Return one entry per statement, in the same order.",
        )
        .with_passages(passages)
        .with_input(
            "Slide to validate",
            &json!({"title": slide.title, "detailed_points": slide.detailed_points}),
        )
        .with_reply_format(&json!({
            "title": slide.title,
            "validation": [
                {
                    "point": "Expanded statement",
                    "status": "accurate | needs_review",
                    "reason": "Why it needs review (if applicable)"
                }
            ]
        }))
        .build()
}

pub fn formatting_prompt(expanded: &[ExpandedSlide], validated: &[ValidatedSlide]) -> String {
    PromptBuilder::new()
        .with_contract()
        .with_task(
            "Combine the expanded content and validation results into final presentation-ready JSON.\n\
             Rules:\n\
             - Preserve slide titles and slide order. Return exactly one slide per input slide.\n\
             - For each expanded statement, copy its validation status: \"accurate\" or \"needs_review\".\n\
             - Include for each point: \"statement\" (final text), \"status\", and \"design_hint\" \
             (a minimal suggestion to make the slide visually appealing).",
        )
        .with_input("Expanded content", &json!({ "slides": expanded }))
        .with_input("Validation results", &json!({ "slides": validated }))
        .with_reply_format(&json!({
            "slides": [
                {
                    "title": "Slide title",
                    "content": [
                        {
                            "statement": "Final verified statement or needs-review statement",
                            "status": "accurate | needs_review",
                            "design_hint": "Suggested minimal visual styling"
                        }
                    ]
                }
            ]
        }))
        .build()
}
