//! Deck renderers. Each turns a finished presentation into a text document.

use std::fmt::Write as _;
use std::str::FromStr;

use deckforge_types::{DeckError, FinalPresentation, ReviewStatus, Result};

pub trait DeckSink: Send + Sync {
    /// Conventional file extension, without the dot.
    fn extension(&self) -> &'static str;

    fn render(&self, presentation: &FinalPresentation) -> Result<String>;
}

/// Pretty-printed JSON in the pipeline's own field names.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSink;

impl DeckSink for JsonSink {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn render(&self, presentation: &FinalPresentation) -> Result<String> {
        Ok(serde_json::to_string_pretty(presentation)?)
    }
}

/// Markdown outline: one `##` section per slide.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownSink;

impl DeckSink for MarkdownSink {
    fn extension(&self) -> &'static str {
        "md"
    }

    fn render(&self, presentation: &FinalPresentation) -> Result<String> {
        let mut out = String::new();
        for (i, slide) in presentation.slides.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "## {}\n", slide.title);
            for statement in &slide.content {
                let flag = match statement.status {
                    ReviewStatus::Accurate => "",
                    ReviewStatus::NeedsReview => " **[needs review]**",
                };
                let _ = writeln!(out, "- {}{}", statement.statement, flag);
                if !statement.design_hint.is_empty() {
                    let _ = writeln!(out, "  *Design: {}*", statement.design_hint);
                }
            }
        }
        let _ = write!(out, "\n---\n\n_{}_\n", presentation.summary);
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeckFormat {
    #[default]
    Json,
    Markdown,
}

impl DeckFormat {
    pub fn sink(&self) -> Box<dyn DeckSink> {
        match self {
            DeckFormat::Json => Box::new(JsonSink),
            DeckFormat::Markdown => Box::new(MarkdownSink),
        }
    }
}

impl FromStr for DeckFormat {
    type Err = DeckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(DeckFormat::Json),
            "markdown" | "md" => Ok(DeckFormat::Markdown),
            other => Err(DeckError::ConfigError(format!(
                "unknown output format '{other}' (expected json or markdown)"
            ))),
        }
    }
}
