//! Records produced by each pipeline stage.
//!
//! Every record is built once per run and never mutated afterwards. Lists are
//! joined across stages by position: the Nth expanded slide belongs to the Nth
//! outline slide, and so on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel detailed point used when a slide could not be expanded.
pub const EXPANSION_FAILED: &str = "Expansion failed, please retry.";
/// Sentinel point used when a slide could not be validated.
pub const VALIDATION_FAILED: &str = "Validation failed";
pub const VALIDATION_FAILED_REASON: &str = "Could not parse model response.";
/// Title and summary of the single-slide result returned when a run aborts.
pub const ORCHESTRATION_FAILED_TITLE: &str = "Orchestration failed";
pub const ORCHESTRATION_FAILED_STATEMENT: &str = "Manual intervention required";
pub const PIPELINE_FAILED_SUMMARY: &str = "pipeline execution failed";

// ---------------------------------------------------------------------------
// ReviewStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Accurate,
    NeedsReview,
}

impl ReviewStatus {
    /// Parse the loose spellings models tend to produce ("Accurate",
    /// "needs review", "needs-review").
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match normalized.as_str() {
            "accurate" => Some(ReviewStatus::Accurate),
            "needs_review" => Some(ReviewStatus::NeedsReview),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Accurate => "accurate",
            ReviewStatus::NeedsReview => "needs_review",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Outline stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    pub title: String,
    pub bullet_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    pub slides: Vec<Slide>,
}

// ---------------------------------------------------------------------------
// Expansion stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandedSlide {
    pub title: String,
    pub detailed_points: Vec<String>,
}

impl ExpandedSlide {
    /// Fallback record for a slide whose expansion failed.
    pub fn expansion_failed(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            detailed_points: vec![EXPANSION_FAILED.to_string()],
        }
    }

    /// True for the record [`ExpandedSlide::expansion_failed`] builds.
    pub fn is_expansion_failed(&self) -> bool {
        matches!(self.detailed_points.as_slice(), [only] if only == EXPANSION_FAILED)
    }
}

// ---------------------------------------------------------------------------
// Validation stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationEntry {
    pub point: String,
    pub status: ReviewStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationEntry {
    pub fn accurate(point: impl Into<String>) -> Self {
        Self {
            point: point.into(),
            status: ReviewStatus::Accurate,
            reason: None,
        }
    }

    pub fn needs_review(point: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            point: point.into(),
            status: ReviewStatus::NeedsReview,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedSlide {
    pub title: String,
    pub validation: Vec<ValidationEntry>,
}

impl ValidatedSlide {
    /// Fallback record for a slide whose validation reply could not be used.
    pub fn validation_failed(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            validation: vec![ValidationEntry::needs_review(
                VALIDATION_FAILED,
                VALIDATION_FAILED_REASON,
            )],
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalStatement {
    pub statement: String,
    pub status: ReviewStatus,
    pub design_hint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalSlide {
    pub title: String,
    pub content: Vec<FinalStatement>,
}

impl FinalSlide {
    /// A slide holding a single `needs_review` statement.
    pub fn needs_review(
        title: impl Into<String>,
        statement: impl Into<String>,
        design_hint: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: vec![FinalStatement {
                statement: statement.into(),
                status: ReviewStatus::NeedsReview,
                design_hint: design_hint.into(),
            }],
        }
    }

    /// Fallback when the formatting reply for this slide's batch was unparseable.
    pub fn formatting_failed(title: impl Into<String>) -> Self {
        Self::needs_review(
            title,
            "Formatting failed for this slide",
            "Manual design needed",
        )
    }

    /// Fallback when the formatting request for this slide's batch failed outright.
    pub fn optimization_failed(title: impl Into<String>) -> Self {
        Self::needs_review(title, "Optimization failed", "Manual formatting required")
    }
}

/// Accurate vs. needs-review statement counts across a presentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub accurate: usize,
    pub needs_review: usize,
}

impl StatusCounts {
    pub fn tally<'a>(slides: impl IntoIterator<Item = &'a FinalSlide>) -> Self {
        let mut counts = Self::default();
        for statement in slides.into_iter().flat_map(|s| s.content.iter()) {
            match statement.status {
                ReviewStatus::Accurate => counts.accurate += 1,
                ReviewStatus::NeedsReview => counts.needs_review += 1,
            }
        }
        counts
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} statements accurate, {} statements need manual review",
            self.accurate, self.needs_review
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalPresentation {
    pub slides: Vec<FinalSlide>,
    pub summary: String,
}

impl FinalPresentation {
    /// Build a presentation whose summary is derived from the slides' statuses.
    pub fn from_slides(slides: Vec<FinalSlide>) -> Self {
        let summary = StatusCounts::tally(&slides).to_string();
        Self { slides, summary }
    }

    /// The single-slide result returned when a run cannot complete.
    pub fn pipeline_failed() -> Self {
        Self {
            slides: vec![FinalSlide::needs_review(
                ORCHESTRATION_FAILED_TITLE,
                ORCHESTRATION_FAILED_STATEMENT,
                "Manual intervention required",
            )],
            summary: PIPELINE_FAILED_SUMMARY.to_string(),
        }
    }

    pub fn status_counts(&self) -> StatusCounts {
        StatusCounts::tally(&self.slides)
    }

    pub fn is_pipeline_failure(&self) -> bool {
        self.summary == PIPELINE_FAILED_SUMMARY
    }
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

/// A retrieved text passage and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub content: String,
    pub source: String,
}
