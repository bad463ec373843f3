//! Shared errors and data model for the deckforge pipeline.
//!
//! This crate provides the foundational types used across all other deckforge crates:
//! - `DeckError`: unified error taxonomy
//! - `StageError`: the error a single pipeline stage reports
//! - the slide records each stage produces, from `Outline` to `FinalPresentation`

pub mod slides;

pub use slides::{
    ExpandedSlide, FinalPresentation, FinalSlide, FinalStatement, Outline, Passage,
    ReviewStatus, Slide, StatusCounts, ValidatedSlide, ValidationEntry, EXPANSION_FAILED,
    ORCHESTRATION_FAILED_STATEMENT, ORCHESTRATION_FAILED_TITLE, PIPELINE_FAILED_SUMMARY,
    VALIDATION_FAILED, VALIDATION_FAILED_REASON,
};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unified error type for all deckforge subsystems.
#[derive(Debug, thiserror::Error)]
pub enum DeckError {
    // === Generation Provider Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    #[error("Context length exceeded for {provider}: {message}")]
    ContextLengthExceeded { provider: String, message: String },

    // === Retrieval Errors ===
    #[error("Retrieval failed: {0}")]
    RetrievalError(String),

    #[error("Unsupported document type: {path}")]
    UnsupportedDocument { path: String },

    // === Access Errors ===
    #[error("Not authenticated: {reason}")]
    Unauthenticated { reason: String },

    #[error("Insufficient permissions for role {role}: {action} not allowed")]
    AccessDenied { role: String, action: String },

    #[error("Content not allowed: {reason}")]
    ContentBlocked { reason: String },

    // === Configuration ===
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl DeckError {
    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeckError::RateLimited { .. }
                | DeckError::RequestTimeout { .. }
                | DeckError::ProviderError {
                    retryable: true,
                    ..
                }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeckError::AuthError { .. }
                | DeckError::Unauthenticated { .. }
                | DeckError::AccessDenied { .. }
                | DeckError::ContentBlocked { .. }
                | DeckError::ConfigError(_)
                | DeckError::ContextLengthExceeded { .. }
        )
    }

    /// Maps the error to a process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeckError::Unauthenticated { .. }
            | DeckError::AccessDenied { .. }
            | DeckError::ContentBlocked { .. } => 3,
            DeckError::ConfigError(_) | DeckError::AuthError { .. } => 2,
            _ => 1,
        }
    }
}

/// A convenience alias for `Result<T, DeckError>`.
pub type Result<T> = std::result::Result<T, DeckError>;

// ---------------------------------------------------------------------------
// StageKind / StageError
// ---------------------------------------------------------------------------

/// The four pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Outline,
    Expansion,
    Validation,
    Formatting,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Outline => "outline",
            StageKind::Expansion => "expansion",
            StageKind::Validation => "validation",
            StageKind::Formatting => "formatting",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by one unit of stage work (the whole outline, one slide, or one batch).
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{stage} stage: generation request failed: {source}")]
    Generation {
        stage: StageKind,
        #[source]
        source: DeckError,
    },

    #[error("Failed to parse JSON from outline reply: {0}")]
    MalformedOutline(String),

    #[error("{stage} stage: reply was not valid JSON: {message}")]
    MalformedReply { stage: StageKind, message: String },
}

impl StageError {
    /// Stage the error was raised in.
    pub fn stage(&self) -> StageKind {
        match self {
            StageError::Generation { stage, .. } | StageError::MalformedReply { stage, .. } => {
                *stage
            }
            StageError::MalformedOutline(_) => StageKind::Outline,
        }
    }

    /// `true` for network/timeout/rate-limit failures of the generation service.
    pub fn is_transient(&self) -> bool {
        matches!(self, StageError::Generation { source, .. } if source.is_retryable())
    }

    /// Short label used as a structured logging field.
    pub fn kind_label(&self) -> &'static str {
        match self {
            StageError::Generation { source, .. } if source.is_retryable() => "transient",
            StageError::Generation { .. } => "service",
            StageError::MalformedOutline(_) | StageError::MalformedReply { .. } => "malformed",
        }
    }
}
