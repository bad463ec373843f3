//! Pipeline settings.
//!
//! Defaults live in [`PipelineConfig::default`]. A TOML file may override any
//! of them:
//!
//! ```toml
//! model = "llama-3.3-70b-versatile"   # applies to every stage
//! slide_count = 12
//! batch_size = 4
//!
//! [stages.validation]
//! max_tokens = 1500
//! ```
//!
//! Stage tables only override the fields they name; the rest keep that
//! stage's own defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use deckforge_llm::GenerationConfig;
use deckforge_types::{DeckError, Result, StageKind};

pub const DEFAULT_SLIDE_COUNT: usize = 15;
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Resolved settings for one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineConfig {
    pub slide_count: usize,
    pub batch_size: usize,
    /// Passages retrieved for the outline prompt.
    pub outline_passages: usize,
    /// Passages kept per slide for validation.
    pub validation_passages: usize,
    /// Retrieval queries issued per slide for validation.
    pub validation_queries: usize,
    pub passage_excerpt_chars: usize,
    pub outline: GenerationConfig,
    pub expansion: GenerationConfig,
    pub validation: GenerationConfig,
    pub formatting: GenerationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            slide_count: DEFAULT_SLIDE_COUNT,
            batch_size: DEFAULT_BATCH_SIZE,
            outline_passages: 5,
            validation_passages: 2,
            validation_queries: 2,
            passage_excerpt_chars: 600,
            outline: GenerationConfig::outline(),
            expansion: GenerationConfig::expansion(),
            validation: GenerationConfig::validation(),
            formatting: GenerationConfig::formatting(),
        }
    }
}

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    model: Option<String>,
    provider: Option<String>,
    slide_count: Option<usize>,
    batch_size: Option<usize>,
    outline_passages: Option<usize>,
    validation_passages: Option<usize>,
    validation_queries: Option<usize>,
    passage_excerpt_chars: Option<usize>,
    stages: StageTables,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StageTables {
    outline: StageOverride,
    expansion: StageOverride,
    validation: StageOverride,
    formatting: StageOverride,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StageOverride {
    model: Option<String>,
    provider: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl StageOverride {
    fn apply(&self, file: &ConfigFile, config: &mut GenerationConfig) {
        if let Some(model) = self.model.as_ref().or(file.model.as_ref()) {
            config.model = model.clone();
        }
        if let Some(provider) = self.provider.as_ref().or(file.provider.as_ref()) {
            config.provider = Some(provider.clone());
        }
        if let Some(t) = self.temperature {
            config.temperature = t;
        }
        if let Some(m) = self.max_tokens {
            config.max_tokens = m;
        }
    }
}

impl PipelineConfig {
    /// Parse TOML overrides on top of the defaults, then validate.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(raw)
            .map_err(|e| DeckError::ConfigError(format!("invalid pipeline config: {e}")))?;

        let mut config = Self::default();
        if let Some(v) = file.slide_count {
            config.slide_count = v;
        }
        if let Some(v) = file.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = file.outline_passages {
            config.outline_passages = v;
        }
        if let Some(v) = file.validation_passages {
            config.validation_passages = v;
        }
        if let Some(v) = file.validation_queries {
            config.validation_queries = v;
        }
        if let Some(v) = file.passage_excerpt_chars {
            config.passage_excerpt_chars = v;
        }
        file.stages.outline.apply(&file, &mut config.outline);
        file.stages.expansion.apply(&file, &mut config.expansion);
        file.stages.validation.apply(&file, &mut config.validation);
        file.stages.formatting.apply(&file, &mut config.formatting);

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DeckError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn with_slide_count(mut self, slide_count: usize) -> Self {
        self.slide_count = slide_count;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Use `model` for every stage.
    pub fn with_model(mut self, model: &str) -> Self {
        for stage in [
            &mut self.outline,
            &mut self.expansion,
            &mut self.validation,
            &mut self.formatting,
        ] {
            stage.model = model.to_string();
        }
        self
    }

    pub fn generation(&self, stage: StageKind) -> &GenerationConfig {
        match stage {
            StageKind::Outline => &self.outline,
            StageKind::Expansion => &self.expansion,
            StageKind::Validation => &self.validation,
            StageKind::Formatting => &self.formatting,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.slide_count == 0 {
            return Err(DeckError::ConfigError("slide_count must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(DeckError::ConfigError("batch_size must be at least 1".into()));
        }
        if self.passage_excerpt_chars == 0 {
            return Err(DeckError::ConfigError(
                "passage_excerpt_chars must be at least 1".into(),
            ));
        }
        for stage in [
            StageKind::Outline,
            StageKind::Expansion,
            StageKind::Validation,
            StageKind::Formatting,
        ] {
            self.generation(stage)
                .validate()
                .map_err(|e| DeckError::ConfigError(format!("[stages.{stage}] {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stage_settings() {
        let config = PipelineConfig::default();
        assert_eq!(config.slide_count, 15);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.outline.temperature, 0.3);
        assert_eq!(config.expansion.temperature, 0.3);
        assert_eq!(config.validation.temperature, 0.0);
        assert_eq!(config.formatting.max_tokens, 2500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn stage_table_overrides_only_named_fields() {
        let config = PipelineConfig::from_toml_str(
            r#"
            slide_count = 8
            model = "llama-3.3-70b-versatile"

            [stages.validation]
            max_tokens = 1500
            "#,
        )
        .unwrap();
        assert_eq!(config.slide_count, 8);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.validation.max_tokens, 1500);
        assert_eq!(config.validation.temperature, 0.0);
        assert_eq!(config.validation.model, "llama-3.3-70b-versatile");
        assert_eq!(config.outline.model, "llama-3.3-70b-versatile");
        assert_eq!(config.outline.max_tokens, 2048);
    }

    #[test]
    fn stage_model_beats_global_model() {
        let config = PipelineConfig::from_toml_str(
            r#"
            model = "gpt-4o-mini"
            provider = "openai"
            [stages.formatting]
            model = "gpt-4o"
            "#,
        )
        .unwrap();
        assert_eq!(config.formatting.model, "gpt-4o");
        assert_eq!(config.expansion.model, "gpt-4o-mini");
        assert_eq!(config.expansion.provider.as_deref(), Some("openai"));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = PipelineConfig::from_toml_str("batch_size = 0").unwrap_err();
        assert!(matches!(err, DeckError::ConfigError(_)));

        let err = PipelineConfig::from_toml_str("[stages.outline]\ntemperature = 3.5").unwrap_err();
        assert!(err.to_string().contains("stages.outline"));

        assert!(PipelineConfig::from_toml_str("slides = 3").is_err());
        assert!(PipelineConfig::from_toml_str("slide_count = \"many\"").is_err());
    }

    #[test]
    fn builder_overrides_validate() {
        let config = PipelineConfig::default().with_slide_count(0);
        assert!(config.validate().is_err());
        let config = PipelineConfig::default().with_batch_size(1).with_model("gpt-4o");
        assert!(config.validate().is_ok());
        assert_eq!(config.generation(StageKind::Formatting).model, "gpt-4o");
    }

    #[test]
    fn reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("deckforge.toml");
        std::fs::write(&path, "slide_count = 3\n").unwrap();
        assert_eq!(PipelineConfig::from_toml_file(&path).unwrap().slide_count, 3);

        let err = PipelineConfig::from_toml_file(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, DeckError::ConfigError(_)));
    }
}
