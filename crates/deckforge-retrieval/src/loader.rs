use std::path::{Path, PathBuf};

use deckforge_types::{DeckError, Result};

/// A loaded source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub content: String,
    pub source: String,
}

#[derive(Debug, Default)]
pub struct LoadedDocuments {
    pub documents: Vec<Document>,
    pub skipped: Vec<PathBuf>,
}

fn is_supported(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("txt") | Some("md")
    )
}

/// Read plain-text and Markdown files. Anything else is skipped with a warning.
///
/// A supported file that cannot be read is an error.
pub async fn load_documents(paths: &[PathBuf]) -> Result<LoadedDocuments> {
    let mut loaded = LoadedDocuments::default();

    for path in paths {
        if !is_supported(path) {
            let err = DeckError::UnsupportedDocument {
                path: path.display().to_string(),
            };
            tracing::warn!(error = %err, "skipping document");
            loaded.skipped.push(path.clone());
            continue;
        }

        let content = tokio::fs::read_to_string(path).await?;
        tracing::debug!(path = %path.display(), chars = content.len(), "loaded document");
        loaded.documents.push(Document {
            content,
            source: path.display().to_string(),
        });
    }

    Ok(loaded)
}
