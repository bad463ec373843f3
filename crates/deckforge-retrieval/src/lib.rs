//! Context retrieval for deckforge.
//!
//! Documents are loaded from disk, split into overlapping chunks, and ranked
//! against a query by term overlap. Stages only see the [`ContextRetriever`]
//! trait.

mod index;
mod loader;
mod splitter;

use std::path::PathBuf;

use async_trait::async_trait;
use deckforge_types::{Passage, Result};

pub use index::{LexicalIndex, DEFAULT_TOP_K};
pub use loader::{load_documents, Document, LoadedDocuments};
pub use splitter::{excerpt, TextSplitter, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

/// Outcome of adding documents to a retriever.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks: usize,
    pub skipped: Vec<PathBuf>,
}

/// Ranked passage lookup over an indexed document collection.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Load, split and add the given files.
    async fn index(&self, paths: &[PathBuf]) -> Result<IndexReport>;

    /// Passages most relevant to `text`, best first.
    async fn query(&self, text: &str) -> Result<Vec<Passage>>;
}
