use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{load_documents, ContextRetriever, IndexReport, TextSplitter};
use deckforge_types::{DeckError, Passage, Result};

pub const DEFAULT_TOP_K: usize = 5;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "that", "the", "this", "to", "was", "with",
];

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Chunk {
    content: String,
    source: String,
    #[serde(skip)]
    terms: HashSet<String>,
}

impl Chunk {
    fn new(content: String, source: String) -> Self {
        let terms = terms(&content);
        Self {
            content,
            source,
            terms,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    chunks: Vec<Chunk>,
}

// ---------------------------------------------------------------------------
// LexicalIndex
// ---------------------------------------------------------------------------

/// In-memory chunk store ranked by query-term overlap, optionally persisted
/// to a JSON file.
#[derive(Debug)]
pub struct LexicalIndex {
    chunks: RwLock<Vec<Chunk>>,
    splitter: TextSplitter,
    top_k: usize,
    persist_path: Option<PathBuf>,
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            splitter: TextSplitter::default(),
            top_k: DEFAULT_TOP_K,
            persist_path: None,
        }
    }

    /// Open the index stored at `path`, or start an empty one that will be
    /// written there on the next `index` call.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut index = Self::new();
        if tokio::fs::try_exists(&path).await? {
            let raw = tokio::fs::read_to_string(&path).await?;
            let snapshot: Snapshot = serde_json::from_str(&raw).map_err(|e| {
                DeckError::RetrievalError(format!("corrupt index {}: {e}", path.display()))
            })?;
            let chunks: Vec<Chunk> = snapshot
                .chunks
                .into_iter()
                .map(|c| Chunk::new(c.content, c.source))
                .collect();
            tracing::debug!(path = %path.display(), chunks = chunks.len(), "opened index");
            index.chunks = RwLock::new(chunks);
        }
        index.persist_path = Some(path);
        Ok(index)
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_splitter(mut self, splitter: TextSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split and add one document's text.
    pub fn add_text(&self, content: &str, source: &str) -> Result<usize> {
        let pieces = self.splitter.split(content);
        let added = pieces.len();
        let mut chunks = self.chunks.write().map_err(poisoned)?;
        chunks.extend(
            pieces
                .into_iter()
                .map(|piece| Chunk::new(piece, source.to_string())),
        );
        Ok(added)
    }

    /// Highest-scoring chunks for `text`. Chunks sharing no term with the query
    /// are never returned; equal scores keep insertion order.
    pub fn search(&self, text: &str, k: usize) -> Result<Vec<Passage>> {
        let query = terms(text);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.chunks.read().map_err(poisoned)?;
        let mut scored: Vec<(usize, usize)> = chunks
            .iter()
            .enumerate()
            .filter_map(|(i, chunk)| {
                let score = query.iter().filter(|t| chunk.terms.contains(*t)).count();
                (score > 0).then_some((score, i))
            })
            .collect();
        // sort_by is stable, so ties stay in insertion order
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, i)| Passage {
                content: chunks[i].content.clone(),
                source: chunks[i].source.clone(),
            })
            .collect())
    }

    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let json = {
            let chunks = self.chunks.read().map_err(poisoned)?;
            serde_json::to_string(&SnapshotRef { chunks: &chunks })?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    chunks: &'a [Chunk],
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> DeckError {
    DeckError::RetrievalError("index lock poisoned".into())
}

#[async_trait]
impl ContextRetriever for LexicalIndex {
    async fn index(&self, paths: &[PathBuf]) -> Result<IndexReport> {
        let loaded = load_documents(paths).await?;
        let mut report = IndexReport {
            documents: loaded.documents.len(),
            skipped: loaded.skipped,
            ..Default::default()
        };
        for doc in &loaded.documents {
            report.chunks += self.add_text(&doc.content, &doc.source)?;
        }
        self.save().await?;
        tracing::info!(
            documents = report.documents,
            chunks = report.chunks,
            skipped = report.skipped.len(),
            "indexed documents"
        );
        Ok(report)
    }

    async fn query(&self, text: &str) -> Result<Vec<Passage>> {
        self.search(text, self.top_k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_index() -> LexicalIndex {
        let index = LexicalIndex::new();
        index
            .add_text("Machine learning improves radiology diagnosis.", "radiology.md")
            .unwrap();
        index
            .add_text("Hospitals adopt telemedicine for rural patients.", "tele.md")
            .unwrap();
        index
            .add_text("Diagnosis accuracy depends on training data.", "data.md")
            .unwrap();
        index
    }

    #[test]
    fn ranks_by_term_overlap() {
        let index = sample_index();
        let hits = index.search("radiology diagnosis with machine learning", 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source, "radiology.md");
        assert_eq!(hits[1].source, "data.md");
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = LexicalIndex::new();
        index.add_text("alpha beta", "first").unwrap();
        index.add_text("alpha gamma", "second").unwrap();
        let hits = index.search("alpha", 5).unwrap();
        let sources: Vec<_> = hits.iter().map(|p| p.source.as_str()).collect();
        assert_eq!(sources, vec!["first", "second"]);
    }

    #[test]
    fn respects_k_and_ignores_stopwords() {
        let index = sample_index();
        assert_eq!(index.search("diagnosis", 1).unwrap().len(), 1);
        assert!(index.search("the and of", 5).unwrap().is_empty());
        assert!(index.search("", 5).unwrap().is_empty());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let index = sample_index();
        let hits = index.search("TELEMEDICINE", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "tele.md");
    }

    #[tokio::test]
    async fn empty_index_returns_nothing() {
        let index = LexicalIndex::new();
        assert!(index.is_empty());
        assert!(index.query("anything").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn index_files_and_persist_round_trip() {
        let dir = TempDir::new().unwrap();
        let doc = dir.path().join("ai.txt");
        std::fs::write(&doc, "AI assists clinicians in early cancer detection.").unwrap();
        let skipped = dir.path().join("deck.docx");
        std::fs::write(&skipped, "binary").unwrap();
        let store = dir.path().join("store").join("index.json");

        let index = LexicalIndex::open(&store).await.unwrap();
        let report = index.index(&[doc.clone(), skipped.clone()]).await.unwrap();
        assert_eq!(report.documents, 1);
        assert_eq!(report.chunks, 1);
        assert_eq!(report.skipped, vec![skipped]);
        assert!(store.exists());

        let reopened = LexicalIndex::open(&store).await.unwrap();
        assert_eq!(reopened.len(), 1);
        let hits = reopened.query("cancer detection").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, doc.display().to_string());
    }

    #[tokio::test]
    async fn corrupt_index_file_is_retrieval_error() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("index.json");
        std::fs::write(&store, "{not json").unwrap();
        let err = LexicalIndex::open(&store).await.unwrap_err();
        assert!(matches!(err, DeckError::RetrievalError(_)));
    }

    #[tokio::test]
    async fn query_uses_top_k() {
        let index = LexicalIndex::new().with_top_k(1);
        index.add_text("shared term one", "a").unwrap();
        index.add_text("shared term two", "b").unwrap();
        assert_eq!(index.query("shared").await.unwrap().len(), 1);
    }
}
