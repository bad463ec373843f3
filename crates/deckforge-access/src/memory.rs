use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use deckforge_types::Result;

/// One request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryTurn {
    pub user: String,
    pub ai: String,
    #[serde(default = "Utc::now")]
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default)]
    history: Vec<MemoryTurn>,
}

/// Conversation memory persisted to a JSON file after every change.
#[derive(Debug)]
pub struct SessionMemory {
    path: PathBuf,
    turns: Mutex<Vec<MemoryTurn>>,
}

impl SessionMemory {
    /// Load the memory file. A missing file starts empty; so does a corrupt
    /// one, which is logged and overwritten on the next change.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let turns = if tokio::fs::try_exists(&path).await? {
            let raw = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<MemoryFile>(&raw) {
                Ok(file) => file.history,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt session memory");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            turns: Mutex::new(turns),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn add_turn(&self, user: impl Into<String>, ai: impl Into<String>) -> Result<()> {
        let mut turns = self.turns.lock().await;
        turns.push(MemoryTurn {
            user: user.into(),
            ai: ai.into(),
            ts: Utc::now(),
        });
        self.persist(&turns).await
    }

    pub async fn turns(&self) -> Vec<MemoryTurn> {
        self.turns.lock().await.clone()
    }

    /// The most recent `n` turns, oldest first.
    pub async fn recent(&self, n: usize) -> Vec<MemoryTurn> {
        let turns = self.turns.lock().await;
        let start = turns.len().saturating_sub(n);
        turns[start..].to_vec()
    }

    pub async fn clear(&self) -> Result<()> {
        let mut turns = self.turns.lock().await;
        turns.clear();
        self.persist(&turns).await
    }

    async fn persist(&self, turns: &[MemoryTurn]) -> Result<()> {
        #[derive(Serialize)]
        struct MemoryFileRef<'a> {
            history: &'a [MemoryTurn],
        }

        let json = serde_json::to_string_pretty(&MemoryFileRef { history: turns })?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn add_turn_persists_immediately() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory").join("session_memory.json");

        let memory = SessionMemory::open(&path).await.unwrap();
        memory.add_turn("AI in healthcare", "15 slides").await.unwrap();
        memory.add_turn("Cloud costs", "12 slides").await.unwrap();

        let reopened = SessionMemory::open(&path).await.unwrap();
        let turns = reopened.turns().await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].user, "AI in healthcare");
        assert_eq!(turns[1].ai, "12 slides");
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session_memory.json");
        std::fs::write(&path, "{ history: oops").unwrap();

        let memory = SessionMemory::open(&path).await.unwrap();
        assert!(memory.turns().await.is_empty());
    }

    #[tokio::test]
    async fn accepts_legacy_entries_without_timestamp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session_memory.json");
        std::fs::write(&path, r#"{"history": [{"user": "q", "ai": "a"}]}"#).unwrap();

        let memory = SessionMemory::open(&path).await.unwrap();
        assert_eq!(memory.turns().await.len(), 1);
    }

    #[tokio::test]
    async fn clear_and_recent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session_memory.json");
        let memory = SessionMemory::open(&path).await.unwrap();
        for i in 0..5 {
            memory.add_turn(format!("q{i}"), format!("a{i}")).await.unwrap();
        }

        let recent = memory.recent(3).await;
        let users: Vec<_> = recent.iter().map(|t| t.user.as_str()).collect();
        assert_eq!(users, vec!["q2", "q3", "q4"]);

        memory.clear().await.unwrap();
        assert!(memory.turns().await.is_empty());
        let reopened = SessionMemory::open(&path).await.unwrap();
        assert!(reopened.turns().await.is_empty());
    }
}
