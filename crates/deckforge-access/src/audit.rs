use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::masking::preview;
use crate::Identity;
use deckforge_types::Result;

pub const DETAIL_PREVIEW_CHARS: usize = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    BlockedContent,
    Failed,
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub action: String,
    pub subject: String,
    pub role: String,
    pub outcome: AuditOutcome,
    pub duration_ms: u64,
    pub detail: String,
}

impl AuditEntry {
    /// `detail` is masked and cut to [`DETAIL_PREVIEW_CHARS`].
    pub fn new(
        identity: &Identity,
        action: impl Into<String>,
        outcome: AuditOutcome,
        duration_ms: u64,
        detail: &str,
    ) -> Self {
        Self {
            ts: Utc::now(),
            action: action.into(),
            subject: identity.subject.clone(),
            role: identity.role.to_string(),
            outcome,
            duration_ms,
            detail: preview(detail, DETAIL_PREVIEW_CHARS),
        }
    }
}

/// Append-only JSON-lines audit file.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read every entry back, skipping lines that do not parse.
    pub async fn entries(&self) -> Result<Vec<AuditEntry>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let raw = tokio::fs::read_to_string(&self.path).await?;
        Ok(raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}
