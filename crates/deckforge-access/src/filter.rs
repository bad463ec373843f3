use regex::Regex;

use deckforge_types::{DeckError, Result};

pub const DEFAULT_BANNED_KEYWORDS: [&str; 4] = ["classified", "secret", "ssn", "pan"];

/// Rejects request text containing banned keywords (whole words, any case).
#[derive(Debug, Clone)]
pub struct ContentFilter {
    pattern: Option<Regex>,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::with_keywords(DEFAULT_BANNED_KEYWORDS)
    }
}

impl ContentFilter {
    pub fn with_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .map(|k| regex::escape(&k))
            .collect();
        let pattern = if alternatives.is_empty() {
            None
        } else {
            Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|"))).ok()
        };
        Self { pattern }
    }

    /// First banned keyword found in `text`, lower-cased.
    pub fn find_banned(&self, text: &str) -> Option<String> {
        self.pattern
            .as_ref()
            .and_then(|re| re.find(text))
            .map(|m| m.as_str().to_lowercase())
    }

    pub fn check(&self, text: &str) -> Result<()> {
        match self.find_banned(text) {
            Some(keyword) => {
                tracing::warn!(keyword = %keyword, "request blocked by content filter");
                Err(DeckError::ContentBlocked {
                    reason: "banned_keyword_detected".into(),
                })
            }
            None => Ok(()),
        }
    }
}
