//! Recursive character splitting.
//!
//! Text is split on the coarsest separator that occurs in it (paragraphs, then
//! lines, then words, then characters). Pieces are merged back into chunks of at
//! most `chunk_size` characters, each chunk repeating up to `chunk_overlap`
//! characters from the end of the previous one.

pub const DEFAULT_CHUNK_SIZE: usize = 800;
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

impl TextSplitter {
    /// `chunk_overlap` is clamped below `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = "";
        let mut remaining: &[&str] = &[];
        for (i, sep) in separators.iter().copied().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let pieces: Vec<String> = if separator.is_empty() {
            text.chars().map(String::from).collect()
        } else {
            text.split(separator)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        };

        let mut chunks = Vec::new();
        let mut small = Vec::new();
        for piece in pieces {
            if char_len(&piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge(&small, separator));
                small.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_with(&piece, remaining));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge(&small, separator));
        }
        chunks
    }

    fn merge(&self, pieces: &[String], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let sep = |n: usize| if n == 0 { 0 } else { sep_len };
        let mut chunks = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);

            if !window.is_empty() && total + len + sep(window.len()) > self.chunk_size {
                push_chunk(&mut chunks, &window, separator);
                while !window.is_empty()
                    && (total > self.chunk_overlap
                        || total + len + sep(window.len()) > self.chunk_size)
                {
                    let dropped = char_len(window[0]) + sep(window.len() - 1);
                    total = total.saturating_sub(dropped);
                    window.remove(0);
                }
            }

            total += len + sep(window.len());
            window.push(piece.as_str());
        }
        push_chunk(&mut chunks, &window, separator);
        chunks
    }
}

fn push_chunk(chunks: &mut Vec<String>, window: &[&str], separator: &str) {
    let chunk = window.join(separator);
    let chunk = chunk.trim();
    if !chunk.is_empty() {
        chunks.push(chunk.to_string());
    }
}

/// First `max_chars` characters of `text`, cut on a char boundary.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].trim_end().to_string(),
        None => text.to_string(),
    }
}
