//! Pulls the JSON payload out of a model reply.
//!
//! Models are told to answer with bare JSON but routinely wrap it in code
//! fences, prepend `<think>` blocks, or add a sentence of chatter. Extraction
//! tries, in order: a ```` ```json ```` fence, any other fence, then each
//! balanced `{...}` or `[...]` span from left to right. [`parse_reply`] takes
//! the first candidate that deserializes.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

/// Upper bound on balanced spans tried per reply.
const MAX_SPAN_CANDIDATES: usize = 16;

static THINK_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?(?:</think>|\z)").ok());

/// Drop `<think>...</think>` blocks, including an unterminated trailing one.
pub fn strip_think(text: &str) -> String {
    match THINK_BLOCK.as_ref() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

/// Locate the JSON payload in `reply`.
pub fn extract_json(reply: &str) -> Option<String> {
    candidates(reply).into_iter().next()
}

/// Extract and deserialize the JSON payload of `reply`.
///
/// Chatter such as "Here are [3] slides:" can put a stray bracket ahead of
/// the payload, so every candidate is tried before giving up. The error
/// string is suitable for a log line and for `StageError` messages.
pub fn parse_reply<T: DeserializeOwned>(reply: &str) -> Result<T, String> {
    let mut first_error = None;
    for json in candidates(reply) {
        match serde_json::from_str(&json) {
            Ok(value) => return Ok(value),
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }
    Err(first_error.unwrap_or_else(|| {
        format!(
            "no JSON object found in reply ({} chars)",
            reply.chars().count()
        )
    }))
}

/// Possible payloads in preference order: the fenced block, then balanced spans.
fn candidates(reply: &str) -> Vec<String> {
    let cleaned = strip_think(reply);
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut found: Vec<String> = Vec::new();
    if let Some(block) = extract_from_code_block(trimmed) {
        let block = block.trim();
        if !block.is_empty() {
            found.push(block.to_string());
        }
    }
    for span in balanced_spans(trimmed) {
        if !found.iter().any(|f| f == span) {
            found.push(span.to_string());
        }
    }
    found
}

fn extract_from_code_block(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let body = &text[start + "```json".len()..];
        return Some(match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        });
    }

    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip the language tag line, if any.
    let body = match after_fence.find('\n') {
        Some(nl) => &after_fence[nl + 1..],
        None => after_fence,
    };
    Some(match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    })
}

fn balanced_spans(text: &str) -> impl Iterator<Item = &str> {
    text.match_indices(['{', '['])
        .filter_map(|(start, _)| balanced_at(text, start))
        .take(MAX_SPAN_CANDIDATES)
}

/// The balanced span opening at byte `start`, which must hold `{` or `[`.
fn balanced_at(text: &str, start: usize) -> Option<&str> {
    let (open, close) = if text[start..].starts_with('{') {
        ('{', '}')
    } else {
        ('[', ']')
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
