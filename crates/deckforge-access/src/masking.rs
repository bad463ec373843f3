//! Sensitive-data masking for exported decks and audit previews.

use std::sync::LazyLock;

use regex::Regex;

use deckforge_types::{FinalPresentation, FinalSlide, FinalStatement};

macro_rules! mask_pattern {
    ($name:ident, $regex_str:expr) => {
        static $name: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new($regex_str).ok());
    };
}

mask_pattern!(
    RE_EMAIL,
    r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b"
);
mask_pattern!(
    RE_CARD,
    r"\b\d{4}[\s\-]?\d{4}[\s\-]?\d{4}[\s\-]?\d{4}\b"
);
mask_pattern!(RE_SSN, r"\b\d{3}-\d{2}-\d{4}\b");
mask_pattern!(RE_PHONE, r"\b\d{3}[\-.]?\d{3}[\-.]?\d{4}\b");
mask_pattern!(RE_PASSWORD, r#"(?i)("password"\s*:\s*")[^"]*(")"#);
mask_pattern!(RE_TOKEN, r#"(?i)("token"\s*:\s*")[^"]*(")"#);

// Cards and SSNs go before phones so their digit groups are not eaten first.
static RULES: [(&LazyLock<Option<Regex>>, &str); 6] = [
    (&RE_EMAIL, "***@***.***"),
    (&RE_CARD, "****-****-****-****"),
    (&RE_SSN, "***-**-****"),
    (&RE_PHONE, "***-***-****"),
    (&RE_PASSWORD, "${1}****${2}"),
    (&RE_TOKEN, "${1}****${2}"),
];

/// Replace emails, card numbers, SSNs, phone numbers and `"password"` /
/// `"token"` JSON values with fixed placeholders.
pub fn mask_sensitive(text: &str) -> String {
    let mut masked = text.to_string();
    for (pattern, replacement) in RULES.iter() {
        match pattern.as_ref() {
            Some(re) => {
                masked = re.replace_all(&masked, *replacement).into_owned();
            }
            None => tracing::warn!("masking pattern failed to compile; skipping"),
        }
    }
    masked
}

/// Mask every statement, title and design hint of a deck. The summary only
/// holds counts and is left untouched.
pub fn mask_presentation(presentation: &FinalPresentation) -> FinalPresentation {
    FinalPresentation {
        slides: presentation
            .slides
            .iter()
            .map(|slide| FinalSlide {
                title: mask_sensitive(&slide.title),
                content: slide
                    .content
                    .iter()
                    .map(|s| FinalStatement {
                        statement: mask_sensitive(&s.statement),
                        status: s.status,
                        design_hint: mask_sensitive(&s.design_hint),
                    })
                    .collect(),
            })
            .collect(),
        summary: presentation.summary.clone(),
    }
}

/// Masked, length-limited preview for audit records.
pub fn preview(text: &str, max_chars: usize) -> String {
    mask_sensitive(text).chars().take(max_chars).collect()
}
