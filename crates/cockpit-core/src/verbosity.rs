//! Deterministic length shaping of the model's reply.
//!
//! Only `Verbosity::Short` changes anything, and only when the reply carries no block
//! math or code. The shaped text is what gets persisted, so callers must shorten the core
//! reply before appending anything (onboarding nudges are never shortened).

use crate::models::Verbosity;
use once_cell::sync::Lazy;
use regex::Regex;

/// Appended after a hard word cut.
pub const ELLIPSIS: &str = "…";

const SENTENCES_KEPT: usize = 2;

/// Fenced code, display math, inline LaTeX delimiters.
const BLOCK_MARKERS: &[&str] = &["```", "~~~", "$$", "\\[", "\\]", "\\(", "\\begin{"];

static SENTENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^.!?]+(?:[.!?]+|$)").expect("sentence pattern is valid")
});

/// True when the text contains block code or math that must not be cut.
pub fn has_block_markers(text: &str) -> bool {
    BLOCK_MARKERS.iter().any(|m| text.contains(m))
}

/// Shape `text` for the given verbosity. `word_limit` is the hard cap for short replies.
pub fn shape(text: &str, verbosity: Verbosity, word_limit: usize) -> String {
    if verbosity != Verbosity::Short || has_block_markers(text) {
        return text.to_string();
    }

    let kept: Vec<&str> = SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .take(SENTENCES_KEPT)
        .collect();
    let short = kept.join(" ");

    let words: Vec<&str> = short.split_whitespace().collect();
    if words.len() > word_limit {
        format!("{}{}", words[..word_limit].join(" "), ELLIPSIS)
    } else {
        short
    }
}
