//! Text normalization for keyword scoring
//!
//! Tokens are maximal runs of Unicode letters or digits, lowercased.
//! Tokens shorter than two characters and stop words are dropped.
//! Tokenization is deterministic and pure.

use std::collections::{HashMap, HashSet};

/// Minimum token length kept after normalization
const MIN_TOKEN_LEN: usize = 2;

/// English stop words dropped during tokenization
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could", "did", "do",
    "does", "for", "from", "had", "has", "have", "he", "her", "his", "how", "if", "in", "into",
    "is", "it", "its", "may", "more", "no", "not", "of", "on", "or", "our", "she", "so", "some",
    "than", "that", "the", "their", "them", "then", "there", "these", "they", "this", "to", "was",
    "we", "were", "what", "when", "which", "will", "with", "would", "you", "your",
];

/// Tokenizer with a configurable stop-word set
#[derive(Debug, Clone)]
pub struct Tokenizer {
    stop_words: HashSet<String>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    /// Tokenizer with the default English stop-word set
    pub fn new() -> Self {
        Self::with_stop_words(DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()))
    }

    /// Tokenizer with a caller-supplied stop-word set
    pub fn with_stop_words(words: impl IntoIterator<Item = String>) -> Self {
        Self {
            stop_words: words.into_iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    /// Split text into normalized tokens
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| token.chars().count() >= MIN_TOKEN_LEN)
            .filter(|token| !self.stop_words.contains(*token))
            .map(|token| token.to_string())
            .collect()
    }

    /// Token counts for a text
    pub fn frequencies(&self, text: &str) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for token in self.tokenize(text) {
            *counts.entry(token).or_insert(0) += 1;
        }
        counts
    }
}
