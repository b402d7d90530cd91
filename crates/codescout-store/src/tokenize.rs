//! Lexical tokenizer shared by indexing and querying.

use regex::Regex;

/// Splits on runs of anything outside `[0-9A-Za-z_]` by default, so
/// `snake_case` identifiers stay whole while `foo.bar(baz)` breaks apart.
pub const DEFAULT_TOKEN_SPLIT: &str = r"[^0-9A-Za-z_]+";

#[derive(Debug, Clone)]
pub struct Tokenizer {
    split: Regex,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self {
            split: Regex::new(DEFAULT_TOKEN_SPLIT).expect("default split pattern is valid"),
        }
    }
}

impl Tokenizer {
    pub fn new(split_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            split: Regex::new(split_pattern)?,
        })
    }

    /// Lowercased tokens in document order.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.split
            .split(text)
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }
}
