//! The dictionary consulted when a player claims a finished board.

use std::collections::HashSet;
use std::io::{self, BufRead};

/// A set of legal words.
///
/// Populated from any line- or space-delimited text; only tokens made up
/// entirely of lowercase ASCII letters are kept, so dictionary entries with
/// apostrophes, digits, or capitalized proper nouns never count as playable.
#[derive(Debug, Clone, Default)]
pub struct WordSet {
    words: HashSet<String>,
}

impl WordSet {
    pub fn from_reader(reader: impl BufRead) -> io::Result<Self> {
        let mut words = HashSet::new();
        for line in reader.lines() {
            for token in line?.split_whitespace() {
                if !token.is_empty() && token.bytes().all(|b| b.is_ascii_lowercase()) {
                    words.insert(token.to_owned());
                }
            }
        }
        Ok(Self { words })
    }

    /// Case-insensitive membership test.
    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(&word.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}
