//! Keyword trie backing intent-to-category matching.
//!
//! Each category owns one index, seeded from its display name at startup and
//! grown from exchange intent data as refill responses arrive. Tokens are
//! only ever added.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    terminal: bool,
}

/// Trie of normalized keyword tokens for one category.
#[derive(Debug, Default)]
pub struct KeywordIndex {
    root: TrieNode,
    len: usize,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index seeded from a free-text phrase, e.g. a display name.
    pub fn from_phrase(phrase: &str) -> Self {
        let mut index = Self::new();
        for token in tokenize(phrase) {
            index.insert(&token);
        }
        index
    }

    /// Insert one token. Returns false when it was already present.
    pub fn insert(&mut self, token: &str) -> bool {
        let token = token.to_lowercase();
        if token.is_empty() {
            return false;
        }
        let mut node = &mut self.root;
        for c in token.chars() {
            node = node.children.entry(c).or_default();
        }
        if node.terminal {
            false
        } else {
            node.terminal = true;
            self.len += 1;
            true
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        let mut node = &self.root;
        for c in token.to_lowercase().chars() {
            match node.children.get(&c) {
                Some(next) => node = next,
                None => return false,
            }
        }
        node.terminal
    }

    /// Count of distinct caller intent tokens present in this vocabulary.
    pub fn intersection_score(&self, intents: &[String]) -> usize {
        intents
            .iter()
            .map(|s| s.as_str())
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|token| self.contains(token))
            .count()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Split free text into lower-cased alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| word.to_lowercase())
        .collect()
}
