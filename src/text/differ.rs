use serde::Serialize;

use super::tokenizer::words;

/// One word that the conversion changed, at its word position in the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub position: usize,
    pub original: String,
    pub replacement: String,
}

impl DiffEntry {
    pub fn new(position: usize, original: &str, replacement: &str) -> Self {
        Self {
            position,
            original: original.to_string(),
            replacement: replacement.to_string(),
        }
    }
}

/// Positional word diff between a line and its converted counterpart.
///
/// Words are compared index by index up to the shorter word list; there is
/// no alignment step, so an inserted or dropped word shifts every comparison
/// after it. Extra trailing words on either side are ignored.
pub fn diff_line(original: &str, converted: &str) -> Vec<DiffEntry> {
    let original_words = words(original);
    let converted_words = words(converted);

    original_words
        .iter()
        .zip(converted_words.iter())
        .enumerate()
        .filter(|(_, (lhs, rhs))| !lhs.is_empty() && lhs != rhs)
        .map(|(position, (lhs, rhs))| DiffEntry::new(position, lhs, rhs))
        .collect()
}
