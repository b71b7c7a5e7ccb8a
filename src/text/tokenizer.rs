//! Splits a line into alternating word and delimiter spans.
//!
//! Delimiters are full-width CJK punctuation plus any whitespace. They end a
//! word but are never compared as words themselves.

/// Full-width punctuation that separates words.
pub const PUNCTUATION: &[char] = &[
    '，', '。', '！', '？', '、', '：', '；', '「', '」', '『', '』', '（', '）',
];

pub fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || PUNCTUATION.contains(&c)
}

/// A contiguous slice of the input that is either all delimiters or none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'a> {
    pub text: &'a str,
    pub is_delimiter: bool,
}

/// Every span of `line`, in order. Concatenating `text` of all spans yields
/// the input back.
pub fn spans(line: &str) -> Vec<Span<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut current: Option<bool> = None;

    for (idx, c) in line.char_indices() {
        let delim = is_delimiter(c);
        match current {
            Some(kind) if kind == delim => {}
            Some(kind) => {
                out.push(Span {
                    text: &line[start..idx],
                    is_delimiter: kind,
                });
                start = idx;
                current = Some(delim);
            }
            None => current = Some(delim),
        }
    }

    if let Some(kind) = current {
        out.push(Span {
            text: &line[start..],
            is_delimiter: kind,
        });
    }

    out
}

/// Only the non-empty word spans of `line`.
pub fn words(line: &str) -> Vec<&str> {
    spans(line)
        .into_iter()
        .filter(|span| !span.is_delimiter && !span.text.is_empty())
        .map(|span| span.text)
        .collect()
}
