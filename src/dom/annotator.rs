use markup5ever_rcdom::Handle;
use serde::Serialize;

use crate::text::{diff_line, DiffEntry};

use super::page::{create_text, element_with_children, text_content, text_value, NodeRef, Page};
use super::scanner::TEXT_SEPARATOR;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Class of the inline element wrapping one changed word.
pub const HIGHLIGHT_CLASS: &str = "tw-highlight";
/// Class of the element that replaces an annotated text node.
pub const WRAPPER_CLASS: &str = "tw-annotated";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationReport {
    /// Nodes replaced with annotated markup.
    pub annotated: usize,
    /// Changed lines dropped because their owner or counterpart was missing.
    pub skipped: usize,
    /// Whether both batches had the same number of lines.
    pub aligned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Plain(String),
    Marked { original: String, replacement: String },
}

/// Annotate every owned node whose line changed between the two batches.
pub fn apply(page: &Page, original: &str, converted: &str, owners: &[NodeRef]) -> AnnotationReport {
    let original_lines: Vec<&str> = original.split(TEXT_SEPARATOR).collect();
    let converted_lines: Vec<&str> = converted.split(TEXT_SEPARATOR).collect();

    let mut report = AnnotationReport {
        aligned: original_lines.len() == converted_lines.len(),
        ..AnnotationReport::default()
    };
    if !report.aligned {
        log_warn!(
            "separator count mismatch: {} original lines, {} converted lines",
            original_lines.len(),
            converted_lines.len()
        );
    }

    for (idx, original_line) in original_lines.iter().enumerate() {
        let Some(converted_line) = converted_lines.get(idx) else {
            report.skipped += 1;
            continue;
        };
        if original_line == converted_line {
            continue;
        }
        let Some(node) = owners.get(idx).and_then(NodeRef::attached) else {
            report.skipped += 1;
            continue;
        };
        let Some(current) = text_value(&node) else {
            report.skipped += 1;
            continue;
        };

        let entries = diff_line(original_line, converted_line);
        if entries.is_empty() {
            continue;
        }
        log_debug!("line {idx}: {} changed words", entries.len());

        if page.replace_node(&node, build_fragment(&current, &entries)) {
            report.annotated += 1;
        }
    }

    report
}

/// Wrapper element for `text` with each changed word marked.
pub fn build_fragment(text: &str, entries: &[DiffEntry]) -> Handle {
    let children = mark_pieces(text, entries)
        .into_iter()
        .map(|piece| match piece {
            Piece::Plain(text) => create_text(&text),
            Piece::Marked { original, replacement } => create_marker(&original, &replacement),
        })
        .collect();
    element_with_children("span", &[("class", WRAPPER_CLASS)], children)
}

/// Every literal occurrence of each entry's original word becomes a marked
/// piece. Already-marked pieces are never searched again.
fn mark_pieces(text: &str, entries: &[DiffEntry]) -> Vec<Piece> {
    let mut pieces = vec![Piece::Plain(text.to_string())];

    for entry in entries {
        if entry.original.is_empty() {
            continue;
        }
        pieces = pieces
            .into_iter()
            .flat_map(|piece| match piece {
                Piece::Plain(plain) => split_marked(&plain, entry),
                marked => vec![marked],
            })
            .collect();
    }

    pieces.retain(|piece| !matches!(piece, Piece::Plain(text) if text.is_empty()));
    pieces
}

fn split_marked(plain: &str, entry: &DiffEntry) -> Vec<Piece> {
    let mut out = Vec::new();
    let mut rest = plain;
    while let Some(pos) = rest.find(entry.original.as_str()) {
        out.push(Piece::Plain(rest[..pos].to_string()));
        out.push(Piece::Marked {
            original: entry.original.clone(),
            replacement: entry.replacement.clone(),
        });
        rest = &rest[pos + entry.original.len()..];
    }
    out.push(Piece::Plain(rest.to_string()));
    out
}

/// Undo every annotation: wrappers collapse back into one text node and
/// stray markers into their text.
pub fn remove_highlights(page: &Page) -> usize {
    let mut restored = 0;
    for wrapper in page.elements_with_class(WRAPPER_CLASS) {
        if page.replace_node(&wrapper, create_text(&text_content(&wrapper))) {
            restored += 1;
        }
    }
    for marker in page.elements_with_class(HIGHLIGHT_CLASS) {
        if page.replace_node(&marker, create_text(&text_content(&marker))) {
            restored += 1;
        }
    }
    restored
}

/// Detached marker element showing `original` with `replacement` on hover.
pub fn create_marker(original: &str, replacement: &str) -> Handle {
    element_with_children(
        "span",
        &[("class", HIGHLIGHT_CLASS), ("title", replacement)],
        vec![create_text(original)],
    )
}
