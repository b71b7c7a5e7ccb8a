/// Substrings that show up when serialized markup or framework payloads leak
/// into text nodes (React/Next.js flight data, inline SVG props, etc.).
/// A text node containing any of these is not rendered prose.
pub const IGNORE_STRINGS: &[&str] = &[
    "__next_f",
    "$undefined",
    "children",
    "className",
    "target",
    "href",
    "rel",
    "stroke",
    "fill",
    "viewBox",
    "xmlns",
    "d=",
    "width=",
    "height=",
    "style=",
    "fillRule=",
    "openQrModal",
];

/// First and last code points of the CJK Unified Ideographs range we accept.
const CJK_START: char = '\u{4e00}';
const CJK_END: char = '\u{9fa5}';

pub fn is_cjk_ideograph(c: char) -> bool {
    (CJK_START..=CJK_END).contains(&c)
}

/// Whether a raw text fragment should be sent for conversion.
pub fn is_in_scope(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }

    if IGNORE_STRINGS.iter().any(|ignore| trimmed.contains(ignore)) {
        return false;
    }

    trimmed.chars().any(is_cjk_ideograph)
}
