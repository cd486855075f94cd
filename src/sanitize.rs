//! Replacement of characters the TSDB refuses in metric names and tags

use tracing::warn;

/// Characters never allowed in a rendered metric name, tag name or tag value
pub const FORBIDDEN_CHARS: &[char] = &[' ', '\t', '"', '\\', ':', '!', '/', '(', ')', '\n', '\r'];

/// Used whenever the configured replacement is unusable
pub const DEFAULT_REPLACEMENT: char = '_';

pub fn is_forbidden(c: char) -> bool {
    FORBIDDEN_CHARS.contains(&c)
}

/// Validates a replacement string: exactly one character that is itself allowed
pub fn replacement_char(replacement: &str) -> Option<char> {
    let mut chars = replacement.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !is_forbidden(c) => Some(c),
        _ => None,
    }
}

/// Returns a copy of `text` with every forbidden character swapped for `replacement`
///
/// An invalid `replacement` behaves as if `_` had been given.
pub fn sanitize(text: &str, replacement: &str) -> String {
    let replacement = replacement_char(replacement).unwrap_or_else(|| {
        warn!(replacement, "replace character invalid, using {DEFAULT_REPLACEMENT}");
        DEFAULT_REPLACEMENT
    });
    sanitize_with(text, replacement)
}

/// Same as [sanitize] with an already validated replacement
pub(crate) fn sanitize_with(text: &str, replacement: char) -> String {
    text.chars()
        .map(|c| if is_forbidden(c) { replacement } else { c })
        .collect()
}
