//! Tail-preserving truncation
//!
//! The end of a program's output is usually what explains a failure, so when
//! text does not fit we keep the suffix and mark the cut.

use std::borrow::Cow;
use unitwatch_core::limits::OUTPUT_TRUNCATED_MARKER;

/// Cut `text` down to at most `max_size` bytes, keeping its tail.
///
/// When a cut happens the result starts with [`OUTPUT_TRUNCATED_MARKER`].
/// If `max_size` cannot even hold the marker, the head of `text` is returned
/// instead. Cut points never split a UTF-8 sequence, so the result may be a
/// few bytes shorter than `max_size`.
pub fn truncate_tail(text: &str, max_size: usize) -> Cow<'_, str> {
    if text.len() <= max_size {
        return Cow::Borrowed(text);
    }

    let marker = OUTPUT_TRUNCATED_MARKER;
    if max_size <= marker.len() {
        return Cow::Borrowed(&text[..floor_char_boundary(text, max_size)]);
    }

    let available = max_size - marker.len();
    let start = ceil_char_boundary(text, text.len() - available);

    let mut out = String::with_capacity(marker.len() + text.len() - start);
    out.push_str(marker);
    out.push_str(&text[start..]);
    Cow::Owned(out)
}

/// Largest index `<= index` that sits on a char boundary
pub(crate) fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest index `>= index` that sits on a char boundary
pub(crate) fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
