//! Split outbound text into radio-sized fragments.

use crate::logutil::floor_char_boundary;

/// Prefix on every fragment after the first.
pub const CONTINUATION_MARKER: &str = "...";

/// Split `text` into fragments of at most `max_len` UTF-8 bytes.
///
/// Text that already fits is returned unchanged. Otherwise each fragment is
/// cut at the last break character in the back half of its budget (falling
/// back to a hard cut on a char boundary), and later fragments carry
/// [`CONTINUATION_MARKER`], which counts against their budget.
///
/// A `max_len` too small to hold the marker plus one character disables the
/// marker; a single character wider than `max_len` is emitted on its own.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }
    let use_marker = max_len > CONTINUATION_MARKER.len();
    let mut chunks: Vec<String> = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let prefix = if chunks.is_empty() || !use_marker {
            ""
        } else {
            CONTINUATION_MARKER
        };
        let budget = max_len - prefix.len();
        if remaining.len() <= budget {
            push_fragment(&mut chunks, prefix, remaining.trim_end());
            break;
        }

        let mut hard = floor_char_boundary(remaining, budget);
        if hard == 0 {
            // first char alone is wider than the budget
            hard = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }
        let cut = find_break(remaining, hard).unwrap_or(hard);
        let (head, tail) = remaining.split_at(cut);
        push_fragment(&mut chunks, prefix, head.trim_end());
        remaining = tail.trim_start();
    }
    chunks
}

fn push_fragment(chunks: &mut Vec<String>, prefix: &str, piece: &str) {
    if piece.trim().is_empty() {
        return;
    }
    let mut fragment = String::with_capacity(prefix.len() + piece.len());
    fragment.push_str(prefix);
    fragment.push_str(piece);
    chunks.push(fragment);
}

/// Byte offset to cut `s` at, searching back from `end` to `end / 2`.
/// `@` stays with the text after it; other break chars stay with the text before.
fn find_break(s: &str, end: usize) -> Option<usize> {
    let floor = end / 2;
    for (idx, ch) in s[..end].char_indices().rev() {
        if idx < floor {
            break;
        }
        match ch {
            '@' if idx > 0 => return Some(idx),
            c if c.is_whitespace() => {
                let before = s[..idx].trim_end();
                if before.len() > 1 && before.ends_with('@') {
                    return Some(before.len() - 1);
                }
                return Some(idx + c.len_utf8());
            }
            ',' | ')' | ']' | '-' => return Some(idx + 1),
            _ => {}
        }
    }
    None
}
