//! Text helpers shared by the block model and restoration.
//!
//! Offsets in this crate are counted in "clean" characters: Unicode scalar
//! values that are not whitespace, measured on NFC-normalized text. Counting
//! this way keeps offsets stable when a renderer collapses or re-wraps
//! whitespace differently between two layouts.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static RE_WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// NFC-normalize and collapse whitespace runs into single spaces.
pub fn normalize_text(text: &str) -> String {
    let composed: String = text.nfc().collect();
    RE_WHITESPACE_RUN
        .replace_all(composed.trim(), " ")
        .into_owned()
}

/// Number of non-whitespace characters in `text`.
pub fn clean_char_count(text: &str) -> usize {
    text.chars().filter(|ch| !ch.is_whitespace()).count()
}

/// `text` normalized and stripped of all whitespace.
pub fn clean_text(text: &str) -> String {
    text.nfc().filter(|ch| !ch.is_whitespace()).collect()
}

/// Byte index of the `clean_offset`-th clean character, or `text.len()` when
/// the offset runs past the end.
pub fn byte_index_for_clean_offset(text: &str, clean_offset: usize) -> usize {
    let mut seen = 0usize;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            continue;
        }
        if seen == clean_offset {
            return idx;
        }
        seen += 1;
    }
    text.len()
}

/// Up to `max_clean` clean characters of `text` starting at `clean_offset`.
/// Interior whitespace is kept so the snippet stays readable.
pub fn snippet_at(text: &str, clean_offset: usize, max_clean: usize) -> String {
    let start = byte_index_for_clean_offset(text, clean_offset);
    let mut taken = 0usize;
    let mut end = start;
    for (idx, ch) in text[start..].char_indices() {
        if !ch.is_whitespace() {
            if taken == max_clean {
                break;
            }
            taken += 1;
        }
        end = start + idx + ch.len_utf8();
    }
    text[start..end].trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_runs_and_trims() {
        assert_eq!(normalize_text("  Call me\n\t Ishmael.  "), "Call me Ishmael.");
        assert_eq!(normalize_text("a\u{00A0}\u{00A0}b"), "a b");
    }

    #[test]
    fn normalize_composes_decomposed_accents() {
        let decomposed = "Cafe\u{0301}";
        assert_eq!(normalize_text(decomposed), "Caf\u{00E9}");
        assert_eq!(clean_char_count(&normalize_text(decomposed)), 4);
    }

    #[test]
    fn clean_counts_ignore_whitespace_layout() {
        assert_eq!(clean_char_count("ab cd"), clean_char_count("ab\n\n   cd"));
        assert_eq!(clean_text(" a b\tc "), "abc");
    }

    #[test]
    fn snippet_counts_clean_characters_only() {
        let text = "It was a bright cold day in April";
        assert_eq!(snippet_at(text, 0, 5), "It was");
        assert_eq!(snippet_at(text, 2, 4), "was a");
        assert_eq!(snippet_at(text, 100, 4), "");
    }

    #[test]
    fn byte_index_skips_leading_whitespace() {
        assert_eq!(byte_index_for_clean_offset("  ab", 0), 2);
        assert_eq!(byte_index_for_clean_offset("a b", 1), 2);
        assert_eq!(byte_index_for_clean_offset("a b", 9), 3);
    }
}
