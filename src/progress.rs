//! Chapter and book completion percentages.

use serde::{Deserialize, Serialize};

/// Per-book length statistics in clean characters, supplied by the content
/// provider and fixed for the lifetime of a reading session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookStats {
    pub chapter_lengths: Vec<usize>,
    pub total_length: usize,
}

impl BookStats {
    pub fn from_lengths(chapter_lengths: Vec<usize>) -> Self {
        let total_length = chapter_lengths.iter().sum();
        Self {
            chapter_lengths,
            total_length,
        }
    }

    pub fn chapter_count(&self) -> usize {
        self.chapter_lengths.len()
    }

    pub fn progress(&self, chapter_index: usize, chapter_char_offset: usize) -> Progress {
        progress_with_total(
            chapter_index,
            chapter_char_offset,
            &self.chapter_lengths,
            self.total_length,
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    pub chapter_progress: f64,
    pub total_progress: f64,
    pub total_chars_read: usize,
}

/// Completion of `chapter_char_offset` within chapter `chapter_index`, with the
/// book length taken as the sum of `chapter_lengths`.
pub fn compute_progress(
    chapter_index: usize,
    chapter_char_offset: usize,
    chapter_lengths: &[usize],
) -> Progress {
    let total_length = chapter_lengths.iter().sum();
    progress_with_total(chapter_index, chapter_char_offset, chapter_lengths, total_length)
}

fn progress_with_total(
    chapter_index: usize,
    chapter_char_offset: usize,
    chapter_lengths: &[usize],
    total_length: usize,
) -> Progress {
    let preceding: usize = chapter_lengths.iter().take(chapter_index).sum();
    let total_chars_read = preceding.saturating_add(chapter_char_offset);
    if total_length == 0 {
        return Progress {
            chapter_progress: 0.0,
            total_progress: 0.0,
            total_chars_read,
        };
    }

    let chapter_length = chapter_lengths.get(chapter_index).copied().unwrap_or(0);
    Progress {
        chapter_progress: percent(chapter_char_offset, chapter_length),
        total_progress: percent(total_chars_read, total_length),
        total_chars_read,
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    (100.0 * part as f64 / whole.max(1) as f64).clamp(0.0, 100.0)
}
