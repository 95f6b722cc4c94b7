//! The persisted reading position.
//!
//! In memory a position carries a tagged anchor: either a block anchor
//! (current format) or a legacy text anchor from records written before
//! blocks existed. On disk and across the shell boundary the position is a
//! flat [`PositionRecord`] whose optional fields mirror the historic format.

use crate::blocks::BlockId;
use crate::progress::Progress;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use ts_rs::TS;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("position has neither a block anchor nor fallback text with a chapter offset")]
    MissingAnchor,
    #[error("chapter {0} is no longer loaded")]
    StaleChapter(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAnchor {
    pub block_id: BlockId,
    /// Clean-character offset inside the block.
    pub local_offset: usize,
    pub context_snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyAnchor {
    pub sentence_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    Block(BlockAnchor),
    Legacy(LegacyAnchor),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadingPosition {
    pub anchor: Anchor,
    pub chapter_index: usize,
    pub page_index: Option<usize>,
    /// Clean-character offset from the chapter start; kept in sync even when
    /// the block anchor is primary.
    pub chapter_char_offset: usize,
    pub total_chars_read: usize,
    pub chapter_progress: f64,
    pub total_progress: f64,
    pub timestamp_ms: u64,
}

impl ReadingPosition {
    pub fn block_anchored(
        anchor: BlockAnchor,
        chapter_index: usize,
        chapter_char_offset: usize,
        progress: Progress,
    ) -> Self {
        Self {
            anchor: Anchor::Block(anchor),
            chapter_index,
            page_index: None,
            chapter_char_offset,
            total_chars_read: progress.total_chars_read,
            chapter_progress: progress.chapter_progress,
            total_progress: progress.total_progress,
            timestamp_ms: now_ms(),
        }
    }

    pub fn with_page_index(mut self, page_index: Option<usize>) -> Self {
        self.page_index = page_index;
        self
    }

    pub fn block_anchor(&self) -> Option<&BlockAnchor> {
        match &self.anchor {
            Anchor::Block(anchor) => Some(anchor),
            Anchor::Legacy(_) => None,
        }
    }

    pub fn block_id(&self) -> Option<&BlockId> {
        self.block_anchor().map(|anchor| &anchor.block_id)
    }

    /// Text used to relocate the position when the block anchor is unusable.
    pub fn fallback_text(&self) -> Option<&str> {
        let text = match &self.anchor {
            Anchor::Block(anchor) => anchor.context_snippet.as_deref(),
            Anchor::Legacy(anchor) => Some(anchor.sentence_text.as_str()),
        };
        text.filter(|text| !text.trim().is_empty())
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self.anchor, Anchor::Legacy(_))
    }

    pub fn validate(&self) -> Result<(), PositionError> {
        let valid = match &self.anchor {
            Anchor::Block(anchor) => !anchor.block_id.as_str().is_empty(),
            Anchor::Legacy(anchor) => !anchor.sentence_text.trim().is_empty(),
        };
        if valid {
            Ok(())
        } else {
            Err(PositionError::MissingAnchor)
        }
    }

    /// Replace the anchor with a freshly located block anchor. Used after a
    /// text or offset match so the next save writes the current format.
    pub fn upgrade(mut self, anchor: BlockAnchor, chapter_char_offset: usize) -> Self {
        self.anchor = Anchor::Block(anchor);
        self.chapter_char_offset = chapter_char_offset;
        self.timestamp_ms = now_ms();
        self
    }

    pub fn to_record(&self) -> PositionRecord {
        let (block_id, block_local_offset, context_snippet, sentence_text) = match &self.anchor {
            Anchor::Block(anchor) => (
                Some(anchor.block_id.to_string()),
                Some(anchor.local_offset),
                anchor.context_snippet.clone(),
                None,
            ),
            Anchor::Legacy(anchor) => (None, None, None, Some(anchor.sentence_text.clone())),
        };
        PositionRecord {
            block_id,
            block_local_offset,
            context_snippet,
            sentence_text,
            chapter_index: self.chapter_index,
            page_index: self.page_index,
            chapter_char_offset: Some(self.chapter_char_offset),
            total_chars_read: self.total_chars_read,
            chapter_progress: self.chapter_progress,
            total_progress: self.total_progress,
            timestamp: self.timestamp_ms,
        }
    }
}

impl TryFrom<PositionRecord> for ReadingPosition {
    type Error = PositionError;

    fn try_from(record: PositionRecord) -> Result<Self, Self::Error> {
        let block_id = record.block_id.filter(|id| !id.trim().is_empty());
        let anchor = match block_id {
            Some(block_id) => Anchor::Block(BlockAnchor {
                block_id: BlockId::from(block_id),
                local_offset: record.block_local_offset.unwrap_or(0),
                context_snippet: record.context_snippet,
            }),
            None => {
                let text = record
                    .sentence_text
                    .or(record.context_snippet)
                    .filter(|text| !text.trim().is_empty());
                match (text, record.chapter_char_offset) {
                    (Some(sentence_text), Some(_)) => {
                        Anchor::Legacy(LegacyAnchor { sentence_text })
                    }
                    _ => return Err(PositionError::MissingAnchor),
                }
            }
        };
        Ok(Self {
            anchor,
            chapter_index: record.chapter_index,
            page_index: record.page_index,
            chapter_char_offset: record.chapter_char_offset.unwrap_or(0),
            total_chars_read: record.total_chars_read,
            chapter_progress: sanitize_percent(record.chapter_progress),
            total_progress: sanitize_percent(record.total_progress),
            timestamp_ms: record.timestamp,
        })
    }
}

/// Flat, camelCase wire form of a reading position. One record per book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PositionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub block_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub block_local_offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub context_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub sentence_text: Option<String>,
    #[serde(default)]
    pub chapter_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub page_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub chapter_char_offset: Option<usize>,
    #[serde(default)]
    pub total_chars_read: usize,
    #[serde(default)]
    pub chapter_progress: f64,
    #[serde(default)]
    pub total_progress: f64,
    #[serde(default)]
    pub timestamp: u64,
}

fn sanitize_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
