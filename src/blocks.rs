//! Structural block model.
//!
//! A chapter's markup is broken into an ordered list of paragraph-level
//! blocks. Each block gets a stable `ch{chapter}-b{order}` id and clean
//! character accounting so that a reading position can be expressed as
//! "block + offset" independently of how the chapter is laid out.

use crate::text_utils::{clean_char_count, clean_text, normalize_text, snippet_at};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;

const BLOCK_TAGS: [&str; 16] = [
    "p",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "li",
    "blockquote",
    "pre",
    "td",
    "th",
    "caption",
    "figcaption",
    "dt",
    "dd",
];

static BLOCK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(&BLOCK_TAGS.join(", ")).unwrap());
static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// Stable block key, `ch{chapter}-b{order}`.
///
/// Ids read back from storage are kept verbatim even when they do not follow
/// the usual form; such ids simply never match a rendered block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(chapter_index: usize, order: usize) -> Self {
        Self(format!("ch{chapter_index}-b{order}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a well-formed id into `(chapter_index, order)`.
    pub fn parts(&self) -> Option<(usize, usize)> {
        let rest = self.0.strip_prefix("ch")?;
        let (chapter, order) = rest.split_once("-b")?;
        Some((chapter.parse().ok()?, order.parse().ok()?))
    }

    pub fn chapter_index(&self) -> Option<usize> {
        self.parts().map(|(chapter, _)| chapter)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for BlockId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Structural role of a block. Informational only; identity never depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockKind {
    Paragraph,
    Heading(u8),
    ListItem,
    Quote,
    Preformatted,
    TableCell,
    Caption,
    DefinitionTerm,
    DefinitionDescription,
}

impl BlockKind {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "h1" => BlockKind::Heading(1),
            "h2" => BlockKind::Heading(2),
            "h3" => BlockKind::Heading(3),
            "h4" => BlockKind::Heading(4),
            "h5" => BlockKind::Heading(5),
            "h6" => BlockKind::Heading(6),
            "li" => BlockKind::ListItem,
            "blockquote" => BlockKind::Quote,
            "pre" => BlockKind::Preformatted,
            "td" | "th" => BlockKind::TableCell,
            "caption" | "figcaption" => BlockKind::Caption,
            "dt" => BlockKind::DefinitionTerm,
            "dd" => BlockKind::DefinitionDescription,
            _ => BlockKind::Paragraph,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub id: BlockId,
    pub order: usize,
    pub kind: BlockKind,
    pub clean_char_count: usize,
    pub clean_char_start: usize,
    /// NFC-normalized text with whitespace collapsed.
    pub text: String,
}

/// Snapshot of the blocks of one rendered chapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockIndexMap {
    pub chapter_index: usize,
    pub blocks: Vec<Block>,
    pub total_chars: usize,
}

/// Build the block index of one chapter.
///
/// Identical markup always yields identical ids, orders and offsets.
pub fn build_block_index(chapter_content: &str, chapter_index: usize) -> BlockIndexMap {
    let document = Html::parse_document(chapter_content);
    let mut index = BlockIndexMap {
        chapter_index,
        blocks: Vec::new(),
        total_chars: 0,
    };

    for element in document.select(&BLOCK_SELECTOR) {
        if has_block_ancestor(element) {
            continue;
        }
        let text = normalize_text(&element.text().collect::<String>());
        index.push(BlockKind::from_tag(element.value().name()), text);
    }

    if index.blocks.is_empty() {
        // Bare text with no block markup still gets one addressable block.
        let root = document
            .select(&BODY_SELECTOR)
            .next()
            .unwrap_or_else(|| document.root_element());
        let text = normalize_text(&root.text().collect::<String>());
        if !text.is_empty() {
            index.push(BlockKind::Paragraph, text);
        }
    }

    index
}

fn has_block_ancestor(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| BLOCK_TAGS.contains(&ancestor.value().name()))
}

impl BlockIndexMap {
    fn push(&mut self, kind: BlockKind, text: String) {
        let order = self.blocks.len();
        let count = clean_char_count(&text);
        self.blocks.push(Block {
            id: BlockId::new(self.chapter_index, order),
            order,
            kind,
            clean_char_count: count,
            clean_char_start: self.total_chars,
            text,
        });
        self.total_chars += count;
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.iter().find(|block| &block.id == id)
    }

    pub fn first(&self) -> Option<&Block> {
        self.blocks.first()
    }

    /// Block containing the chapter-relative clean offset, with the offset
    /// local to that block. Offsets past the end land on the last block.
    pub fn block_at_char(&self, chapter_char_offset: usize) -> Option<(&Block, usize)> {
        if self.blocks.is_empty() {
            return None;
        }
        let idx = self
            .blocks
            .partition_point(|block| block.clean_char_start <= chapter_char_offset)
            .saturating_sub(1);
        let block = &self.blocks[idx];
        let local = chapter_char_offset
            .saturating_sub(block.clean_char_start)
            .min(block.clean_char_count);
        Some((block, local))
    }

    /// First occurrence of `needle` in the chapter's clean text, as a block
    /// plus local clean offset. Whitespace differences are ignored.
    pub fn find_clean_text(&self, needle: &str) -> Option<(&Block, usize)> {
        let needle = clean_text(needle);
        if needle.is_empty() {
            return None;
        }

        let mut haystack = String::new();
        let mut starts = Vec::with_capacity(self.blocks.len());
        let mut cursor = 0usize;
        for block in &self.blocks {
            let cleaned = clean_text(&block.text);
            starts.push(cursor);
            cursor += cleaned.chars().count();
            haystack.push_str(&cleaned);
        }

        let byte_idx = haystack.find(&needle)?;
        let char_offset = haystack[..byte_idx].chars().count();
        let block_idx = starts
            .partition_point(|start| *start <= char_offset)
            .saturating_sub(1);
        let block = &self.blocks[block_idx];
        let local = (char_offset - starts[block_idx]).min(block.clean_char_count);
        Some((block, local))
    }

    /// Up to `max_clean` clean characters starting `local_offset` into
    /// `block`, continuing into following blocks when the block runs out.
    pub fn snippet_at(&self, block: &Block, local_offset: usize, max_clean: usize) -> String {
        let Some(position) = self.blocks.iter().position(|b| b.id == block.id) else {
            return String::new();
        };
        let wanted = local_offset.saturating_add(max_clean);
        let mut joined = String::new();
        let mut available = 0usize;
        for next in &self.blocks[position..] {
            if !joined.is_empty() {
                joined.push(' ');
            }
            joined.push_str(&next.text);
            available += next.clean_char_count;
            if available >= wanted {
                break;
            }
        }
        snippet_at(&joined, local_offset, max_clean)
    }

    /// Whether the text at `block` + `local_offset` starts with `snippet`,
    /// compared in clean space.
    pub fn matches_snippet(&self, block: &Block, local_offset: usize, snippet: &str) -> bool {
        let expected = clean_text(snippet);
        if expected.is_empty() {
            return true;
        }
        let actual = clean_text(&self.snippet_at(block, local_offset, expected.chars().count()));
        actual == expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAPTER: &str = r#"<html><head><title>Ignored</title></head><body>
        <h1>Chapter  One</h1>
        <p>It was a bright cold day in April.</p>
        <ul><li><p>First item</p></li><li>Second   item</li></ul>
        <blockquote><p>Quoted line.</p></blockquote>
        <table><tr><td>Cell A</td><td>Cell B</td></tr></table>
        <p>   </p>
    </body></html>"#;

    #[test]
    fn assigns_ids_in_document_order() {
        let index = build_block_index(CHAPTER, 2);
        let ids: Vec<&str> = index.blocks.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["ch2-b0", "ch2-b1", "ch2-b2", "ch2-b3", "ch2-b4", "ch2-b5", "ch2-b6", "ch2-b7"]
        );
        assert_eq!(index.blocks[0].kind, BlockKind::Heading(1));
        assert_eq!(index.blocks[2].kind, BlockKind::ListItem);
        assert_eq!(index.blocks[4].kind, BlockKind::Quote);
        assert_eq!(index.blocks[5].kind, BlockKind::TableCell);
    }

    #[test]
    fn nested_blocks_fold_into_outermost() {
        let index = build_block_index(CHAPTER, 0);
        assert_eq!(index.blocks[2].text, "First item");
        assert_eq!(index.blocks[3].text, "Second item");
        assert_eq!(index.blocks[4].text, "Quoted line.");
    }

    #[test]
    fn clean_starts_are_running_sums() {
        let index = build_block_index(CHAPTER, 0);
        let mut expected_start = 0;
        for block in &index.blocks {
            assert_eq!(block.clean_char_start, expected_start);
            expected_start += block.clean_char_count;
        }
        assert_eq!(index.total_chars, expected_start);
        assert_eq!(index.blocks[0].clean_char_count, "ChapterOne".len());
        assert_eq!(index.blocks[7].clean_char_count, 0);
    }

    #[test]
    fn identical_markup_is_deterministic() {
        let first = build_block_index(CHAPTER, 4);
        for _ in 0..5 {
            assert_eq!(build_block_index(CHAPTER, 4), first);
        }
    }

    #[test]
    fn whitespace_reflow_does_not_shift_offsets() {
        let compact = "<p>Alpha beta</p><p>Gamma</p>";
        let loose = "<p>\n   Alpha\n\n beta   </p>\n\n<p>  Gamma\n</p>";
        let a = build_block_index(compact, 0);
        let b = build_block_index(loose, 0);
        let offsets = |index: &BlockIndexMap| {
            index
                .blocks
                .iter()
                .map(|block| (block.id.clone(), block.clean_char_start, block.clean_char_count))
                .collect::<Vec<_>>()
        };
        assert_eq!(offsets(&a), offsets(&b));
    }

    #[test]
    fn bare_text_becomes_single_block() {
        let index = build_block_index("Just some text with no markup", 1);
        assert_eq!(index.len(), 1);
        assert_eq!(index.blocks[0].id.as_str(), "ch1-b0");
        assert!(build_block_index("   ", 1).is_empty());
    }

    #[test]
    fn block_at_char_finds_containing_block() {
        let index = build_block_index("<p>abcde</p><p>fgh</p><p>ij</p>", 0);
        let (block, local) = index.block_at_char(6).expect("block for offset");
        assert_eq!(block.id.as_str(), "ch0-b1");
        assert_eq!(local, 1);
        let (block, local) = index.block_at_char(5).expect("block at boundary");
        assert_eq!(block.id.as_str(), "ch0-b1");
        assert_eq!(local, 0);
        let (block, local) = index.block_at_char(999).expect("clamped block");
        assert_eq!(block.id.as_str(), "ch0-b2");
        assert_eq!(local, 2);
    }

    #[test]
    fn find_clean_text_ignores_whitespace_and_spans_blocks() {
        let index = build_block_index("<p>The quick brown</p><p>fox jumps over</p>", 3);
        let (block, local) = index.find_clean_text("brown   fox").expect("match");
        assert_eq!(block.id.as_str(), "ch3-b0");
        assert_eq!(local, "Thequick".len());
        let (block, local) = index.find_clean_text("jumps").expect("match");
        assert_eq!(block.id.as_str(), "ch3-b1");
        assert_eq!(local, 3);
        assert!(index.find_clean_text("missing words").is_none());
        assert!(index.find_clean_text("   ").is_none());
    }

    #[test]
    fn snippet_continues_into_following_blocks() {
        let index = build_block_index("<p>short</p><p>and then more text</p>", 0);
        let block = index.first().expect("first block");
        assert_eq!(index.snippet_at(block, 2, 8), "ort and th");
        assert_eq!(index.snippet_at(block, 2, 10), "ort and then");
        assert!(index.matches_snippet(block, 2, "ort and then"));
        assert!(index.matches_snippet(block, 2, "ortandthen"));
        assert!(!index.matches_snippet(block, 0, "ort and"));
    }

    #[test]
    fn block_id_parts_round_trip() {
        let id = BlockId::new(12, 40);
        assert_eq!(id.as_str(), "ch12-b40");
        assert_eq!(id.parts(), Some((12, 40)));
        assert_eq!(BlockId::from("para-7").parts(), None);
    }
}
