//! Restoration of a saved position onto freshly rendered content.
//!
//! Tiers are tried in order and the first hit wins:
//! 1. the saved block, if the target chapter still has it and it is rendered;
//! 2. the saved snippet (or legacy sentence) found in the chapter's text;
//! 3. the saved chapter character offset, mapped to its containing block;
//! 4. the start of the chapter (or the saved page in paginated mode).
//!
//! Tiers 2 and 3 synthesize a fresh block anchor so the next save upgrades
//! the record. The tracker stays gated until the scroll has settled.

use crate::blocks::{Block, BlockId, BlockIndexMap};
use crate::config::{PositionConfig, SnippetMismatchPolicy};
use crate::position::{BlockAnchor, ReadingPosition};
use crate::progress::BookStats;
use crate::surface::RenderSurface;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestoreTier {
    BlockAnchor,
    TextSearch,
    CharOffset,
    ChapterStart,
}

impl RestoreTier {
    pub fn number(self) -> u8 {
        match self {
            RestoreTier::BlockAnchor => 1,
            RestoreTier::TextSearch => 2,
            RestoreTier::CharOffset => 3,
            RestoreTier::ChapterStart => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorationState {
    Idle,
    AwaitingContent,
    Searching(RestoreTier),
    Settling { until: Instant },
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestoreConfig {
    pub settle: Duration,
    pub reference_line: f32,
    pub snippet_len: usize,
    pub snippet_mismatch: SnippetMismatchPolicy,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self::from(&PositionConfig::default())
    }
}

impl From<&PositionConfig> for RestoreConfig {
    fn from(config: &PositionConfig) -> Self {
        Self {
            settle: config.settle(),
            reference_line: config.reference_line,
            snippet_len: config.snippet_len,
            snippet_mismatch: config.snippet_mismatch,
        }
    }
}

/// Where a saved position resolves to inside one chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTarget {
    pub tier: RestoreTier,
    pub chapter_index: usize,
    pub block_id: Option<BlockId>,
    pub local_offset: usize,
    pub snippet_mismatch: bool,
}

impl RestoreTarget {
    fn chapter_start(chapter_index: usize) -> Self {
        Self {
            tier: RestoreTier::ChapterStart,
            chapter_index,
            block_id: None,
            local_offset: 0,
            snippet_mismatch: false,
        }
    }

    fn at(tier: RestoreTier, block: &Block, local_offset: usize, chapter_index: usize) -> Self {
        Self {
            tier,
            chapter_index,
            block_id: Some(block.id.clone()),
            local_offset,
            snippet_mismatch: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestorationOutcome {
    pub tier: RestoreTier,
    pub chapter_index: usize,
    pub block_id: Option<BlockId>,
    pub local_offset: usize,
    pub snippet_mismatch: bool,
    /// Position the reader is now at, when a block was located.
    pub restored: Option<ReadingPosition>,
    /// Set when tiers 2 or 3 produced a fresh block anchor to persist.
    pub upgraded: bool,
}

/// Resolve `position` against the target chapter's index. `is_rendered`
/// reports whether a block is present on the surface.
pub fn resolve(
    position: Option<&ReadingPosition>,
    index: &BlockIndexMap,
    is_rendered: impl Fn(&BlockId) -> bool,
    policy: SnippetMismatchPolicy,
) -> RestoreTarget {
    let chapter_index = index.chapter_index;
    let Some(position) = position else {
        return RestoreTarget::chapter_start(chapter_index);
    };

    let mut block_match = None;
    if let Some(anchor) = position.block_anchor() {
        if let Some(block) = index
            .get(&anchor.block_id)
            .filter(|block| is_rendered(&block.id))
        {
            let local = anchor.local_offset.min(block.clean_char_count);
            let mismatch = anchor
                .context_snippet
                .as_deref()
                .is_some_and(|snippet| !index.matches_snippet(block, local, snippet));
            let mut target =
                RestoreTarget::at(RestoreTier::BlockAnchor, block, local, chapter_index);
            target.snippet_mismatch = mismatch;
            if !mismatch || policy == SnippetMismatchPolicy::Advisory {
                return target;
            }
            block_match = Some(target);
        }
    }

    if let Some(text) = position.fallback_text() {
        if let Some((block, local)) = index.find_clean_text(text) {
            if is_rendered(&block.id) {
                return RestoreTarget::at(RestoreTier::TextSearch, block, local, chapter_index);
            }
        }
    }

    if let Some(target) = block_match {
        return target;
    }

    if let Some((block, local)) = index.block_at_char(position.chapter_char_offset) {
        if is_rendered(&block.id) {
            return RestoreTarget::at(RestoreTier::CharOffset, block, local, chapter_index);
        }
    }

    RestoreTarget::chapter_start(chapter_index)
}

/// One-shot restoration for a book open or a layout switch.
#[derive(Debug)]
pub struct RestorationEngine {
    config: RestoreConfig,
    position: Option<ReadingPosition>,
    target_chapter: usize,
    fallback_page: Option<usize>,
    state: RestorationState,
    outcome: Option<RestorationOutcome>,
}

impl RestorationEngine {
    pub fn new(position: Option<ReadingPosition>, config: RestoreConfig) -> Self {
        let target_chapter = position.as_ref().map_or(0, |p| p.chapter_index);
        let fallback_page = position.as_ref().and_then(|p| p.page_index);
        Self {
            config,
            position,
            target_chapter,
            fallback_page,
            state: RestorationState::Idle,
            outcome: None,
        }
    }

    /// Engine with no saved position that lands on a chapter (and page, in
    /// paginated mode).
    pub fn for_chapter(
        chapter_index: usize,
        page_index: Option<usize>,
        config: RestoreConfig,
    ) -> Self {
        Self {
            config,
            position: None,
            target_chapter: chapter_index,
            fallback_page: page_index,
            state: RestorationState::Idle,
            outcome: None,
        }
    }

    pub fn state(&self) -> RestorationState {
        self.state
    }

    pub fn target_chapter(&self) -> usize {
        self.target_chapter
    }

    pub fn position(&self) -> Option<&ReadingPosition> {
        self.position.as_ref()
    }

    pub fn outcome(&self) -> Option<&RestorationOutcome> {
        self.outcome.as_ref()
    }

    /// Whether tracker signals must be dropped.
    pub fn gates_tracker(&self) -> bool {
        self.state != RestorationState::Active
    }

    pub fn is_active(&self) -> bool {
        self.state == RestorationState::Active
    }

    /// Start waiting for the target chapter. Chapters past the end of the
    /// book clamp to the last one.
    pub fn begin(&mut self, chapter_count: usize) {
        if self.state != RestorationState::Idle {
            return;
        }
        if chapter_count > 0 && self.target_chapter >= chapter_count {
            warn!(
                chapter = self.target_chapter,
                chapter_count, "Saved chapter is out of range; clamping"
            );
            self.target_chapter = chapter_count - 1;
        }
        self.state = RestorationState::AwaitingContent;
        debug!(chapter = self.target_chapter, "Restoration awaiting content");
    }

    /// Run the tiers once the target chapter is rendered, scroll there and
    /// start settling. Ignored unless awaiting content for this chapter.
    pub fn on_content<S: RenderSurface + ?Sized>(
        &mut self,
        index: &BlockIndexMap,
        surface: &mut S,
        stats: &BookStats,
        now: Instant,
    ) -> Option<&RestorationOutcome> {
        if self.state != RestorationState::AwaitingContent
            || index.chapter_index != self.target_chapter
        {
            return None;
        }

        self.state = RestorationState::Searching(RestoreTier::BlockAnchor);
        let position = self.position.as_ref().filter(|p| p.chapter_index == index.chapter_index);
        let target = resolve(
            position,
            index,
            |id| surface.has_block(id),
            self.config.snippet_mismatch,
        );
        self.state = RestorationState::Searching(target.tier);

        let outcome = self.apply(&target, index, surface, stats);
        if outcome.snippet_mismatch {
            warn!(
                block = outcome.block_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
                policy = %self.config.snippet_mismatch,
                "Saved context snippet does not match restored block"
            );
        }
        info!(
            tier = outcome.tier.number(),
            chapter = outcome.chapter_index,
            block = outcome.block_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
            upgraded = outcome.upgraded,
            "Restored reading position"
        );

        self.state = RestorationState::Settling {
            until: now + self.config.settle,
        };
        self.outcome = Some(outcome);
        self.outcome.as_ref()
    }

    /// Advance out of settling. Returns `true` on the transition to active.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            RestorationState::Settling { until } if now >= until => {
                self.state = RestorationState::Active;
                debug!("Restoration settled");
                true
            }
            _ => false,
        }
    }

    fn apply<S: RenderSurface + ?Sized>(
        &self,
        target: &RestoreTarget,
        index: &BlockIndexMap,
        surface: &mut S,
        stats: &BookStats,
    ) -> RestorationOutcome {
        let located = target
            .block_id
            .as_ref()
            .and_then(|id| index.get(id))
            .filter(|block| {
                let fraction = if block.clean_char_count == 0 {
                    0.0
                } else {
                    target.local_offset as f32 / block.clean_char_count as f32
                };
                surface.scroll_to(&block.id, fraction, self.config.reference_line)
            });

        let Some(block) = located else {
            self.scroll_to_fallback(target.chapter_index, surface);
            return RestorationOutcome {
                tier: RestoreTier::ChapterStart,
                chapter_index: target.chapter_index,
                block_id: None,
                local_offset: 0,
                snippet_mismatch: false,
                restored: None,
                upgraded: false,
            };
        };

        let chapter_char_offset = block.clean_char_start + target.local_offset;
        let upgraded = matches!(target.tier, RestoreTier::TextSearch | RestoreTier::CharOffset);
        let restored = self.position.as_ref().map(|position| {
            let mut restored = if upgraded {
                position.clone().upgrade(
                    BlockAnchor {
                        block_id: block.id.clone(),
                        local_offset: target.local_offset,
                        context_snippet: Some(index.snippet_at(
                            block,
                            target.local_offset,
                            self.config.snippet_len,
                        ))
                        .filter(|snippet| !snippet.is_empty()),
                    },
                    chapter_char_offset,
                )
            } else {
                position.clone()
            };
            restored.chapter_char_offset = chapter_char_offset;
            let progress = stats.progress(target.chapter_index, restored.chapter_char_offset);
            restored.chapter_index = target.chapter_index;
            restored.total_chars_read = progress.total_chars_read;
            restored.chapter_progress = progress.chapter_progress;
            restored.total_progress = progress.total_progress;
            restored.page_index = surface.page_index();
            restored
        });

        RestorationOutcome {
            tier: target.tier,
            chapter_index: target.chapter_index,
            block_id: Some(block.id.clone()),
            local_offset: target.local_offset,
            snippet_mismatch: target.snippet_mismatch,
            restored,
            upgraded: upgraded && self.position.is_some(),
        }
    }

    fn scroll_to_fallback<S: RenderSurface + ?Sized>(&self, chapter_index: usize, surface: &mut S) {
        let page = self.fallback_page.filter(|_| surface.layout().is_paginated());
        let scrolled = match page {
            Some(page) => surface.scroll_to_page(chapter_index, page),
            None => surface.scroll_to_chapter_start(chapter_index),
        };
        if !scrolled {
            debug!(chapter = chapter_index, "Fallback chapter is not mounted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::build_block_index;
    use crate::layout::SimulatedSurface;
    use crate::position::{PositionRecord, ReadingPosition};
    use crate::progress::Progress;
    use crate::surface::LayoutSettings;

    const CHAPTER: &str = "<h1>Two</h1>\
        <p>The first paragraph of the chapter.</p>\
        <p>It was a bright cold day in April, and the clocks were striking thirteen.</p>\
        <p>Winston Smith slipped quickly through the glass doors.</p>\
        <p>The hallway smelt of boiled cabbage and old rag mats.</p>\
        <p>At one end of it a coloured poster had been tacked to the wall.</p>\
        <p>It depicted simply an enormous face, more than a metre wide.</p>";

    fn index() -> BlockIndexMap {
        build_block_index(CHAPTER, 2)
    }

    fn block_position(order: usize, local: usize, snippet: Option<&str>) -> ReadingPosition {
        ReadingPosition::block_anchored(
            BlockAnchor {
                block_id: BlockId::new(2, order),
                local_offset: local,
                context_snippet: snippet.map(str::to_string),
            },
            2,
            0,
            Progress::default(),
        )
    }

    #[test]
    fn tier_one_uses_rendered_block() {
        let index = index();
        let snippet = index.snippet_at(&index.blocks[5], 12, 40);
        let position = block_position(5, 12, Some(&snippet));
        let target = resolve(Some(&position), &index, |_| true, SnippetMismatchPolicy::Advisory);
        assert_eq!(target.tier, RestoreTier::BlockAnchor);
        assert_eq!(target.block_id, Some(BlockId::new(2, 5)));
        assert_eq!(target.local_offset, 12);
        assert!(!target.snippet_mismatch);
    }

    #[test]
    fn mismatch_policy_controls_tier_one() {
        let index = index();
        let position = block_position(1, 0, Some("Winston Smith slipped"));

        let advisory = resolve(
            Some(&position),
            &index,
            |_| true,
            SnippetMismatchPolicy::Advisory,
        );
        assert_eq!(advisory.tier, RestoreTier::BlockAnchor);
        assert!(advisory.snippet_mismatch);

        let downgraded = resolve(
            Some(&position),
            &index,
            |_| true,
            SnippetMismatchPolicy::Downgrade,
        );
        assert_eq!(downgraded.tier, RestoreTier::TextSearch);
        assert_eq!(downgraded.block_id, Some(BlockId::new(2, 3)));

        let unmatched = block_position(1, 0, Some("text that is nowhere in the chapter"));
        let kept = resolve(Some(&unmatched), &index, |_| true, SnippetMismatchPolicy::Downgrade);
        assert_eq!(kept.tier, RestoreTier::BlockAnchor);
        assert!(kept.snippet_mismatch);
    }

    #[test]
    fn missing_block_falls_back_to_text_search() {
        let index = index();
        let position = block_position(40, 3, Some("bright cold day in April"));
        let target = resolve(Some(&position), &index, |_| true, SnippetMismatchPolicy::Advisory);
        assert_eq!(target.tier, RestoreTier::TextSearch);
        assert_eq!(target.block_id, Some(BlockId::new(2, 2)));
        assert_eq!(target.local_offset, "Itwasa".len());
    }

    #[test]
    fn legacy_record_uses_offset_when_text_is_gone() {
        let index = index();
        let legacy = ReadingPosition::try_from(PositionRecord {
            sentence_text: Some("a sentence that was edited away".to_string()),
            chapter_index: 2,
            chapter_char_offset: Some(index.blocks[4].clean_char_start + 5),
            ..PositionRecord::default()
        })
        .expect("legacy");
        let target = resolve(Some(&legacy), &index, |_| true, SnippetMismatchPolicy::Advisory);
        assert_eq!(target.tier, RestoreTier::CharOffset);
        assert_eq!(target.block_id, Some(BlockId::new(2, 4)));
        assert_eq!(target.local_offset, 5);
    }

    #[test]
    fn nothing_saved_or_rendered_goes_to_chapter_start() {
        let index = index();
        let none = resolve(None, &index, |_| true, SnippetMismatchPolicy::Advisory);
        assert_eq!(none.tier, RestoreTier::ChapterStart);

        let position = block_position(5, 0, None);
        let unrendered = resolve(
            Some(&position),
            &index,
            |_| false,
            SnippetMismatchPolicy::Advisory,
        );
        assert_eq!(unrendered.tier, RestoreTier::ChapterStart);
    }

    #[test]
    fn engine_walks_states_and_upgrades_text_matches() {
        let index = index();
        let mut surface = SimulatedSurface::new(LayoutSettings::continuous());
        surface.mount_chapter(&index);
        let stats = BookStats::from_lengths(vec![100, 100, index.total_chars]);
        let legacy = ReadingPosition::try_from(PositionRecord {
            sentence_text: Some("slipped quickly through".to_string()),
            chapter_index: 2,
            chapter_char_offset: Some(0),
            ..PositionRecord::default()
        })
        .expect("legacy");

        let mut engine = RestorationEngine::new(Some(legacy), RestoreConfig::default());
        assert_eq!(engine.state(), RestorationState::Idle);
        engine.begin(3);
        assert_eq!(engine.state(), RestorationState::AwaitingContent);
        assert!(engine.gates_tracker());

        let now = Instant::now();
        let outcome = engine
            .on_content(&index, &mut surface, &stats, now)
            .cloned()
            .expect("outcome");
        assert_eq!(outcome.tier, RestoreTier::TextSearch);
        assert!(outcome.upgraded);
        let restored = outcome.restored.expect("restored");
        assert_eq!(restored.block_id(), Some(&BlockId::new(2, 3)));
        assert!(!restored.is_legacy());
        assert_eq!(
            restored.chapter_char_offset,
            index.blocks[3].clean_char_start + "WinstonSmith".len()
        );
        assert_eq!(restored.total_chars_read, 200 + restored.chapter_char_offset);

        assert!(matches!(engine.state(), RestorationState::Settling { .. }));
        assert!(!engine.poll(now + Duration::from_millis(399)));
        assert!(engine.poll(now + Duration::from_millis(400)));
        assert!(!engine.gates_tracker());
        assert!(!engine.poll(now + Duration::from_secs(10)));
    }

    #[test]
    fn engine_ignores_other_chapters_and_clamps_target() {
        let mut engine =
            RestorationEngine::new(Some(block_position(1, 0, None)), RestoreConfig::default());
        engine.begin(2);
        assert_eq!(engine.target_chapter(), 1);

        let other = build_block_index("<p>Chapter zero</p>", 0);
        let mut surface = SimulatedSurface::new(LayoutSettings::continuous());
        surface.mount_chapter(&other);
        let stats = BookStats::from_lengths(vec![11, 11]);
        assert!(engine.on_content(&other, &mut surface, &stats, Instant::now()).is_none());
        assert_eq!(engine.state(), RestorationState::AwaitingContent);

        let target = build_block_index("<p>Chapter one</p>", 1);
        surface.mount_chapter(&target);
        let outcome = engine
            .on_content(&target, &mut surface, &stats, Instant::now())
            .cloned()
            .expect("outcome");
        assert_eq!(outcome.chapter_index, 1);
        assert_eq!(outcome.tier, RestoreTier::ChapterStart);
    }

    #[test]
    fn chapter_fallback_uses_saved_page_when_paginated() {
        let mut html = String::new();
        for idx in 0..60 {
            html.push_str(&format!(
                "<p>Paragraph {idx} with enough words to wrap across a line or two.</p>"
            ));
        }
        let index = build_block_index(&html, 0);
        let mut surface = SimulatedSurface::new(LayoutSettings::paginated());
        surface.mount_chapter(&index);
        let stats = BookStats::from_lengths(vec![index.total_chars]);

        let mut engine = RestorationEngine::for_chapter(0, Some(1), RestoreConfig::default());
        engine.begin(1);
        let outcome = engine
            .on_content(&index, &mut surface, &stats, Instant::now())
            .cloned()
            .expect("outcome");
        assert_eq!(outcome.tier, RestoreTier::ChapterStart);
        assert_eq!(outcome.restored, None);
        assert_eq!(surface.page_index(), Some(1));
    }
}
