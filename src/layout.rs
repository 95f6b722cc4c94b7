//! Deterministic reference layout engine.
//!
//! Block sizes are estimated from the font size, line spacing, margins and
//! viewport rather than measured, so geometry is reproducible across runs.
//! Relayouts (mounting, unmounting, metric changes) keep the block at the
//! top of the viewport in place.

use crate::blocks::{BlockId, BlockIndexMap, BlockKind};
use crate::surface::{
    BlockExtent, LayoutSettings, ReadingDirection, RenderSurface, ScrollAxis, Viewport,
};
use tracing::trace;

/// Minimum allowed font size (points).
pub const MIN_FONT_SIZE: f32 = 8.0;
/// Maximum allowed font size (points).
pub const MAX_FONT_SIZE: f32 = 72.0;

const PAGE_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutMetrics {
    pub font_size: f32,
    pub line_spacing: f32,
    pub margin: f32,
    pub viewport_width: f32,
    pub viewport_height: f32,
    pub block_spacing: f32,
}

impl Default for LayoutMetrics {
    fn default() -> Self {
        Self {
            font_size: 22.0,
            line_spacing: 1.2,
            margin: 24.0,
            viewport_width: 800.0,
            viewport_height: 1000.0,
            block_spacing: 12.0,
        }
    }
}

impl LayoutMetrics {
    fn sanitized(mut self) -> Self {
        self.font_size = self.font_size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        self.line_spacing = self.line_spacing.max(0.8);
        self.margin = self.margin.max(0.0);
        self.viewport_width = self.viewport_width.max(1.0);
        self.viewport_height = self.viewport_height.max(1.0);
        self.block_spacing = self.block_spacing.max(0.0);
        self
    }
}

#[derive(Debug, Clone)]
struct MountedChapter {
    chapter_index: usize,
    blocks: Vec<(BlockId, BlockKind, String)>,
}

#[derive(Debug, Clone, Copy)]
struct ChapterSpan {
    chapter_index: usize,
    start: f32,
    end: f32,
}

#[derive(Debug, Clone)]
pub struct SimulatedSurface {
    settings: LayoutSettings,
    metrics: LayoutMetrics,
    chapters: Vec<MountedChapter>,
    extents: Vec<BlockExtent>,
    spans: Vec<ChapterSpan>,
    content_extent: f32,
    offset: f32,
}

impl SimulatedSurface {
    pub fn new(settings: LayoutSettings) -> Self {
        Self::with_metrics(settings, LayoutMetrics::default())
    }

    pub fn with_metrics(settings: LayoutSettings, metrics: LayoutMetrics) -> Self {
        Self {
            settings,
            metrics: metrics.sanitized(),
            chapters: Vec::new(),
            extents: Vec::new(),
            spans: Vec::new(),
            content_extent: 0.0,
            offset: 0.0,
        }
    }

    pub fn metrics(&self) -> LayoutMetrics {
        self.metrics
    }

    /// Apply new metrics and reflow, keeping the top block in view.
    pub fn set_metrics(&mut self, metrics: LayoutMetrics) {
        let anchor = self.top_anchor();
        self.metrics = metrics.sanitized();
        self.relayout();
        self.restore_anchor(anchor);
    }

    pub fn scroll_offset(&self) -> f32 {
        self.offset
    }

    /// Offset as a platform scroll container would report it: negative for
    /// right-to-left horizontal flow.
    pub fn physical_scroll_offset(&self) -> f32 {
        match (self.settings.axis, self.settings.direction) {
            (ScrollAxis::Horizontal, ReadingDirection::Rtl) => -self.offset,
            _ => self.offset,
        }
    }

    pub fn set_scroll_offset(&mut self, offset: f32) {
        self.offset = self.clamp_offset(offset);
    }

    pub fn scroll_by(&mut self, delta: f32) {
        self.set_scroll_offset(self.offset + delta);
    }

    pub fn next_page(&mut self) {
        self.scroll_by(self.page_extent());
    }

    pub fn prev_page(&mut self) {
        self.scroll_by(-self.page_extent());
    }

    /// Number of pages the chapter spans; `None` if it is not mounted.
    pub fn page_count(&self, chapter_index: usize) -> Option<usize> {
        let span = self.span(chapter_index)?;
        let pages = ((span.end - span.start) / self.page_extent() - PAGE_EPSILON).ceil();
        Some(pages.max(1.0) as usize)
    }

    /// Chapter-relative page holding the start of the block.
    pub fn page_for_block(&self, block_id: &BlockId) -> Option<usize> {
        let extent = self.extent(block_id)?;
        let span = self.span(extent.chapter_index)?;
        Some(page_floor(extent.start - span.start, self.page_extent()))
    }

    /// Block at the top edge of the viewport and the fraction of it scrolled
    /// past.
    pub fn top_anchor(&self) -> Option<(BlockId, f32)> {
        let offset = self.offset;
        if let Some(extent) = self.extents.iter().find(|extent| extent.contains(offset)) {
            return Some((extent.block_id.clone(), extent.fraction_at(offset)));
        }
        self.extents
            .iter()
            .find(|extent| extent.start >= offset)
            .or_else(|| self.extents.last())
            .map(|extent| (extent.block_id.clone(), 0.0))
    }

    fn restore_anchor(&mut self, anchor: Option<(BlockId, f32)>) {
        let target = anchor.and_then(|(id, fraction)| {
            self.extent(&id)
                .map(|extent| extent.start + fraction * extent.len())
        });
        let offset = target.unwrap_or(self.offset);
        self.offset = self.clamp_offset(offset);
    }

    fn extent(&self, block_id: &BlockId) -> Option<&BlockExtent> {
        self.extents
            .iter()
            .find(|extent| &extent.block_id == block_id)
    }

    fn span(&self, chapter_index: usize) -> Option<ChapterSpan> {
        self.spans
            .iter()
            .find(|span| span.chapter_index == chapter_index)
            .copied()
    }

    fn page_extent(&self) -> f32 {
        match self.settings.axis {
            ScrollAxis::Vertical => self.metrics.viewport_height,
            ScrollAxis::Horizontal => self.metrics.viewport_width,
        }
        .max(1.0)
    }

    /// Length available for a line, across the scroll axis.
    fn line_extent(&self) -> f32 {
        let cross = match self.settings.axis {
            ScrollAxis::Vertical => self.metrics.viewport_width,
            ScrollAxis::Horizontal => self.metrics.viewport_height,
        };
        let margin_total = (self.metrics.margin * 2.0).min(cross * 0.9);
        (cross - margin_total).max(1.0)
    }

    fn clamp_offset(&self, offset: f32) -> f32 {
        let page = self.page_extent();
        let offset = if offset.is_finite() { offset } else { 0.0 };
        if self.settings.is_paginated() {
            let pages = (self.content_extent / page - PAGE_EPSILON).ceil().max(1.0);
            let last_page_start = (pages - 1.0) * page;
            (page_floor(offset.max(0.0), page) as f32 * page).clamp(0.0, last_page_start)
        } else {
            let max_offset = (self.content_extent - page).max(0.0);
            offset.clamp(0.0, max_offset)
        }
    }

    fn relayout(&mut self) {
        let page = self.page_extent();
        let paginated = self.settings.is_paginated();
        let mut extents = Vec::new();
        let mut spans = Vec::with_capacity(self.chapters.len());
        let mut cursor = 0.0f32;

        for chapter in &self.chapters {
            if paginated {
                cursor = (cursor / page - PAGE_EPSILON).ceil().max(0.0) * page;
            }
            let chapter_start = cursor;
            cursor += self.metrics.margin;
            for (idx, (id, kind, text)) in chapter.blocks.iter().enumerate() {
                if idx > 0 {
                    cursor += self.metrics.block_spacing;
                }
                let size = self.estimate_block_size(*kind, text);
                extents.push(BlockExtent {
                    block_id: id.clone(),
                    chapter_index: chapter.chapter_index,
                    start: cursor,
                    end: cursor + size,
                });
                cursor += size;
            }
            cursor += self.metrics.margin;
            spans.push(ChapterSpan {
                chapter_index: chapter.chapter_index,
                start: chapter_start,
                end: cursor,
            });
        }

        self.content_extent = if paginated {
            (cursor / page - PAGE_EPSILON).ceil().max(0.0) * page
        } else {
            cursor
        };
        self.extents = extents;
        self.spans = spans;
        trace!(
            blocks = self.extents.len(),
            content_extent = self.content_extent,
            "Relayout complete"
        );
    }

    fn estimate_block_size(&self, kind: BlockKind, text: &str) -> f32 {
        let font_size = self.metrics.font_size * heading_scale(kind);
        let line_height = font_size * self.metrics.line_spacing;
        let glyph_width = (font_size * 0.55).max(1.0);
        let max_units_per_line = (self.line_extent() / glyph_width).max(8.0);

        let mut lines = 1.0f32;
        let mut line_units = 0.0f32;
        for ch in text.chars() {
            if ch == '\n' && kind == BlockKind::Preformatted {
                lines += 1.0;
                line_units = 0.0;
                continue;
            }
            let units = if ch.is_whitespace() {
                0.45
            } else if ch.is_ascii_punctuation() {
                0.55
            } else if ch.is_ascii() {
                1.0
            } else {
                1.8
            };
            if line_units + units > max_units_per_line {
                lines += 1.0;
                line_units = units;
            } else {
                line_units += units;
            }
        }
        lines * line_height
    }
}

fn heading_scale(kind: BlockKind) -> f32 {
    match kind {
        BlockKind::Heading(1) => 1.6,
        BlockKind::Heading(2) => 1.4,
        BlockKind::Heading(3) => 1.25,
        BlockKind::Heading(_) => 1.1,
        _ => 1.0,
    }
}

fn page_floor(offset: f32, page: f32) -> usize {
    (offset / page + PAGE_EPSILON).floor().max(0.0) as usize
}

impl RenderSurface for SimulatedSurface {
    fn layout(&self) -> LayoutSettings {
        self.settings
    }

    fn mount_chapter(&mut self, index: &BlockIndexMap) {
        let anchor = self.top_anchor();
        let mounted = MountedChapter {
            chapter_index: index.chapter_index,
            blocks: index
                .blocks
                .iter()
                .map(|block| (block.id.clone(), block.kind, block.text.clone()))
                .collect(),
        };
        match self
            .chapters
            .binary_search_by_key(&index.chapter_index, |chapter| chapter.chapter_index)
        {
            Ok(pos) => self.chapters[pos] = mounted,
            Err(pos) => self.chapters.insert(pos, mounted),
        }
        self.relayout();
        self.restore_anchor(anchor);
    }

    fn unmount_chapter(&mut self, chapter_index: usize) {
        let anchor = self.top_anchor();
        self.chapters
            .retain(|chapter| chapter.chapter_index != chapter_index);
        self.relayout();
        self.restore_anchor(anchor);
    }

    fn mounted_chapters(&self) -> Vec<usize> {
        self.chapters
            .iter()
            .map(|chapter| chapter.chapter_index)
            .collect()
    }

    fn viewport(&self) -> Viewport {
        Viewport {
            offset: self.offset,
            extent: self.page_extent(),
            content_extent: self.content_extent,
        }
    }

    fn block_extents(&self) -> &[BlockExtent] {
        &self.extents
    }

    fn scroll_to(&mut self, block_id: &BlockId, local_fraction: f32, reference_line: f32) -> bool {
        let Some(extent) = self.extent(block_id) else {
            return false;
        };
        let point = extent.start + local_fraction.clamp(0.0, 1.0) * extent.len();
        let target = if self.settings.is_paginated() {
            point
        } else {
            point - reference_line.clamp(0.0, 1.0) * self.page_extent()
        };
        self.offset = self.clamp_offset(target);
        true
    }

    fn scroll_to_chapter_start(&mut self, chapter_index: usize) -> bool {
        let Some(span) = self.span(chapter_index) else {
            return false;
        };
        self.offset = self.clamp_offset(span.start);
        true
    }

    fn scroll_to_page(&mut self, chapter_index: usize, page_index: usize) -> bool {
        let (Some(span), Some(pages)) = (self.span(chapter_index), self.page_count(chapter_index))
        else {
            return false;
        };
        let page = page_index.min(pages.saturating_sub(1));
        self.offset = self.clamp_offset(span.start + page as f32 * self.page_extent());
        true
    }

    fn page_index(&self) -> Option<usize> {
        if !self.settings.is_paginated() {
            return None;
        }
        let span = self
            .spans
            .iter()
            .rev()
            .find(|span| span.start <= self.offset + PAGE_EPSILON)?;
        Some(page_floor(self.offset - span.start, self.page_extent()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::build_block_index;

    fn chapter_html(chapter: usize, paragraphs: usize) -> String {
        let mut html = format!("<h1>Chapter {chapter}</h1>");
        for idx in 0..paragraphs {
            html.push_str(&format!(
                "<p>Paragraph {idx} of chapter {chapter}. {}</p>",
                "The quick brown fox jumps over the lazy dog. ".repeat(4)
            ));
        }
        html
    }

    fn mounted(settings: LayoutSettings, chapters: &[usize]) -> SimulatedSurface {
        let mut surface = SimulatedSurface::new(settings);
        for &chapter in chapters {
            surface.mount_chapter(&build_block_index(&chapter_html(chapter, 30), chapter));
        }
        surface
    }

    #[test]
    fn extents_are_ordered_and_disjoint() {
        let surface = mounted(LayoutSettings::continuous(), &[0, 1]);
        let extents = surface.block_extents();
        assert_eq!(extents.len(), 62);
        for pair in extents.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
        assert_eq!(extents[31].block_id.as_str(), "ch1-b0");
    }

    #[test]
    fn scroll_to_places_point_on_reference_line() {
        let mut surface = mounted(LayoutSettings::continuous(), &[0]);
        let id = BlockId::new(0, 20);
        assert!(surface.scroll_to(&id, 0.5, 0.25));
        let extent = surface.extent(&id).cloned().expect("extent");
        let viewport = surface.viewport();
        let reference = viewport.offset + 0.25 * viewport.extent;
        assert!((reference - (extent.start + 0.5 * extent.len())).abs() < 0.01);
        assert!(!surface.scroll_to(&BlockId::new(4, 0), 0.0, 0.25));
    }

    #[test]
    fn mounting_earlier_chapter_keeps_top_block() {
        let mut surface = mounted(LayoutSettings::continuous(), &[1]);
        surface.scroll_to(&BlockId::new(1, 10), 0.3, 0.0);
        let before = surface.top_anchor().expect("anchor");

        surface.mount_chapter(&build_block_index(&chapter_html(0, 30), 0));
        let after = surface.top_anchor().expect("anchor");
        assert_eq!(before.0, after.0);
        assert!((before.1 - after.1).abs() < 0.01);
        assert_eq!(surface.mounted_chapters(), vec![0, 1]);

        surface.unmount_chapter(0);
        assert_eq!(surface.top_anchor().map(|a| a.0), Some(before.0));
    }

    #[test]
    fn larger_font_keeps_top_block() {
        let mut surface = mounted(LayoutSettings::continuous(), &[0]);
        surface.scroll_to(&BlockId::new(0, 12), 0.0, 0.0);
        let content_before = surface.viewport().content_extent;
        surface.set_metrics(LayoutMetrics {
            font_size: 30.0,
            ..LayoutMetrics::default()
        });
        assert!(surface.viewport().content_extent > content_before);
        assert_eq!(
            surface.top_anchor().map(|a| a.0),
            Some(BlockId::new(0, 12))
        );
    }

    #[test]
    fn paginated_chapters_start_on_page_boundaries() {
        let mut surface = mounted(LayoutSettings::paginated(), &[0, 1]);
        let page = surface.viewport().extent;
        for span in &surface.spans {
            assert!((span.start / page - (span.start / page).round()).abs() < 1e-3);
        }
        assert!(surface.scroll_to_page(1, 1));
        assert_eq!(surface.page_index(), Some(1));
        assert!((surface.scroll_offset() % page).abs() < 1e-2);

        surface.prev_page();
        assert_eq!(surface.page_index(), Some(0));
        surface.prev_page();
        let last_of_first = surface.page_count(0).expect("pages") - 1;
        assert_eq!(surface.page_index(), Some(last_of_first));

        assert!(surface.scroll_to_chapter_start(1));
        assert_eq!(surface.page_index(), Some(0));
    }

    #[test]
    fn paginated_scroll_lands_on_page_holding_block() {
        let mut surface = mounted(LayoutSettings::paginated(), &[0]);
        let id = BlockId::new(0, 25);
        assert!(surface.scroll_to(&id, 0.0, 0.25));
        assert_eq!(surface.page_index(), surface.page_for_block(&id));
        let viewport = surface.viewport();
        let extent = surface.extent(&id).cloned().expect("extent");
        assert!(extent.start >= viewport.offset);
        assert!(extent.start < viewport.offset + viewport.extent);
    }

    #[test]
    fn continuous_surface_has_no_page_index() {
        let surface = mounted(LayoutSettings::continuous(), &[0]);
        assert_eq!(surface.page_index(), None);
    }

    #[test]
    fn rtl_horizontal_reports_negative_physical_offset() {
        let settings = LayoutSettings::continuous()
            .with_axis(ScrollAxis::Horizontal)
            .with_direction(ReadingDirection::Rtl);
        let mut surface = mounted(settings, &[0]);
        surface.scroll_by(500.0);
        assert_eq!(surface.scroll_offset(), 500.0);
        assert_eq!(surface.physical_scroll_offset(), -500.0);
        assert_eq!(surface.viewport().extent, 800.0);
    }

    #[test]
    fn offsets_are_clamped_to_content() {
        let mut surface = mounted(LayoutSettings::continuous(), &[0]);
        surface.set_scroll_offset(-40.0);
        assert_eq!(surface.scroll_offset(), 0.0);
        surface.set_scroll_offset(1e9);
        let viewport = surface.viewport();
        assert!((viewport.offset - (viewport.content_extent - viewport.extent)).abs() < 0.01);
    }
}
