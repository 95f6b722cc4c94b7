//! The render surface seam.
//!
//! A surface displays mounted chapters and reports geometry in logical
//! coordinates along its scroll axis: offsets grow in reading order
//! regardless of reading direction. Physical reflection for right-to-left
//! horizontal flow is the surface's own business.

use crate::blocks::{BlockId, BlockIndexMap};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    #[default]
    Continuous,
    Paginated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollAxis {
    #[default]
    Vertical,
    Horizontal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingDirection {
    #[default]
    Ltr,
    Rtl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LayoutSettings {
    pub mode: LayoutMode,
    pub axis: ScrollAxis,
    pub direction: ReadingDirection,
}

impl LayoutSettings {
    pub fn continuous() -> Self {
        Self::default()
    }

    pub fn paginated() -> Self {
        Self {
            mode: LayoutMode::Paginated,
            ..Self::default()
        }
    }

    pub fn with_axis(mut self, axis: ScrollAxis) -> Self {
        self.axis = axis;
        self
    }

    pub fn with_direction(mut self, direction: ReadingDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn is_paginated(&self) -> bool {
        self.mode == LayoutMode::Paginated
    }
}

/// Visible window along the scroll axis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub offset: f32,
    pub extent: f32,
    pub content_extent: f32,
}

/// Rendered span of one block along the scroll axis; `end` is exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockExtent {
    pub block_id: BlockId,
    pub chapter_index: usize,
    pub start: f32,
    pub end: f32,
}

impl BlockExtent {
    pub fn contains(&self, point: f32) -> bool {
        self.start <= point && point < self.end
    }

    pub fn len(&self) -> f32 {
        (self.end - self.start).max(0.0)
    }

    /// Position of `point` within the block, clamped to `0.0..=1.0`.
    pub fn fraction_at(&self, point: f32) -> f32 {
        let len = self.len();
        if len <= f32::EPSILON {
            return 0.0;
        }
        ((point - self.start) / len).clamp(0.0, 1.0)
    }
}

pub trait RenderSurface {
    fn layout(&self) -> LayoutSettings;

    /// Render a chapter. Mounting an already mounted chapter replaces it.
    fn mount_chapter(&mut self, index: &BlockIndexMap);

    fn unmount_chapter(&mut self, chapter_index: usize);

    fn mounted_chapters(&self) -> Vec<usize>;

    fn viewport(&self) -> Viewport;

    /// Extents of every rendered block, ordered by `start`.
    fn block_extents(&self) -> &[BlockExtent];

    fn has_block(&self, block_id: &BlockId) -> bool {
        self.block_extents()
            .iter()
            .any(|extent| &extent.block_id == block_id)
    }

    /// Scroll so the point `local_fraction` into the block sits at the
    /// reference line (continuous) or on the visible page (paginated).
    /// Returns `false` when the block is not rendered.
    fn scroll_to(&mut self, block_id: &BlockId, local_fraction: f32, reference_line: f32) -> bool;

    fn scroll_to_chapter_start(&mut self, chapter_index: usize) -> bool;

    fn scroll_to_page(&mut self, chapter_index: usize, page_index: usize) -> bool;

    /// Chapter-relative page of the current viewport; `None` when continuous.
    fn page_index(&self) -> Option<usize>;
}
