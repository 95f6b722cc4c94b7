//! Active-block tracking.
//!
//! The tracker turns raw viewport geometry into a stream of "the reader is
//! now on block X" signals. A candidate must stay active for the dwell
//! period before it is reported, so fast flings do not produce a signal per
//! block scrolled past. Time is passed in explicitly so the session's clock
//! (and tests) control stability checks.

use crate::blocks::BlockId;
use crate::config::PositionConfig;
use crate::surface::{BlockExtent, RenderSurface, Viewport};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    pub dwell: Duration,
    /// Fraction of the viewport, from its leading edge, that marks the
    /// reading line in continuous mode.
    pub reference_line: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::from(&PositionConfig::default())
    }
}

impl From<&PositionConfig> for TrackerConfig {
    fn from(config: &PositionConfig) -> Self {
        Self {
            dwell: config.dwell(),
            reference_line: config.reference_line,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveBlock {
    pub block_id: BlockId,
    pub chapter_index: usize,
    /// Portion of the block already passed by the reading line.
    pub local_fraction: f32,
    /// Tracker run that produced the signal.
    pub generation: u64,
}

pub type ActiveBlockCallback = Box<dyn FnMut(ActiveBlock) + Send>;

#[derive(Debug, Clone)]
struct Candidate {
    block: ActiveBlock,
    since: Instant,
}

pub struct ActiveBlockTracker {
    config: TrackerConfig,
    callback: Option<ActiveBlockCallback>,
    generation: u64,
    paused: bool,
    reported: Option<BlockId>,
    candidate: Option<Candidate>,
}

impl std::fmt::Debug for ActiveBlockTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveBlockTracker")
            .field("config", &self.config)
            .field("running", &self.callback.is_some())
            .field("generation", &self.generation)
            .field("paused", &self.paused)
            .field("reported", &self.reported)
            .finish()
    }
}

impl ActiveBlockTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            callback: None,
            generation: 0,
            paused: false,
            reported: None,
            candidate: None,
        }
    }

    pub fn config(&self) -> TrackerConfig {
        self.config
    }

    /// Begin a new run. Returns the run's generation.
    pub fn start(&mut self, callback: ActiveBlockCallback) -> u64 {
        self.generation += 1;
        self.callback = Some(callback);
        self.paused = false;
        self.reported = None;
        self.candidate = None;
        debug!(generation = self.generation, "Tracker started");
        self.generation
    }

    pub fn stop(&mut self) {
        if self.callback.take().is_some() {
            debug!(generation = self.generation, "Tracker stopped");
        }
        self.candidate = None;
    }

    pub fn is_running(&self) -> bool {
        self.callback.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Resume treating `block_id` as already reported, so the next signal is
    /// a genuine move away from it.
    pub fn resume_at(&mut self, block_id: BlockId) {
        self.paused = false;
        self.reported = Some(block_id);
        self.candidate = None;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn reported(&self) -> Option<&BlockId> {
        self.reported.as_ref()
    }

    /// Record the current geometry, then check stability.
    pub fn observe<S: RenderSurface + ?Sized>(
        &mut self,
        surface: &S,
        now: Instant,
    ) -> Option<ActiveBlock> {
        if self.callback.is_none() {
            return None;
        }
        match self.locate(surface) {
            Some(block) => match &mut self.candidate {
                Some(candidate) if candidate.block.block_id == block.block_id => {
                    candidate.block.local_fraction = block.local_fraction;
                }
                _ => {
                    trace!(block = %block.block_id, "New active-block candidate");
                    self.candidate = Some(Candidate { block, since: now });
                }
            },
            None => self.candidate = None,
        }
        self.poll(now)
    }

    /// Report the candidate if it has been stable for the dwell period.
    pub fn poll(&mut self, now: Instant) -> Option<ActiveBlock> {
        let candidate = self.candidate.as_ref()?;
        if now.saturating_duration_since(candidate.since) < self.config.dwell {
            return None;
        }
        let block = candidate.block.clone();
        self.emit(block)
    }

    /// Re-evaluate immediately, bypassing the dwell period.
    pub fn refresh<S: RenderSurface + ?Sized>(
        &mut self,
        surface: &S,
        now: Instant,
    ) -> Option<ActiveBlock> {
        if self.callback.is_none() {
            return None;
        }
        let block = self.locate(surface)?;
        self.candidate = Some(Candidate {
            block: block.clone(),
            since: now,
        });
        self.emit(block)
    }

    fn locate<S: RenderSurface + ?Sized>(&self, surface: &S) -> Option<ActiveBlock> {
        let extents = surface.block_extents();
        let viewport = surface.viewport();
        let paginated = surface.layout().is_paginated();
        // A page shows several blocks; the reported one holds while visible.
        let held = self
            .reported
            .as_ref()
            .filter(|_| paginated)
            .and_then(|id| visible_on_page(extents, viewport, id));
        let (extent, local_fraction) = match held {
            Some(extent) => (extent, extent.fraction_at(viewport.offset)),
            None => locate_active_block(extents, viewport, paginated, self.config.reference_line)?,
        };
        Some(ActiveBlock {
            block_id: extent.block_id.clone(),
            chapter_index: extent.chapter_index,
            local_fraction,
            generation: self.generation,
        })
    }

    fn emit(&mut self, block: ActiveBlock) -> Option<ActiveBlock> {
        if self.paused || self.reported.as_ref() == Some(&block.block_id) {
            return None;
        }
        let callback = self.callback.as_mut()?;
        debug!(
            block = %block.block_id,
            chapter = block.chapter_index,
            fraction = block.local_fraction,
            generation = block.generation,
            "Active block changed"
        );
        self.reported = Some(block.block_id.clone());
        callback(block.clone());
        Some(block)
    }
}

/// Block under the reading line, with the fraction of it already passed.
///
/// The reading line is `reference_line` into the viewport in continuous
/// mode and the page start in paginated mode. Falls back to the nearest
/// preceding block, then the first block. A paginated page whose start falls
/// between blocks resolves to the first block starting on that page.
pub fn locate_active_block(
    extents: &[BlockExtent],
    viewport: Viewport,
    paginated: bool,
    reference_line: f32,
) -> Option<(&BlockExtent, f32)> {
    let point = if paginated {
        viewport.offset
    } else {
        viewport.offset + reference_line.clamp(0.0, 1.0) * viewport.extent
    };
    if let Some(extent) = extents.iter().find(|extent| extent.contains(point)) {
        return Some((extent, extent.fraction_at(point)));
    }
    if paginated {
        let page_end = point + viewport.extent;
        if let Some(extent) = extents
            .iter()
            .find(|extent| extent.start >= point && extent.start < page_end)
        {
            return Some((extent, 0.0));
        }
    }
    extents
        .iter()
        .filter(|extent| extent.start <= point)
        .last()
        .map(|extent| (extent, 1.0))
        .or_else(|| extents.first().map(|extent| (extent, 0.0)))
}

fn visible_on_page<'a>(
    extents: &'a [BlockExtent],
    viewport: Viewport,
    block_id: &BlockId,
) -> Option<&'a BlockExtent> {
    let page_end = viewport.offset + viewport.extent;
    extents
        .iter()
        .find(|extent| &extent.block_id == block_id)
        .filter(|extent| extent.start < page_end && extent.end > viewport.offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::build_block_index;
    use crate::layout::SimulatedSurface;
    use crate::surface::LayoutSettings;
    use std::sync::{Arc, Mutex};

    fn surface(settings: LayoutSettings) -> SimulatedSurface {
        let mut html = String::new();
        for idx in 0..40 {
            html.push_str(&format!(
                "<p>Block {idx}. {}</p>",
                "Some words to give the block a few lines of height. ".repeat(3)
            ));
        }
        let mut surface = SimulatedSurface::new(settings);
        surface.mount_chapter(&build_block_index(&html, 0));
        surface
    }

    fn recording_tracker() -> (ActiveBlockTracker, Arc<Mutex<Vec<ActiveBlock>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut tracker = ActiveBlockTracker::new(TrackerConfig::default());
        tracker.start(Box::new(move |block| {
            sink.lock().expect("sink").push(block);
        }));
        (tracker, seen)
    }

    fn ids(seen: &Arc<Mutex<Vec<ActiveBlock>>>) -> Vec<String> {
        seen.lock()
            .expect("seen")
            .iter()
            .map(|block| block.block_id.to_string())
            .collect()
    }

    #[test]
    fn reports_only_after_dwell() {
        let mut surface = surface(LayoutSettings::continuous());
        let (mut tracker, seen) = recording_tracker();
        let t0 = Instant::now();

        surface.scroll_to(&BlockId::new(0, 10), 0.5, 0.25);
        assert!(tracker.observe(&surface, t0).is_none());
        assert!(tracker.poll(t0 + Duration::from_millis(100)).is_none());
        let reported = tracker.poll(t0 + Duration::from_millis(150)).expect("stable");
        assert_eq!(reported.block_id, BlockId::new(0, 10));
        assert!((reported.local_fraction - 0.5).abs() < 0.01);
        assert_eq!(ids(&seen), vec!["ch0-b10"]);

        // Same block again does not re-fire.
        assert!(tracker.poll(t0 + Duration::from_secs(5)).is_none());
        assert_eq!(seen.lock().expect("seen").len(), 1);
    }

    #[test]
    fn fling_past_blocks_reports_only_resting_block() {
        let mut surface = surface(LayoutSettings::continuous());
        let (mut tracker, seen) = recording_tracker();
        let t0 = Instant::now();

        for (step, order) in [3usize, 6, 9, 12].into_iter().enumerate() {
            surface.scroll_to(&BlockId::new(0, order), 0.1, 0.25);
            tracker.observe(&surface, t0 + Duration::from_millis(20 * step as u64));
        }
        tracker.poll(t0 + Duration::from_millis(60 + 150));
        assert_eq!(ids(&seen), vec!["ch0-b12"]);
    }

    #[test]
    fn paused_tracker_keeps_candidate_silent() {
        let mut surface = surface(LayoutSettings::continuous());
        let (mut tracker, seen) = recording_tracker();
        let t0 = Instant::now();

        tracker.pause();
        surface.scroll_to(&BlockId::new(0, 7), 0.0, 0.25);
        tracker.observe(&surface, t0);
        assert!(tracker.poll(t0 + Duration::from_secs(1)).is_none());
        assert!(seen.lock().expect("seen").is_empty());

        tracker.resume_at(BlockId::new(0, 7));
        tracker.observe(&surface, t0 + Duration::from_secs(2));
        assert!(tracker.poll(t0 + Duration::from_secs(3)).is_none());
        assert!(seen.lock().expect("seen").is_empty());
    }

    #[test]
    fn refresh_bypasses_dwell() {
        let mut surface = surface(LayoutSettings::continuous());
        let (mut tracker, seen) = recording_tracker();
        surface.scroll_to(&BlockId::new(0, 4), 0.2, 0.25);
        let block = tracker.refresh(&surface, Instant::now()).expect("refresh");
        assert_eq!(block.block_id, BlockId::new(0, 4));
        assert_eq!(ids(&seen), vec!["ch0-b4"]);
    }

    #[test]
    fn restart_bumps_generation_and_stop_silences() {
        let surface = surface(LayoutSettings::continuous());
        let (mut tracker, seen) = recording_tracker();
        assert_eq!(tracker.generation(), 1);
        let generation = tracker.start(Box::new(|_| {}));
        assert_eq!(generation, 2);
        let block = tracker.refresh(&surface, Instant::now()).expect("refresh");
        assert_eq!(block.generation, 2);
        assert!(seen.lock().expect("seen").is_empty());

        tracker.stop();
        assert!(!tracker.is_running());
        assert!(tracker.refresh(&surface, Instant::now()).is_none());
    }

    #[test]
    fn paginated_reference_is_page_start() {
        let mut surface = surface(LayoutSettings::paginated());
        surface.set_scroll_offset(0.0);
        let viewport = surface.viewport();
        let (extent, fraction) =
            locate_active_block(surface.block_extents(), viewport, true, 0.25).expect("block");
        assert_eq!(extent.block_id, BlockId::new(0, 0));
        assert_eq!(fraction, 0.0);

        surface.next_page();
        let viewport = surface.viewport();
        let (extent, _) =
            locate_active_block(surface.block_extents(), viewport, true, 0.25).expect("block");
        assert!(extent.start <= viewport.offset + viewport.extent);
        assert!(extent.end > viewport.offset);
    }

    #[test]
    fn paginated_page_holds_reported_block_until_it_leaves() {
        let mut surface = surface(LayoutSettings::paginated());
        let (mut tracker, seen) = recording_tracker();
        let t0 = Instant::now();

        surface.set_scroll_offset(0.0);
        let lower = surface
            .block_extents()
            .iter()
            .find(|extent| extent.start > 400.0)
            .map(|extent| extent.block_id.clone())
            .expect("block lower on the first page");
        tracker.resume_at(lower.clone());
        tracker.observe(&surface, t0);
        assert!(tracker.poll(t0 + Duration::from_millis(200)).is_none());
        assert!(tracker.refresh(&surface, t0 + Duration::from_millis(300)).is_none());
        assert_eq!(tracker.reported(), Some(&lower));

        surface.next_page();
        let page_start = surface.viewport().offset;
        tracker.observe(&surface, t0 + Duration::from_secs(1));
        let moved = tracker
            .poll(t0 + Duration::from_secs(2))
            .expect("new page reports");
        assert_ne!(moved.block_id, lower);
        let extent = surface
            .block_extents()
            .iter()
            .find(|extent| extent.block_id == moved.block_id)
            .expect("extent");
        assert!(extent.end > page_start);
        assert_eq!(ids(&seen), vec![moved.block_id.to_string()]);
    }

    #[test]
    fn gap_resolves_to_preceding_block() {
        let extents = vec![
            BlockExtent {
                block_id: BlockId::new(0, 0),
                chapter_index: 0,
                start: 0.0,
                end: 100.0,
            },
            BlockExtent {
                block_id: BlockId::new(0, 1),
                chapter_index: 0,
                start: 200.0,
                end: 300.0,
            },
        ];
        let viewport = Viewport {
            offset: 100.0,
            extent: 200.0,
            content_extent: 300.0,
        };
        let (extent, fraction) =
            locate_active_block(&extents, viewport, false, 0.25).expect("block");
        assert_eq!(extent.block_id, BlockId::new(0, 0));
        assert_eq!(fraction, 1.0);

        let before = Viewport { offset: -500.0, ..viewport };
        let (extent, _) = locate_active_block(&extents, before, false, 0.0).expect("block");
        assert_eq!(extent.block_id, BlockId::new(0, 0));
        assert!(locate_active_block(&[], viewport, false, 0.25).is_none());
    }
}
