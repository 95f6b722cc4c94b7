//! A reading session for one open book.
//!
//! The session owns the render surface, the block indexes of the mounted
//! chapters, the tracker, the save scheduler and the restoration engine,
//! and is driven by host events: viewport changes, chapter loads and clock
//! ticks. Tracker signals are queued on a channel and drained after every
//! event, so stale or gated signals can be dropped in one place.

mod mode_switch;

pub use mode_switch::{ModeSwitchReport, PositionSource};

use crate::blocks::{BlockIndexMap, build_block_index};
use crate::cache::ProgressStore;
use crate::config::PositionConfig;
use crate::content::{ContentProvider, preload_window};
use crate::position::{BlockAnchor, ReadingPosition};
use crate::progress::BookStats;
use crate::restore::{RestorationEngine, RestorationOutcome, RestorationState, RestoreConfig};
use crate::scheduler::{ForceSaveHandle, SaveOutcome, SaveScheduler};
use crate::surface::RenderSurface;
use crate::tracker::{ActiveBlock, ActiveBlockTracker, TrackerConfig};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub type PositionListener = Box<dyn FnMut(&ReadingPosition) + Send>;
pub type ChapterListener = Box<dyn FnMut(usize) + Send>;

pub struct ReadingSession<S: RenderSurface, C: ContentProvider> {
    book_id: String,
    config: PositionConfig,
    store: Arc<dyn ProgressStore>,
    surface: S,
    content: C,
    stats: BookStats,
    indexes: BTreeMap<usize, BlockIndexMap>,
    tracker: ActiveBlockTracker,
    tracker_generation: u64,
    signals_tx: UnboundedSender<ActiveBlock>,
    signals_rx: UnboundedReceiver<ActiveBlock>,
    scheduler: SaveScheduler,
    restoration: RestorationEngine,
    current: Option<ReadingPosition>,
    current_chapter: usize,
    pending_navigation: Option<usize>,
    position_listeners: Vec<PositionListener>,
    chapter_listeners: Vec<ChapterListener>,
}

impl<S: RenderSurface, C: ContentProvider> ReadingSession<S, C> {
    /// Open a book: read the saved position once, load the chapters around
    /// it and start restoring.
    pub async fn open(
        book_id: impl Into<String>,
        config: PositionConfig,
        store: Arc<dyn ProgressStore>,
        surface: S,
        content: C,
        now: Instant,
    ) -> Self {
        let book_id = book_id.into();
        let saved = load_saved_position(store.as_ref(), &book_id).await;
        let stats = content.stats();
        let scheduler =
            SaveScheduler::new(book_id.clone(), Arc::clone(&store), config.save_debounce());
        scheduler.set_last_persisted(saved.clone());
        let restoration = RestorationEngine::new(saved, RestoreConfig::from(&config));
        let (signals_tx, signals_rx) = unbounded_channel();

        info!(
            book = %book_id,
            chapters = content.chapter_count(),
            total_chars = stats.total_length,
            has_saved = restoration.position().is_some(),
            "Opening reading session"
        );

        let mut session = Self {
            book_id,
            tracker: ActiveBlockTracker::new(TrackerConfig::from(&config)),
            config,
            store,
            surface,
            content,
            stats,
            indexes: BTreeMap::new(),
            tracker_generation: 0,
            signals_tx,
            signals_rx,
            scheduler,
            restoration,
            current: None,
            current_chapter: 0,
            pending_navigation: None,
            position_listeners: Vec::new(),
            chapter_listeners: Vec::new(),
        };
        session.start_restoration(now);
        session
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    pub fn config(&self) -> &PositionConfig {
        &self.config
    }

    pub fn current_position(&self) -> Option<&ReadingPosition> {
        self.current.as_ref()
    }

    pub fn current_chapter(&self) -> usize {
        self.current_chapter
    }

    pub fn restoration_state(&self) -> RestorationState {
        self.restoration.state()
    }

    pub fn restoration_outcome(&self) -> Option<&RestorationOutcome> {
        self.restoration.outcome()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    /// Mutable surface access for host-driven scrolling. Follow up with
    /// [`ReadingSession::on_viewport_changed`].
    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn content_mut(&mut self) -> &mut C {
        &mut self.content
    }

    pub fn block_index(&self, chapter_index: usize) -> Option<&BlockIndexMap> {
        self.indexes.get(&chapter_index)
    }

    pub fn stats(&self) -> &BookStats {
        &self.stats
    }

    pub fn on_position_update(&mut self, listener: impl FnMut(&ReadingPosition) + Send + 'static) {
        self.position_listeners.push(Box::new(listener));
    }

    pub fn on_chapter_change(&mut self, listener: impl FnMut(usize) + Send + 'static) {
        self.chapter_listeners.push(Box::new(listener));
    }

    pub fn force_save_handle(&self) -> ForceSaveHandle {
        self.scheduler.force_save_handle()
    }

    pub fn last_persisted(&self) -> Option<ReadingPosition> {
        self.scheduler.last_persisted()
    }

    /// Mount whatever the provider has ready in the preload window and drop
    /// chapters that left it.
    pub fn sync_content(&mut self, now: Instant) {
        let window = self.window();
        let stale: Vec<usize> = self
            .indexes
            .keys()
            .copied()
            .filter(|idx| !window.contains(idx))
            .collect();
        for idx in stale {
            self.indexes.remove(&idx);
            self.surface.unmount_chapter(idx);
            debug!(chapter = idx, "Unmounted chapter outside preload window");
        }
        for idx in window {
            if !self.indexes.contains_key(&idx) {
                self.on_chapter_loaded(idx, now);
            }
        }
    }

    /// A chapter finished loading: index it, mount it, and let a waiting
    /// restoration or navigation proceed.
    pub fn on_chapter_loaded(&mut self, chapter_index: usize, now: Instant) {
        if !self.window().contains(&chapter_index) {
            debug!(chapter = chapter_index, "Dropping load for chapter outside preload window");
            return;
        }
        let Some(html) = self.content.chapter_html(chapter_index) else {
            if !self.content.is_loading(chapter_index) {
                debug!(chapter = chapter_index, "Chapter content unavailable");
            }
            return;
        };
        let index = build_block_index(&html, chapter_index);
        debug!(chapter = chapter_index, blocks = index.len(), "Mounting chapter");
        self.surface.mount_chapter(&index);
        self.indexes.insert(chapter_index, index);

        if self.restoration.state() == RestorationState::AwaitingContent {
            self.run_restoration(now);
        }
        if self.pending_navigation == Some(chapter_index) && self.restoration.is_active() {
            self.finish_navigation(chapter_index, now);
        }
    }

    pub fn on_viewport_changed(&mut self, now: Instant) {
        self.advance_restoration(now);
        self.tracker.observe(&self.surface, now);
        self.drain_signals(now);
    }

    /// Clock tick: settles restoration and lets the tracker's dwell elapse.
    pub fn tick(&mut self, now: Instant) {
        self.advance_restoration(now);
        self.tracker.poll(now);
        self.drain_signals(now);
    }

    /// Jump to the start of a chapter. Deferred while restoring or while the
    /// chapter is still loading. Returns `false` for chapters past the end.
    pub fn navigate_to_chapter(&mut self, chapter_index: usize, now: Instant) -> bool {
        if chapter_index >= self.content.chapter_count() {
            warn!(chapter = chapter_index, "Navigation target out of range");
            return false;
        }
        self.pending_navigation = Some(chapter_index);
        if !self.restoration.is_active() {
            debug!(chapter = chapter_index, "Navigation deferred until restoration settles");
            return true;
        }
        self.set_current_chapter(chapter_index);
        self.content
            .load_chapters_around(chapter_index, self.config.preload_chapters);
        self.sync_content(now);
        if self.indexes.contains_key(&chapter_index) && self.pending_navigation.is_some() {
            self.finish_navigation(chapter_index, now);
        }
        true
    }

    /// Flush on visibility loss. Returns the flush outcome when hidden.
    pub async fn on_visibility_change(&mut self, visible: bool) -> Option<SaveOutcome> {
        if visible {
            return None;
        }
        debug!(book = %self.book_id, "Session hidden; flushing position");
        Some(self.scheduler.save_now().await)
    }

    pub async fn save_now(&self) -> SaveOutcome {
        self.scheduler.save_now().await
    }

    /// Stop tracking and flush. The session is consumed.
    pub async fn close(mut self) -> SaveOutcome {
        self.tracker.stop();
        self.signals_rx.close();
        let outcome = self.scheduler.save_now().await;
        info!(book = %self.book_id, ?outcome, "Closed reading session");
        outcome
    }

    fn window(&self) -> std::ops::RangeInclusive<usize> {
        preload_window(
            self.current_chapter,
            self.config.preload_chapters,
            self.content.chapter_count(),
        )
    }

    /// Arm a paused tracker run and begin restoring. Shared by open and
    /// layout switches.
    fn start_restoration(&mut self, now: Instant) {
        let tx = self.signals_tx.clone();
        self.tracker_generation = self.tracker.start(Box::new(move |block| {
            let _ = tx.send(block);
        }));
        self.tracker.pause();

        self.restoration.begin(self.content.chapter_count());
        self.current_chapter = self.restoration.target_chapter();
        self.content
            .load_chapters_around(self.current_chapter, self.config.preload_chapters);
        self.sync_content(now);
        if self.restoration.state() == RestorationState::AwaitingContent {
            self.run_restoration(now);
        }
    }

    fn run_restoration(&mut self, now: Instant) {
        let target = self.restoration.target_chapter();
        let Some(index) = self.indexes.get(&target) else {
            return;
        };
        let outcome = self
            .restoration
            .on_content(index, &mut self.surface, &self.stats, now)
            .cloned();
        let Some(outcome) = outcome else {
            return;
        };
        if outcome.upgraded {
            if let Some(restored) = outcome.restored {
                if let Err(err) = self.scheduler.schedule_save(restored) {
                    warn!(book = %self.book_id, "Upgraded position not scheduled: {err}");
                }
            }
        }
    }

    fn advance_restoration(&mut self, now: Instant) {
        if !self.restoration.poll(now) {
            return;
        }
        let restored = self
            .restoration
            .outcome()
            .and_then(|outcome| outcome.restored.clone());
        match restored {
            Some(position) => {
                if let Some(block_id) = position.block_id() {
                    self.tracker.resume_at(block_id.clone());
                } else {
                    self.tracker.resume();
                }
                self.set_current_chapter(position.chapter_index);
                self.publish(position);
            }
            None => {
                self.tracker.resume();
                self.tracker.refresh(&self.surface, now);
            }
        }
        if let Some(chapter) = self.pending_navigation {
            self.navigate_to_chapter(chapter, now);
        }
    }

    fn finish_navigation(&mut self, chapter_index: usize, now: Instant) {
        self.pending_navigation = None;
        if self.surface.scroll_to_chapter_start(chapter_index) {
            info!(chapter = chapter_index, "Navigated to chapter");
            self.tracker.refresh(&self.surface, now);
            self.drain_signals(now);
        }
    }

    fn drain_signals(&mut self, now: Instant) {
        while let Ok(signal) = self.signals_rx.try_recv() {
            self.handle_signal(signal, now);
        }
    }

    fn handle_signal(&mut self, signal: ActiveBlock, now: Instant) {
        if signal.generation != self.tracker_generation {
            debug!(
                block = %signal.block_id,
                generation = signal.generation,
                "Dropping signal from a previous tracker run"
            );
            return;
        }
        if self.restoration.gates_tracker() {
            debug!(block = %signal.block_id, "Dropping signal during restoration");
            return;
        }
        let Some(index) = self.indexes.get(&signal.chapter_index) else {
            debug!(chapter = signal.chapter_index, "Dropping signal for unloaded chapter");
            return;
        };
        let Some(block) = index.get(&signal.block_id) else {
            debug!(block = %signal.block_id, "Dropping signal for unknown block");
            return;
        };

        let local_offset = ((signal.local_fraction.clamp(0.0, 1.0) * block.clean_char_count as f32)
            .round() as usize)
            .min(block.clean_char_count);
        let chapter_char_offset = block.clean_char_start + local_offset;
        let snippet = index.snippet_at(block, local_offset, self.config.snippet_len);
        let anchor = BlockAnchor {
            block_id: block.id.clone(),
            local_offset,
            context_snippet: Some(snippet).filter(|snippet| !snippet.is_empty()),
        };
        let progress = self.stats.progress(signal.chapter_index, chapter_char_offset);
        let position = ReadingPosition::block_anchored(
            anchor,
            signal.chapter_index,
            chapter_char_offset,
            progress,
        )
        .with_page_index(self.surface.page_index());

        if signal.chapter_index != self.current_chapter {
            self.set_current_chapter(signal.chapter_index);
            self.content
                .load_chapters_around(signal.chapter_index, self.config.preload_chapters);
            self.sync_content(now);
        }
        if self.scheduler.schedule_save(position.clone()).is_ok() {
            self.publish(position);
        }
    }

    fn set_current_chapter(&mut self, chapter_index: usize) {
        if self.current_chapter == chapter_index {
            return;
        }
        debug!(from = self.current_chapter, to = chapter_index, "Chapter changed");
        self.current_chapter = chapter_index;
        for listener in &mut self.chapter_listeners {
            listener(chapter_index);
        }
    }

    fn publish(&mut self, position: ReadingPosition) {
        for listener in &mut self.position_listeners {
            listener(&position);
        }
        self.current = Some(position);
    }
}

/// Read the saved record once. Unreadable or malformed records count as
/// nothing saved.
async fn load_saved_position(store: &dyn ProgressStore, book_id: &str) -> Option<ReadingPosition> {
    let record = match store.get_progress(book_id).await {
        Ok(record) => record?,
        Err(err) => {
            warn!(book = %book_id, "Could not read saved position: {err:#}");
            return None;
        }
    };
    match ReadingPosition::try_from(record) {
        Ok(position) => Some(position),
        Err(err) => {
            warn!(book = %book_id, "Ignoring malformed saved position: {err}");
            None
        }
    }
}
