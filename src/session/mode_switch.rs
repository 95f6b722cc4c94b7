//! Layout switches and reflow remounts.
//!
//! The canonical position is layout-independent, so a switch is: flush,
//! read the persisted position back, tear down the old surface and tracker,
//! mount the same chapters on the new surface and restore from scratch.

use super::{ReadingSession, load_saved_position};
use crate::content::ContentProvider;
use crate::restore::{RestorationEngine, RestoreConfig};
use crate::scheduler::SaveOutcome;
use crate::surface::{LayoutSettings, RenderSurface};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PositionSource {
    /// Read back from the store after the flush.
    Persisted,
    /// The store had nothing usable or the flush failed; the in-memory
    /// position was used.
    LastKnown,
    /// No position at all; chapter and page only.
    ChapterFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModeSwitchReport {
    pub from: LayoutSettings,
    pub to: LayoutSettings,
    pub flush: SaveOutcome,
    pub source: PositionSource,
    pub chapter_index: usize,
}

impl<S: RenderSurface, C: ContentProvider> ReadingSession<S, C> {
    /// Replace the render surface and restore the reader's place on it.
    ///
    /// Also used for reflows (font, margins, viewport) that keep the same
    /// layout settings. Returns the outgoing surface.
    pub async fn switch_layout(&mut self, surface: S, now: Instant) -> (ModeSwitchReport, S) {
        let from = self.surface.layout();
        let to = surface.layout();
        info!(book = %self.book_id, ?from, ?to, "Switching layout");

        let flush = self.scheduler.save_now().await;
        let fallback_chapter = self.current_chapter;
        let fallback_page = self.surface.page_index();
        // After a failed flush the store lags behind the reader.
        let unsaved = match &flush {
            SaveOutcome::Failed(_) => self.scheduler.pending().or_else(|| self.current.clone()),
            _ => None,
        };
        let persisted = match unsaved {
            Some(_) => None,
            None => load_saved_position(self.store.as_ref(), &self.book_id).await,
        };
        let (position, source) = match (unsaved, persisted) {
            (Some(position), _) => (Some(position), PositionSource::LastKnown),
            (None, Some(position)) => (Some(position), PositionSource::Persisted),
            (None, None) => match self.scheduler.last_persisted().or_else(|| self.current.clone()) {
                Some(position) => (Some(position), PositionSource::LastKnown),
                None => (None, PositionSource::ChapterFallback),
            },
        };
        debug!(?source, "Position for layout switch");

        self.tracker.stop();
        while self.signals_rx.try_recv().is_ok() {}
        for chapter in self.surface.mounted_chapters() {
            self.surface.unmount_chapter(chapter);
        }
        let outgoing = std::mem::replace(&mut self.surface, surface);
        for index in self.indexes.values() {
            self.surface.mount_chapter(index);
        }

        let restore_config = RestoreConfig::from(&self.config);
        self.restoration = match position {
            Some(position) => RestorationEngine::new(Some(position), restore_config),
            None => RestorationEngine::for_chapter(fallback_chapter, fallback_page, restore_config),
        };
        self.pending_navigation = None;
        self.start_restoration(now);

        let report = ModeSwitchReport {
            from,
            to,
            flush,
            source,
            chapter_index: self.current_chapter,
        };
        (report, outgoing)
    }
}
