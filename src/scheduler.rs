//! Debounced, coalescing persistence of the reading position.
//!
//! Every active-block change schedules a save; only the newest position is
//! written once the debounce period passes without another schedule. Writes
//! for one book go through a single gate and take the pending value inside
//! it, so the store never sees positions out of order.

use crate::cache::ProgressStore;
use crate::position::{PositionError, ReadingPosition};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    NothingPending,
    Failed(String),
}

#[derive(Debug, Default)]
struct SchedulerState {
    pending: Option<ReadingPosition>,
    last_persisted: Option<ReadingPosition>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl SchedulerState {
    fn disarm(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Shared {
    book_id: String,
    store: Arc<dyn ProgressStore>,
    state: Mutex<SchedulerState>,
    write_gate: tokio::sync::Mutex<()>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn flush(&self) -> SaveOutcome {
        let _gate = self.write_gate.lock().await;
        let Some(position) = self.state().pending.take() else {
            trace!(book = %self.book_id, "Nothing pending to save");
            return SaveOutcome::NothingPending;
        };

        match self
            .store
            .save_progress(&self.book_id, &position.to_record())
            .await
        {
            Ok(()) => {
                info!(
                    book = %self.book_id,
                    chapter = position.chapter_index,
                    block = position.block_id().map(|id| id.as_str()).unwrap_or("-"),
                    total_progress = position.total_progress,
                    "Reading position saved"
                );
                self.state().last_persisted = Some(position);
                SaveOutcome::Saved
            }
            Err(err) => {
                warn!(book = %self.book_id, "Failed to save reading position: {err:#}");
                let mut state = self.state();
                if state.pending.is_none() {
                    state.pending = Some(position);
                }
                SaveOutcome::Failed(format!("{err:#}"))
            }
        }
    }
}

/// One scheduler per open book.
pub struct SaveScheduler {
    shared: Arc<Shared>,
    debounce: Duration,
}

impl std::fmt::Debug for SaveScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveScheduler")
            .field("book_id", &self.shared.book_id)
            .field("debounce", &self.debounce)
            .finish()
    }
}

impl SaveScheduler {
    pub fn new(
        book_id: impl Into<String>,
        store: Arc<dyn ProgressStore>,
        debounce: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                book_id: book_id.into(),
                store,
                state: Mutex::new(SchedulerState::default()),
                write_gate: tokio::sync::Mutex::new(()),
            }),
            debounce,
        }
    }

    pub fn book_id(&self) -> &str {
        &self.shared.book_id
    }

    /// Replace the pending position and restart the debounce timer.
    /// Positions without any usable anchor are rejected and never persisted.
    pub fn schedule_save(&self, position: ReadingPosition) -> Result<(), PositionError> {
        if let Err(err) = position.validate() {
            warn!(book = %self.shared.book_id, "Rejected position: {err}");
            return Err(err);
        }
        let mut state = self.shared.state();
        state.disarm();
        state.pending = Some(position);
        let generation = state.generation;

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(
                    book = %self.shared.book_id,
                    "No async runtime; position stays pending until save_now"
                );
                return Ok(());
            }
        };
        let shared = Arc::clone(&self.shared);
        let debounce = self.debounce;
        state.timer = Some(handle.spawn(async move {
            tokio::time::sleep(debounce).await;
            if shared.state().generation != generation {
                return;
            }
            // Detached so a later reschedule cannot abort a write in progress.
            tokio::spawn(async move {
                shared.flush().await;
            });
        }));
        trace!(book = %self.shared.book_id, generation, "Save scheduled");
        Ok(())
    }

    /// Cancel the timer and write the pending position, if any. Waits for
    /// any write already in flight.
    pub async fn save_now(&self) -> SaveOutcome {
        self.shared.state().disarm();
        self.shared.flush().await
    }

    /// Drop the timer and the pending position without writing.
    pub fn cancel(&self) {
        let mut state = self.shared.state();
        state.disarm();
        if state.pending.take().is_some() {
            debug!(book = %self.shared.book_id, "Pending save cancelled");
        }
    }

    pub fn pending(&self) -> Option<ReadingPosition> {
        self.shared.state().pending.clone()
    }

    pub fn has_pending(&self) -> bool {
        self.shared.state().pending.is_some()
    }

    pub fn last_persisted(&self) -> Option<ReadingPosition> {
        self.shared.state().last_persisted.clone()
    }

    /// Seed the last persisted position, e.g. with the record read at open.
    pub fn set_last_persisted(&self, position: Option<ReadingPosition>) {
        self.shared.state().last_persisted = position;
    }

    pub fn force_save_handle(&self) -> ForceSaveHandle {
        ForceSaveHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for SaveScheduler {
    fn drop(&mut self) {
        self.shared.state().disarm();
    }
}

/// Cloneable flush trigger for the host shell (backgrounding, shutdown).
#[derive(Clone)]
pub struct ForceSaveHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ForceSaveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForceSaveHandle")
            .field("book_id", &self.shared.book_id)
            .finish()
    }
}

impl ForceSaveHandle {
    pub async fn save_now(&self) -> SaveOutcome {
        self.shared.state().disarm();
        self.shared.flush().await
    }
}
