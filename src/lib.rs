//! Reading-position tracking and restoration for reflowable books.
//!
//! Positions are anchored to stable content blocks (`ch{chapter}-b{order}`)
//! rather than to scroll offsets or pages, so a reader's place survives
//! reflows, font changes and switches between scrolling and paginated
//! layouts. The pieces:
//! - [`blocks`] segments chapter markup into addressable blocks.
//! - [`tracker`] reports the block under the reading line of a surface.
//! - [`scheduler`] debounces and serializes saves through a [`cache::ProgressStore`].
//! - [`restore`] walks the fallback tiers to put the reader back.
//! - [`session`] ties them together for one open book.

pub mod blocks;
pub mod cache;
pub mod config;
pub mod content;
pub mod layout;
pub mod position;
pub mod progress;
pub mod restore;
pub mod scheduler;
pub mod session;
pub mod surface;
pub mod text_utils;
pub mod tracker;

pub use blocks::{Block, BlockId, BlockIndexMap, BlockKind, build_block_index};
pub use cache::{FileProgressStore, MemoryProgressStore, ProgressStore};
pub use config::{LogLevel, PositionConfig, SnippetMismatchPolicy, load_config};
pub use content::{ContentProvider, DirectoryContentProvider, MemoryContent};
pub use layout::SimulatedSurface;
pub use position::{PositionError, PositionRecord, ReadingPosition};
pub use progress::{BookStats, Progress};
pub use restore::{RestorationOutcome, RestorationState, RestoreTier};
pub use scheduler::{ForceSaveHandle, SaveOutcome, SaveScheduler};
pub use session::{ModeSwitchReport, PositionSource, ReadingSession};
pub use surface::{LayoutMode, LayoutSettings, ReadingDirection, RenderSurface, ScrollAxis};
pub use tracker::{ActiveBlock, ActiveBlockTracker};
