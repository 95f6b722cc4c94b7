//! Configuration loading for the reading-position core.
//!
//! All tunables (dwell, debounce, settle delay, snippet handling, storage
//! location, log level) are centralized here and loaded from
//! `conf/config.toml` if present. Missing or invalid entries fall back to
//! defaults so a session can always start.

mod defaults;
mod io;
mod models;
mod tables;

pub use io::{load_config, parse_config, serialize_config};
pub use models::{LogLevel, PositionConfig, SnippetMismatchPolicy};
