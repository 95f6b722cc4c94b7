use serde::Deserialize;
use std::time::Duration;

/// Limits applied after loading so a hand-edited file cannot wedge a session.
pub(crate) const MAX_DWELL_MS: u64 = 2_000;
pub(crate) const MIN_SAVE_DEBOUNCE_MS: u64 = 100;
pub(crate) const MAX_SAVE_DEBOUNCE_MS: u64 = 60_000;
pub(crate) const MAX_SETTLE_MS: u64 = 5_000;
pub(crate) const MIN_SNIPPET_LEN: usize = 8;
pub(crate) const MAX_SNIPPET_LEN: usize = 200;
pub(crate) const MAX_PRELOAD_CHAPTERS: usize = 8;

/// Flat runtime configuration; deserializable from TOML.
#[derive(Debug, Clone, PartialEq, Deserialize, serde::Serialize)]
pub struct PositionConfig {
    #[serde(default = "crate::config::defaults::default_dwell_ms")]
    pub dwell_ms: u64,
    #[serde(default = "crate::config::defaults::default_reference_line")]
    pub reference_line: f32,
    #[serde(default = "crate::config::defaults::default_save_debounce_ms")]
    pub save_debounce_ms: u64,
    #[serde(default = "crate::config::defaults::default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "crate::config::defaults::default_snippet_len")]
    pub snippet_len: usize,
    #[serde(default = "crate::config::defaults::default_snippet_mismatch")]
    pub snippet_mismatch: SnippetMismatchPolicy,
    #[serde(default = "crate::config::defaults::default_preload_chapters")]
    pub preload_chapters: usize,
    #[serde(default = "crate::config::defaults::default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "crate::config::defaults::default_log_level")]
    pub log_level: LogLevel,
}

impl Default for PositionConfig {
    fn default() -> Self {
        PositionConfig {
            dwell_ms: crate::config::defaults::default_dwell_ms(),
            reference_line: crate::config::defaults::default_reference_line(),
            save_debounce_ms: crate::config::defaults::default_save_debounce_ms(),
            settle_ms: crate::config::defaults::default_settle_ms(),
            snippet_len: crate::config::defaults::default_snippet_len(),
            snippet_mismatch: crate::config::defaults::default_snippet_mismatch(),
            preload_chapters: crate::config::defaults::default_preload_chapters(),
            cache_dir: crate::config::defaults::default_cache_dir(),
            log_level: crate::config::defaults::default_log_level(),
        }
    }
}

impl PositionConfig {
    /// Clamp every value into its supported range.
    pub fn sanitized(mut self) -> Self {
        self.dwell_ms = self.dwell_ms.min(MAX_DWELL_MS);
        self.reference_line = if self.reference_line.is_finite() {
            self.reference_line.clamp(0.0, 1.0)
        } else {
            crate::config::defaults::default_reference_line()
        };
        self.save_debounce_ms = self
            .save_debounce_ms
            .clamp(MIN_SAVE_DEBOUNCE_MS, MAX_SAVE_DEBOUNCE_MS);
        self.settle_ms = self.settle_ms.min(MAX_SETTLE_MS);
        self.snippet_len = self.snippet_len.clamp(MIN_SNIPPET_LEN, MAX_SNIPPET_LEN);
        self.preload_chapters = self.preload_chapters.min(MAX_PRELOAD_CHAPTERS);
        if self.cache_dir.trim().is_empty() {
            self.cache_dir = crate::config::defaults::default_cache_dir();
        }
        self
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// What tier-1 restoration does when the saved context snippet no longer
/// matches the text at the saved block.
#[derive(Debug, Clone, Copy, Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SnippetMismatchPolicy {
    /// Log and flag the mismatch, keep the block match.
    #[default]
    Advisory,
    /// Prefer a text-search match; keep the block match only if none exists.
    Downgrade,
}

impl std::fmt::Display for SnippetMismatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SnippetMismatchPolicy::Advisory => "advisory",
            SnippetMismatchPolicy::Downgrade => "downgrade",
        };
        write!(f, "{}", label)
    }
}

/// Supported logging verbosity levels.
#[derive(Debug, Clone, Copy, Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
