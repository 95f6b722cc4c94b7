use super::models::{LogLevel, SnippetMismatchPolicy};

pub(crate) fn default_dwell_ms() -> u64 {
    150
}

pub(crate) fn default_reference_line() -> f32 {
    0.25
}

pub(crate) fn default_save_debounce_ms() -> u64 {
    3000
}

pub(crate) fn default_settle_ms() -> u64 {
    400
}

pub(crate) fn default_snippet_len() -> usize {
    40
}

pub(crate) fn default_snippet_mismatch() -> SnippetMismatchPolicy {
    SnippetMismatchPolicy::Advisory
}

pub(crate) fn default_preload_chapters() -> usize {
    1
}

pub(crate) fn default_cache_dir() -> String {
    ".cache".to_string()
}

pub(crate) fn default_log_level() -> LogLevel {
    LogLevel::Info
}
