use super::defaults;
use super::models::{LogLevel, PositionConfig, SnippetMismatchPolicy};
use serde::Deserialize;

/// On-disk layout of `config.toml`, grouped into tables.
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub(super) struct ConfigTables {
    #[serde(default)]
    tracking: TrackingConfig,
    #[serde(default)]
    saving: SavingConfig,
    #[serde(default)]
    restoration: RestorationConfig,
    #[serde(default)]
    content: ContentConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

impl From<ConfigTables> for PositionConfig {
    fn from(tables: ConfigTables) -> Self {
        PositionConfig {
            dwell_ms: tables.tracking.dwell_ms,
            reference_line: tables.tracking.reference_line,
            save_debounce_ms: tables.saving.save_debounce_ms,
            settle_ms: tables.restoration.settle_ms,
            snippet_len: tables.restoration.snippet_len,
            snippet_mismatch: tables.restoration.snippet_mismatch,
            preload_chapters: tables.content.preload_chapters,
            cache_dir: tables.storage.cache_dir,
            log_level: tables.logging.log_level,
        }
    }
}

impl From<&PositionConfig> for ConfigTables {
    fn from(config: &PositionConfig) -> Self {
        ConfigTables {
            tracking: TrackingConfig {
                dwell_ms: config.dwell_ms,
                reference_line: config.reference_line,
            },
            saving: SavingConfig {
                save_debounce_ms: config.save_debounce_ms,
            },
            restoration: RestorationConfig {
                settle_ms: config.settle_ms,
                snippet_len: config.snippet_len,
                snippet_mismatch: config.snippet_mismatch,
            },
            content: ContentConfig {
                preload_chapters: config.preload_chapters,
            },
            storage: StorageConfig {
                cache_dir: config.cache_dir.clone(),
            },
            logging: LoggingConfig {
                log_level: config.log_level,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct TrackingConfig {
    #[serde(default = "defaults::default_dwell_ms")]
    dwell_ms: u64,
    #[serde(default = "defaults::default_reference_line")]
    reference_line: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            dwell_ms: defaults::default_dwell_ms(),
            reference_line: defaults::default_reference_line(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct SavingConfig {
    #[serde(default = "defaults::default_save_debounce_ms")]
    save_debounce_ms: u64,
}

impl Default for SavingConfig {
    fn default() -> Self {
        SavingConfig {
            save_debounce_ms: defaults::default_save_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct RestorationConfig {
    #[serde(default = "defaults::default_settle_ms")]
    settle_ms: u64,
    #[serde(default = "defaults::default_snippet_len")]
    snippet_len: usize,
    #[serde(default = "defaults::default_snippet_mismatch")]
    snippet_mismatch: SnippetMismatchPolicy,
}

impl Default for RestorationConfig {
    fn default() -> Self {
        RestorationConfig {
            settle_ms: defaults::default_settle_ms(),
            snippet_len: defaults::default_snippet_len(),
            snippet_mismatch: defaults::default_snippet_mismatch(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct ContentConfig {
    #[serde(default = "defaults::default_preload_chapters")]
    preload_chapters: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        ContentConfig {
            preload_chapters: defaults::default_preload_chapters(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct StorageConfig {
    #[serde(default = "defaults::default_cache_dir")]
    cache_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            cache_dir: defaults::default_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    log_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: defaults::default_log_level(),
        }
    }
}
