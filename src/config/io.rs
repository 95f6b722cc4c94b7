use super::models::PositionConfig;
use super::tables::ConfigTables;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Load configuration from disk, falling back to defaults on any error.
pub fn load_config(path: &Path) -> PositionConfig {
    let contents = match fs::read_to_string(path) {
        Ok(data) => {
            info!(path = %path.display(), "Loaded position config");
            data
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                "Falling back to default config: {err}"
            );
            return PositionConfig::default();
        }
    };

    match parse_config(&contents) {
        Ok(cfg) => {
            debug!("Parsed configuration from disk");
            cfg
        }
        Err(err) => {
            warn!(path = %path.display(), "Invalid config TOML: {err}");
            PositionConfig::default()
        }
    }
}

/// Parse the tabled layout first, then the flat layout. The result is
/// always sanitized.
pub fn parse_config(contents: &str) -> Result<PositionConfig, toml::de::Error> {
    match toml::from_str::<ConfigTables>(contents) {
        Ok(tables) => Ok(PositionConfig::from(tables).sanitized()),
        Err(tables_err) => match toml::from_str::<PositionConfig>(contents) {
            Ok(flat) => Ok(flat.sanitized()),
            Err(_) => Err(tables_err),
        },
    }
}

pub fn serialize_config(config: &PositionConfig) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&ConfigTables::from(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogLevel, SnippetMismatchPolicy};

    #[test]
    fn tabled_config_parses() {
        let cfg = parse_config(
            r#"
[tracking]
dwell_ms = 200
reference_line = 0.3

[saving]
save_debounce_ms = 1500

[restoration]
snippet_mismatch = "downgrade"

[logging]
log_level = "debug"
"#,
        )
        .expect("tabled config");
        assert_eq!(cfg.dwell_ms, 200);
        assert!((cfg.reference_line - 0.3).abs() < f32::EPSILON);
        assert_eq!(cfg.save_debounce_ms, 1500);
        assert_eq!(cfg.settle_ms, 400);
        assert_eq!(cfg.snippet_mismatch, SnippetMismatchPolicy::Downgrade);
        assert_eq!(cfg.log_level, LogLevel::Debug);
    }

    #[test]
    fn flat_config_still_accepted() {
        let cfg = parse_config("save_debounce_ms = 5000\ncache_dir = \"/tmp/progress\"\n")
            .expect("flat config");
        assert_eq!(cfg.save_debounce_ms, 5000);
        assert_eq!(cfg.cache_dir, "/tmp/progress");
        assert_eq!(cfg.dwell_ms, 150);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let cfg = parse_config(
            "[tracking]\nreference_line = 4.0\n\
             [saving]\nsave_debounce_ms = 1\n\
             [restoration]\nsnippet_len = 0\n",
        )
        .expect("clamped config");
        assert_eq!(cfg.reference_line, 1.0);
        assert_eq!(cfg.save_debounce_ms, 100);
        assert_eq!(cfg.snippet_len, 8);
    }

    #[test]
    fn serialized_config_reloads() {
        let cfg = PositionConfig {
            dwell_ms: 90,
            preload_chapters: 2,
            log_level: LogLevel::Warn,
            ..PositionConfig::default()
        };
        let text = serialize_config(&cfg).expect("serialize");
        assert!(text.contains("[tracking]"));
        assert_eq!(parse_config(&text).expect("reload"), cfg);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&dir.path().join("absent.toml"));
        assert_eq!(cfg, PositionConfig::default());
    }

    #[test]
    fn invalid_toml_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[tracking\ndwell_ms = ").expect("write");
        assert_eq!(load_config(&path), PositionConfig::default());
    }
}
