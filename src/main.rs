//! `position-probe`: open a directory of chapter files, restore the saved
//! reading position, optionally scroll, then save and print the record.
//!
//! Responsibilities here are minimal:
//! - Parse command-line arguments.
//! - Load configuration from `conf/config.toml`.
//! - Drive one reading session against a simulated surface.

use anyhow::{Context, Result, anyhow, bail};
use lanternleaf_position::{
    DirectoryContentProvider, FileProgressStore, LayoutSettings, ReadingSession, ScrollAxis,
    SimulatedSurface, load_config,
};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

#[derive(Debug)]
struct ProbeArgs {
    chapters_dir: PathBuf,
    paginated: bool,
    horizontal: bool,
    scroll: Option<f32>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle).await {
        error!("{err:?}");
        std::process::exit(1);
    }
}

async fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let args = parse_args(env::args().skip(1))?;
    let config = load_config(Path::new("conf/config.toml"));
    set_log_level(reload_handle, config.log_level.as_filter_str());
    info!(
        path = %args.chapters_dir.display(),
        level = %config.log_level,
        "Starting position probe"
    );

    let content = DirectoryContentProvider::open(&args.chapters_dir)?;
    let book_id = content.book_id();
    let store = Arc::new(FileProgressStore::new(&config.cache_dir));

    let mut layout = if args.paginated {
        LayoutSettings::paginated()
    } else {
        LayoutSettings::continuous()
    };
    if args.horizontal {
        layout = layout.with_axis(ScrollAxis::Horizontal);
    }

    let settle = config.settle();
    let dwell = config.dwell();
    let mut session = ReadingSession::open(
        book_id,
        config,
        store,
        SimulatedSurface::new(layout),
        content,
        Instant::now(),
    )
    .await;
    if let Some(outcome) = session.restoration_outcome() {
        info!(
            tier = outcome.tier.number(),
            chapter = outcome.chapter_index,
            mismatch = outcome.snippet_mismatch,
            "Restoration resolved"
        );
    }
    tokio::time::sleep(settle).await;
    session.tick(Instant::now());

    if let Some(delta) = args.scroll {
        session.surface_mut().scroll_by(delta);
        session.on_viewport_changed(Instant::now());
        tokio::time::sleep(dwell).await;
        session.tick(Instant::now());
    }

    let position = session.current_position().cloned();
    let outcome = session.close().await;
    info!(?outcome, "Session closed");

    let record = position
        .map(|position| position.to_record())
        .ok_or_else(|| anyhow!("No reading position was established"))?;
    let json = serde_json::to_string_pretty(&record).context("Failed to encode position")?;
    println!("{json}");
    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<ProbeArgs> {
    let mut chapters_dir = None;
    let mut paginated = false;
    let mut horizontal = false;
    let mut scroll = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--paginated" => paginated = true,
            "--horizontal" => horizontal = true,
            "--scroll" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("--scroll needs a pixel amount"))?;
                scroll = Some(
                    value
                        .parse::<f32>()
                        .with_context(|| format!("Invalid scroll amount: {value}"))?,
                );
            }
            flag if flag.starts_with("--") => bail!("Unknown option: {flag}"),
            path if chapters_dir.is_none() => chapters_dir = Some(PathBuf::from(path)),
            extra => bail!("Unexpected argument: {extra}"),
        }
    }

    let chapters_dir = chapters_dir.ok_or_else(|| {
        anyhow!("Usage: position-probe <chapters-dir> [--paginated] [--horizontal] [--scroll <px>]")
    })?;
    if !chapters_dir.is_dir() {
        return Err(anyhow!("Directory not found: {}", chapters_dir.display()));
    }
    Ok(ProbeArgs {
        chapters_dir,
        paginated,
        horizontal,
        scroll,
    })
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter_layer),
        )
        .init();
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = handle.modify(|filter| *filter = parsed.clone()) {
        warn!(%level, "Failed to update log level from config: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|arg| arg.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn parses_flags_and_scroll() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().to_string_lossy().into_owned();
        let parsed =
            parse_args(args(&[path.as_str(), "--paginated", "--scroll", "450"])).expect("args");
        assert!(parsed.paginated);
        assert!(!parsed.horizontal);
        assert_eq!(parsed.scroll, Some(450.0));
    }

    #[test]
    fn rejects_missing_dir_and_unknown_flags() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["/definitely/not/here"])).is_err());
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().to_string_lossy().into_owned();
        assert!(parse_args(args(&[path.as_str(), "--fast"])).is_err());
        assert!(parse_args(args(&[path.as_str(), "--scroll"])).is_err());
    }
}
