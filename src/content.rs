//! Chapter content supply.
//!
//! Providers hand out chapter markup for a sliding preload window around the
//! chapter being read. Chapters outside the window are dropped and must be
//! treated as absent by callers.

use crate::blocks::build_block_index;
use crate::progress::BookStats;
use anyhow::{Context, Result, bail};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CHAPTER_EXTENSIONS: [&str; 3] = ["html", "xhtml", "htm"];

pub trait ContentProvider {
    fn chapter_count(&self) -> usize;

    /// Markup for a loaded chapter; `None` while unloaded or loading.
    fn chapter_html(&self, chapter_index: usize) -> Option<String>;

    fn is_loading(&self, chapter_index: usize) -> bool;

    /// Make the window around `chapter_index` available and release the rest.
    fn load_chapters_around(&mut self, chapter_index: usize, preload: usize);

    fn stats(&self) -> BookStats;
}

/// Chapters within `preload` of `center`, clamped to the book.
pub fn preload_window(
    center: usize,
    preload: usize,
    chapter_count: usize,
) -> RangeInclusive<usize> {
    if chapter_count == 0 {
        return 1..=0;
    }
    let center = center.min(chapter_count - 1);
    center.saturating_sub(preload)..=center.saturating_add(preload).min(chapter_count - 1)
}

fn stats_for<'a>(chapters: impl Iterator<Item = &'a str>) -> BookStats {
    BookStats::from_lengths(
        chapters
            .enumerate()
            .map(|(idx, html)| build_block_index(html, idx).total_chars)
            .collect(),
    )
}

/// Chapters held in memory. With `lazy` set, loads stay pending until
/// [`MemoryContent::complete_pending`] is called, mimicking async fetches.
#[derive(Debug, Clone)]
pub struct MemoryContent {
    chapters: Vec<String>,
    stats: BookStats,
    lazy: bool,
    loaded: BTreeSet<usize>,
    pending: BTreeSet<usize>,
}

impl MemoryContent {
    pub fn new(chapters: Vec<String>) -> Self {
        let stats = stats_for(chapters.iter().map(String::as_str));
        Self {
            chapters,
            stats,
            lazy: false,
            loaded: BTreeSet::new(),
            pending: BTreeSet::new(),
        }
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Finish every pending load. Returns the chapters that became ready.
    pub fn complete_pending(&mut self) -> Vec<usize> {
        let ready: Vec<usize> = std::mem::take(&mut self.pending).into_iter().collect();
        self.loaded.extend(ready.iter().copied());
        ready
    }

    pub fn loaded_chapters(&self) -> Vec<usize> {
        self.loaded.iter().copied().collect()
    }
}

impl ContentProvider for MemoryContent {
    fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    fn chapter_html(&self, chapter_index: usize) -> Option<String> {
        if !self.loaded.contains(&chapter_index) {
            return None;
        }
        self.chapters.get(chapter_index).cloned()
    }

    fn is_loading(&self, chapter_index: usize) -> bool {
        self.pending.contains(&chapter_index)
    }

    fn load_chapters_around(&mut self, chapter_index: usize, preload: usize) {
        let window = preload_window(chapter_index, preload, self.chapters.len());
        self.loaded.retain(|idx| window.contains(idx));
        self.pending.retain(|idx| window.contains(idx));
        for idx in window {
            if self.loaded.contains(&idx) {
                continue;
            }
            if self.lazy {
                self.pending.insert(idx);
            } else {
                self.loaded.insert(idx);
            }
        }
    }

    fn stats(&self) -> BookStats {
        self.stats.clone()
    }
}

/// Chapters are the `.html`/`.xhtml`/`.htm` files of a directory, in file
/// name order.
#[derive(Debug)]
pub struct DirectoryContentProvider {
    root: PathBuf,
    files: Vec<PathBuf>,
    stats: BookStats,
    cache: HashMap<usize, String>,
}

impl DirectoryContentProvider {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
            let path = entry?.path();
            let is_chapter = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    CHAPTER_EXTENSIONS
                        .iter()
                        .any(|known| ext.eq_ignore_ascii_case(known))
                });
            if is_chapter && path.is_file() {
                files.push(path);
            }
        }
        if files.is_empty() {
            bail!("no chapter files found in {}", dir.display());
        }
        files.sort();

        let mut lengths = Vec::with_capacity(files.len());
        for (idx, path) in files.iter().enumerate() {
            let html = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            lengths.push(build_block_index(&html, idx).total_chars);
        }
        let stats = BookStats::from_lengths(lengths);
        info!(
            path = %dir.display(),
            chapters = files.len(),
            total_chars = stats.total_length,
            "Opened chapter directory"
        );

        Ok(Self {
            root: dir.to_path_buf(),
            files,
            stats,
            cache: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Identifier used to key saved progress.
    pub fn book_id(&self) -> String {
        fs::canonicalize(&self.root)
            .unwrap_or_else(|_| self.root.clone())
            .to_string_lossy()
            .into_owned()
    }

    pub fn chapter_path(&self, chapter_index: usize) -> Option<&Path> {
        self.files.get(chapter_index).map(PathBuf::as_path)
    }
}

impl ContentProvider for DirectoryContentProvider {
    fn chapter_count(&self) -> usize {
        self.files.len()
    }

    fn chapter_html(&self, chapter_index: usize) -> Option<String> {
        self.cache.get(&chapter_index).cloned()
    }

    fn is_loading(&self, _chapter_index: usize) -> bool {
        false
    }

    fn load_chapters_around(&mut self, chapter_index: usize, preload: usize) {
        let window = preload_window(chapter_index, preload, self.files.len());
        self.cache.retain(|idx, _| window.contains(idx));
        for idx in window {
            if self.cache.contains_key(&idx) {
                continue;
            }
            let path = &self.files[idx];
            match fs::read_to_string(path) {
                Ok(html) => {
                    debug!(chapter = idx, path = %path.display(), "Loaded chapter");
                    self.cache.insert(idx, html);
                }
                Err(err) => {
                    warn!(chapter = idx, path = %path.display(), "Failed to load chapter: {err}")
                }
            }
        }
    }

    fn stats(&self) -> BookStats {
        self.stats.clone()
    }
}
