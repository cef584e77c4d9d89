//! Selectable background images
//!
//! A [`BackgroundSource`] lists backgrounds and hands out their encoded
//! bytes. The [`BackgroundPicker`] decodes an entry only when asked and
//! reports a selection through its callback; what the receiver does with the
//! image (normally storing it in the edit session) is up to the receiver.

use crate::{
    error::{ComposeError, Result},
    services::ImageIOService,
    types::RasterImage,
};
use image::imageops::FilterType;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, instrument};
use walkdir::WalkDir;

/// One listed background
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundEntry {
    /// Identifier passed back to [`BackgroundSource::load_bytes`]
    pub id: String,
    /// Human readable name
    pub label: String,
}

/// Collaborator that lists backgrounds and yields their encoded bytes
pub trait BackgroundSource: Send + Sync {
    /// Entries in display order
    fn entries(&self) -> Result<Vec<BackgroundEntry>>;

    /// Encoded image bytes for `id`
    fn load_bytes(&self, id: &str) -> Result<Vec<u8>>;
}

/// Image files in a directory whose names match a glob pattern
#[derive(Debug, Clone)]
pub struct DirectoryBackgroundSource {
    directory: PathBuf,
    pattern: Option<glob::Pattern>,
}

impl DirectoryBackgroundSource {
    /// All supported images in `directory`
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
            pattern: None,
        }
    }

    /// Only files whose name matches `pattern` (e.g. `"beach_*"`)
    pub fn with_pattern<P: Into<PathBuf>>(directory: P, pattern: &str) -> Result<Self> {
        let pattern = glob::Pattern::new(pattern).map_err(|e| {
            ComposeError::invalid_config(format!("Invalid background pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            directory: directory.into(),
            pattern: Some(pattern),
        })
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn matches(&self, path: &Path) -> bool {
        let name_matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.pattern.as_ref().map_or(true, |p| p.matches(name)));
        name_matches && ImageIOService::is_supported_format(path)
    }
}

impl BackgroundSource for DirectoryBackgroundSource {
    fn entries(&self) -> Result<Vec<BackgroundEntry>> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.directory).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                ComposeError::file_io_error(
                    "list backgrounds in",
                    &self.directory,
                    &std::io::Error::other(e.to_string()),
                )
            })?;
            if entry.file_type().is_file() && self.matches(entry.path()) {
                paths.push(entry.into_path());
            }
        }
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| BackgroundEntry {
                label: path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                id: path.to_string_lossy().into_owned(),
            })
            .collect())
    }

    fn load_bytes(&self, id: &str) -> Result<Vec<u8>> {
        std::fs::read(id).map_err(|e| ComposeError::file_io_error("read background", id, &e))
    }
}

/// Backgrounds held in memory, in insertion order
#[derive(Debug, Clone, Default)]
pub struct MemoryBackgroundSource {
    items: Vec<(BackgroundEntry, Arc<[u8]>)>,
}

impl MemoryBackgroundSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an encoded image under `id`
    pub fn push<S: Into<String>>(&mut self, id: S, bytes: Vec<u8>) {
        let id = id.into();
        self.items.push((
            BackgroundEntry {
                label: id.clone(),
                id,
            },
            Arc::from(bytes),
        ));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl BackgroundSource for MemoryBackgroundSource {
    fn entries(&self) -> Result<Vec<BackgroundEntry>> {
        Ok(self.items.iter().map(|(entry, _)| entry.clone()).collect())
    }

    fn load_bytes(&self, id: &str) -> Result<Vec<u8>> {
        self.items
            .iter()
            .find(|(entry, _)| entry.id == id)
            .map(|(_, bytes)| bytes.to_vec())
            .ok_or_else(|| ComposeError::decode(format!("No background with id '{}'", id)))
    }
}

/// Callback receiving the decoded background on selection
pub type SelectionCallback = Box<dyn Fn(RasterImage) + Send + Sync>;

/// Lists backgrounds and decodes them on demand
pub struct BackgroundPicker {
    source: Arc<dyn BackgroundSource>,
    entries: Vec<BackgroundEntry>,
    on_select: Option<SelectionCallback>,
}

impl std::fmt::Debug for BackgroundPicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundPicker")
            .field("entries", &self.entries)
            .field("has_callback", &self.on_select.is_some())
            .finish_non_exhaustive()
    }
}

impl BackgroundPicker {
    /// Create a picker and list the source once
    pub fn new(source: Arc<dyn BackgroundSource>) -> Result<Self> {
        let entries = source.entries()?;
        debug!(count = entries.len(), "background entries listed");
        Ok(Self {
            source,
            entries,
            on_select: None,
        })
    }

    /// Re-list the source
    pub fn refresh(&mut self) -> Result<()> {
        self.entries = self.source.entries()?;
        Ok(())
    }

    #[must_use]
    pub fn entries(&self) -> &[BackgroundEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register the selection callback, replacing any previous one
    pub fn set_on_select<F>(&mut self, callback: F)
    where
        F: Fn(RasterImage) + Send + Sync + 'static,
    {
        self.on_select = Some(Box::new(callback));
    }

    fn entry(&self, index: usize) -> Result<&BackgroundEntry> {
        self.entries.get(index).ok_or_else(|| {
            ComposeError::invalid_config(format!(
                "Background index {} out of range ({} available)",
                index,
                self.entries.len()
            ))
        })
    }

    /// Decode the entry at `index` on the calling thread
    pub fn decode(&self, index: usize) -> Result<RasterImage> {
        let entry = self.entry(index)?;
        decode_entry(self.source.as_ref(), &entry.id)
    }

    /// Decode the entry at `index` on the blocking pool
    pub async fn decode_async(&self, index: usize) -> Result<RasterImage> {
        let id = self.entry(index)?.id.clone();
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || decode_entry(source.as_ref(), &id))
            .await
            .map_err(|e| ComposeError::internal(format!("Background decode task failed: {}", e)))?
    }

    /// Decode the entry at `index` and hand it to the callback
    ///
    /// Selecting the same entry again decodes and notifies again.
    #[instrument(skip(self))]
    pub async fn select(&self, index: usize) -> Result<RasterImage> {
        let image = self.decode_async(index).await?;
        if let Some(callback) = &self.on_select {
            callback(image.clone());
        }
        Ok(image)
    }

    /// Decode every entry concurrently, downscaled to fit `max_side`
    pub async fn thumbnails(&self, max_side: u32) -> Vec<Result<RasterImage>> {
        let max_side = max_side.max(1);
        let decodes = (0..self.entries.len()).map(|index| async move {
            let image = self.decode_async(index).await?;
            Ok::<_, ComposeError>(thumbnail(&image, max_side))
        });
        futures::future::join_all(decodes).await
    }
}

fn decode_entry(source: &dyn BackgroundSource, id: &str) -> Result<RasterImage> {
    let bytes = source.load_bytes(id)?;
    RasterImage::decode(&bytes)
        .map_err(|e| ComposeError::decode(format!("Background '{}' cannot be decoded: {}", id, e)))
}

fn thumbnail(image: &RasterImage, max_side: u32) -> RasterImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max_side {
        return image.clone();
    }
    let scale = f64::from(max_side) / f64::from(longest);
    let new_width = ((f64::from(width) * scale).round() as u32).max(1);
    let new_height = ((f64::from(height) * scale).round() as u32).max(1);
    image.resized(new_width, new_height, FilterType::Triangle)
}
