//! Saved-image collection in the output directory

use crate::{
    error::{ComposeError, Result},
    services::io::ImageIOService,
};
use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};
use walkdir::WalkDir;

/// One saved image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

/// Images previously written to an output directory
#[derive(Debug, Clone)]
pub struct ImageCollection {
    directory: PathBuf,
}

impl ImageCollection {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Saved images, newest first
    ///
    /// A missing or unreadable directory yields an empty list.
    #[must_use]
    pub fn list(&self) -> Vec<CollectionEntry> {
        if !self.directory.is_dir() {
            log::debug!(
                "Collection directory {} does not exist",
                self.directory.display()
            );
            return Vec::new();
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.directory).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!(
                        "Failed to read collection entry in {}: {}",
                        self.directory.display(),
                        e
                    );
                    continue;
                },
            };
            if !entry.file_type().is_file() || !ImageIOService::is_supported_format(entry.path()) {
                continue;
            }
            match entry.metadata() {
                Ok(metadata) => entries.push(CollectionEntry {
                    path: entry.path().to_path_buf(),
                    size_bytes: metadata.len(),
                    modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                }),
                Err(e) => log::warn!("Failed to stat {}: {}", entry.path().display(), e),
            }
        }

        entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path)));
        entries
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.list().len()
    }

    /// Combined size of all saved images in bytes
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.list().iter().map(|entry| entry.size_bytes).sum()
    }

    /// Delete one saved image
    ///
    /// # Errors
    /// Paths outside the collection directory are rejected.
    pub fn delete<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        if path_ref.parent() != Some(self.directory.as_path()) {
            return Err(ComposeError::invalid_config(format!(
                "'{}' is not part of the collection in '{}'",
                path_ref.display(),
                self.directory.display()
            )));
        }
        std::fs::remove_file(path_ref)
            .map_err(|e| ComposeError::file_io_error("delete saved image", path_ref, &e))
    }

    /// Delete every saved image, returning how many were removed
    pub fn clear(&self) -> Result<usize> {
        let entries = self.list();
        for entry in &entries {
            self.delete(&entry.path)?;
        }
        log::info!(
            "Cleared {} image(s) from {}",
            entries.len(),
            self.directory.display()
        );
        Ok(entries.len())
    }
}
