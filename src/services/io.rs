//! Image I/O operations service
//!
//! File access for photos, backgrounds and composed results, kept apart from
//! the compositing logic.

use crate::{
    config::{ComposeConfig, OutputFormat},
    error::{ComposeError, Result},
    services::OutputFormatHandler,
    types::RasterImage,
};
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Extensions accepted as photo or background input
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "tif", "tiff"];

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file path as RGBA
    ///
    /// Extension-based detection is tried first, then content sniffing, so
    /// mislabelled files still load.
    ///
    /// # Examples
    /// ```rust,no_run
    /// use selfie_compose::services::ImageIOService;
    ///
    /// let photo = ImageIOService::load_image("selfie.jpg")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RasterImage> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(ComposeError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        match image::open(path_ref) {
            Ok(img) => Ok(RasterImage::from_dynamic(&img)),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path_ref.display(),
                    e
                );

                let data = std::fs::read(path_ref)
                    .map_err(|io_err| ComposeError::file_io_error("read image data", path_ref, &io_err))?;

                image::load_from_memory(&data)
                    .map(|img| RasterImage::from_dynamic(&img))
                    .map_err(|content_err| ComposeError::image_load_error(path_ref, &content_err))
            },
        }
    }

    /// Load an image on the blocking pool
    pub async fn load_image_async<P: AsRef<Path>>(path: P) -> Result<RasterImage> {
        let path_buf = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || Self::load_image(path_buf))
            .await
            .map_err(|e| ComposeError::internal(format!("Image load task failed: {}", e)))?
    }

    /// Encode and write an image, creating the parent directory when needed
    pub fn save_image<P: AsRef<Path>>(
        image: &RasterImage,
        path: P,
        format: OutputFormat,
    ) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ComposeError::file_io_error("create output directory", parent, &e))?;
            }
        }

        let bytes = OutputFormatHandler::encode(image, format)?;
        std::fs::write(path_ref, bytes)
            .map_err(|e| ComposeError::file_io_error("write image file", path_ref, &e))
    }

    /// Check if a file path has a supported image extension
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    }
}

/// Allocates unique `<prefix><unix-millis>.<ext>` output paths
#[derive(Debug, Clone)]
pub struct OutputPathAllocator {
    directory: PathBuf,
    prefix: String,
    format: OutputFormat,
}

impl OutputPathAllocator {
    #[must_use]
    pub fn new<P: Into<PathBuf>, S: Into<String>>(directory: P, prefix: S, format: OutputFormat) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            format,
        }
    }

    #[must_use]
    pub fn from_config(config: &ComposeConfig) -> Self {
        Self::new(
            config.output_dir.clone(),
            config.file_prefix.clone(),
            config.output_format,
        )
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Reserve the next unused path, creating the output directory
    ///
    /// The timestamp is bumped by one millisecond until the name is free.
    pub fn allocate(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.directory)
            .map_err(|e| ComposeError::file_io_error("create output directory", &self.directory, &e))?;

        let extension = OutputFormatHandler::get_extension(self.format);
        let mut millis = Utc::now().timestamp_millis();
        loop {
            let candidate = self
                .directory
                .join(format!("{}{}.{}", self.prefix, millis, extension));
            if !candidate.exists() {
                return Ok(candidate);
            }
            millis += 1;
        }
    }
}
