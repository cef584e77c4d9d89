//! Segmentation from a precomputed grayscale mask image

use super::SegmentationBackend;
use crate::{
    error::{ComposeError, Result},
    types::{Mask, RasterImage},
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Reads the mask from a grayscale image file (black = background)
///
/// Useful when segmentation ran elsewhere, e.g. on the capturing device.
#[derive(Debug, Clone)]
pub struct MaskFileSegmenter {
    path: PathBuf,
}

impl MaskFileSegmenter {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode the mask file synchronously
    pub fn load_mask(&self) -> Result<Mask> {
        let image = image::open(&self.path)
            .map_err(|e| ComposeError::image_load_error(&self.path, &e))?;
        Mask::from_luma(&image.to_luma8())
    }
}

#[async_trait]
impl SegmentationBackend for MaskFileSegmenter {
    async fn segment(&self, _image: &RasterImage) -> Result<Mask> {
        let segmenter = self.clone();
        tokio::task::spawn_blocking(move || segmenter.load_mask())
            .await
            .map_err(|e| ComposeError::segmentation(format!("Mask load task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        "mask-file"
    }
}
