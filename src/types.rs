//! Core types for the compositing pipeline

use crate::{
    config::OutputFormat,
    error::{ComposeError, Result},
    services::OutputFormatHandler,
};
use chrono::Utc;
use image::{imageops::FilterType, DynamicImage, GrayImage, Rgba, RgbaImage};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Immutable 8-bit RGBA raster
///
/// The pixel buffer is shared between clones and never mutated after
/// construction; every edit produces a new `RasterImage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pixels: Arc<RgbaImage>,
}

impl RasterImage {
    /// Wrap an owned RGBA buffer
    #[must_use]
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    /// Convert any decoded image to RGBA
    #[must_use]
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        Self::new(image.to_rgba8())
    }

    /// Create a single-colour raster
    #[must_use]
    pub fn from_pixel(width: u32, height: u32, pixel: Rgba<u8>) -> Self {
        Self::new(RgbaImage::from_pixel(width, height, pixel))
    }

    /// Create a fully transparent raster
    #[must_use]
    pub fn transparent(width: u32, height: u32) -> Self {
        Self::new(RgbaImage::new(width, height))
    }

    /// Build a raster from raw RGBA bytes
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        let actual = data.len();
        RgbaImage::from_raw(width, height, data)
            .map(Self::new)
            .ok_or_else(|| {
                ComposeError::decode(format!(
                    "RGBA buffer of {} bytes does not fit {}x{} (expected {} bytes)",
                    actual, width, height, expected
                ))
            })
    }

    /// Decode an encoded image (PNG, JPEG, TIFF, WebP) from memory
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).map_err(|e| {
            ComposeError::decode(format!("Failed to decode image from bytes: {}", e))
        })?;
        Ok(Self::from_dynamic(&image))
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Pixel at `(x, y)`; panics when out of bounds like `ImageBuffer::get_pixel`
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.pixels.get_pixel(x, y)
    }

    /// Borrow the underlying buffer read-only
    #[must_use]
    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    /// Resample to new dimensions, returning a new raster
    ///
    /// Resizing to the current dimensions returns a clone sharing the buffer.
    #[must_use]
    pub fn resized(&self, width: u32, height: u32, filter: FilterType) -> Self {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        Self::new(image::imageops::resize(
            self.pixels.as_ref(),
            width,
            height,
            filter,
        ))
    }

    /// Copy out as a `DynamicImage` for encoding or display
    #[must_use]
    pub fn to_dynamic(&self) -> DynamicImage {
        DynamicImage::ImageRgba8(self.pixels.as_ref().clone())
    }

    /// Whether two rasters share the same buffer
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl From<RgbaImage> for RasterImage {
    fn from(pixels: RgbaImage) -> Self {
        Self::new(pixels)
    }
}

/// Map a confidence value to an 8-bit alpha
///
/// Values are clamped to `[0, 1]` and rounded half away from zero, so `0.5`
/// maps to 128. `NaN` maps to 0.
#[must_use]
pub fn confidence_to_alpha(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Per-pixel subject confidence produced by the segmentation collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MaskFields")]
pub struct Mask {
    width: u32,
    height: u32,
    /// Row-major confidence values, nominally in `[0, 1]`
    data: Vec<f32>,
}

/// Unchecked serialized form of [`Mask`]
#[derive(Deserialize)]
struct MaskFields {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl TryFrom<MaskFields> for Mask {
    type Error = ComposeError;

    fn try_from(fields: MaskFields) -> Result<Self> {
        Self::new(fields.width, fields.height, fields.data)
    }
}

impl Mask {
    /// Create a mask, rejecting empty grids and buffers of the wrong length
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ComposeError::invalid_mask(format!(
                "mask dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(ComposeError::invalid_mask(format!(
                "buffer length {} does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Create a mask with the same confidence everywhere
    pub fn uniform(width: u32, height: u32, value: f32) -> Result<Self> {
        Self::new(width, height, vec![value; width as usize * height as usize])
    }

    /// Create a mask from a grayscale image (0 → 0.0, 255 → 1.0)
    pub fn from_luma(image: &GrayImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        let data = image.as_raw().iter().map(|&v| f32::from(v) / 255.0).collect();
        Self::new(width, height, data)
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw row-major values as delivered by the collaborator
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.data
    }

    /// Clamped confidence at `(x, y)`, `None` outside the grid
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y as usize * self.width as usize + x as usize;
        self.data.get(index).map(|v| v.clamp(0.0, 1.0))
    }

    /// Alpha for the pixel at row-major `index`
    #[must_use]
    pub fn alpha_at(&self, index: usize) -> u8 {
        self.data.get(index).copied().map_or(0, confidence_to_alpha)
    }

    /// Render the mask as an 8-bit grayscale image
    #[must_use]
    pub fn to_luma_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let index = y as usize * self.width as usize + x as usize;
            image::Luma([self.alpha_at(index)])
        })
    }

    /// Save the mask as a grayscale PNG
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_luma_image()
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }

    /// Get mask statistics
    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len();
        let mut foreground_pixels = 0usize;
        let mut sum = 0.0f64;
        for value in &self.data {
            let v = value.clamp(0.0, 1.0);
            if v > 0.5 {
                foreground_pixels += 1;
            }
            sum += f64::from(v);
        }
        let total = total_pixels as f32;

        MaskStatistics {
            total_pixels,
            foreground_pixels,
            background_pixels: total_pixels - foreground_pixels,
            foreground_ratio: foreground_pixels as f32 / total,
            mean_confidence: (sum / total_pixels as f64) as f32,
        }
    }
}

/// Statistics about a segmentation mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub background_pixels: usize,
    pub foreground_ratio: f32,
    pub mean_confidence: f32,
}

/// Timing breakdown of one edit session, from segmentation to export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionTimings {
    /// Segmentation collaborator call
    pub segmentation_ms: u64,

    /// Mask application (resample, alpha replacement, resample back)
    pub mask_application_ms: u64,

    /// Flattening background and foreground
    pub composition_ms: u64,

    /// Final image encoding (if saving to file)
    pub image_encode_ms: Option<u64>,

    /// Total end-to-end time
    pub total_ms: u64,
}

impl CompositionTimings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get breakdown percentages
    #[must_use]
    pub fn breakdown_percentages(&self) -> TimingBreakdown {
        if self.total_ms == 0 {
            return TimingBreakdown::default();
        }

        let total = self.total_ms as f64;
        TimingBreakdown {
            segmentation_pct: (self.segmentation_ms as f64 / total) * 100.0,
            mask_application_pct: (self.mask_application_ms as f64 / total) * 100.0,
            composition_pct: (self.composition_ms as f64 / total) * 100.0,
            encode_pct: (self.image_encode_ms.unwrap_or(0) as f64 / total) * 100.0,
            other_pct: (self.other_overhead_ms() as f64 / total) * 100.0,
        }
    }

    /// Get the "other" overhead time (unaccounted time)
    #[must_use]
    pub fn other_overhead_ms(&self) -> u64 {
        let measured = self.segmentation_ms
            + self.mask_application_ms
            + self.composition_ms
            + self.image_encode_ms.unwrap_or(0);
        self.total_ms.saturating_sub(measured)
    }

    /// One-line summary for display
    #[must_use]
    pub fn summary(&self) -> String {
        let breakdown = self.breakdown_percentages();
        let mut summary = format!(
            "Total: {}ms | Segmentation: {}ms ({:.1}%) | Mask: {}ms ({:.1}%) | Compose: {}ms ({:.1}%)",
            self.total_ms,
            self.segmentation_ms,
            breakdown.segmentation_pct,
            self.mask_application_ms,
            breakdown.mask_application_pct,
            self.composition_ms,
            breakdown.composition_pct
        );

        if let Some(encode_ms) = self.image_encode_ms {
            summary.push_str(&format!(
                " | Encode: {}ms ({:.1}%)",
                encode_ms, breakdown.encode_pct
            ));
        }

        summary
    }
}

/// Percentage breakdown of timing phases
#[derive(Debug, Clone, Default)]
pub struct TimingBreakdown {
    pub segmentation_pct: f64,
    pub mask_application_pct: f64,
    pub composition_pct: f64,
    pub encode_pct: f64,
    pub other_pct: f64,
}

/// Metadata about a composition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionMetadata {
    /// Edit session that produced the result
    pub session_id: String,

    /// Whether a background image was drawn under the foreground
    pub has_background: bool,

    /// Whether the segmented foreground (rather than the original) was used
    pub segmented: bool,

    /// Canvas dimensions
    pub canvas: (u32, u32),

    /// Timing breakdown
    pub timings: CompositionTimings,
}

/// The flattened output of an edit session
///
/// A failed write leaves the result untouched so the caller can retry.
#[derive(Debug, Clone)]
pub struct ComposedResult {
    /// The flattened image
    pub image: RasterImage,

    /// Composition metadata
    pub metadata: CompositionMetadata,
}

impl ComposedResult {
    #[must_use]
    pub fn new(image: RasterImage, metadata: CompositionMetadata) -> Self {
        Self { image, metadata }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Encode the result in the specified lossless format
    pub fn to_bytes(&self, format: OutputFormat) -> Result<Vec<u8>> {
        OutputFormatHandler::encode(&self.image, format)
    }

    /// Save the result as PNG with alpha channel
    pub fn save_png<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.save(path, OutputFormat::Png)
    }

    /// Encode and write the result, recording the encode time
    pub fn save<P: AsRef<Path>>(&mut self, path: P, format: OutputFormat) -> Result<()> {
        let path_ref = path.as_ref();
        let encode_start = instant::Instant::now();
        let bytes = self.to_bytes(format)?;
        std::fs::write(path_ref, bytes)
            .map_err(|e| ComposeError::file_io_error("write composed image", path_ref, &e))?;
        let encode_ms = encode_start.elapsed().as_millis() as u64;

        self.metadata.timings.image_encode_ms = Some(encode_ms);
        self.metadata.timings.total_ms += encode_ms;

        info!(
            "[{}Z INFO selfie_compose] Saved {}x{} composition -> {} in {}ms",
            Utc::now().format("%Y-%m-%dT%H:%M:%S"),
            self.image.width(),
            self.image.height(),
            path_ref.display(),
            encode_ms
        );
        Ok(())
    }
}
