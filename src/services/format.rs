//! Output format handling service
//!
//! Keeps encoder selection out of the session and compositor code.

use crate::{
    config::OutputFormat,
    error::{ComposeError, Result},
    types::RasterImage,
};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Service for encoding composed images
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Encode an RGBA image in the given lossless format
    ///
    /// # Errors
    /// - `WebP` requested without the `webp-support` feature
    /// - Encoder failure
    ///
    /// # Examples
    /// ```rust
    /// use selfie_compose::{services::OutputFormatHandler, OutputFormat, RasterImage};
    /// use image::Rgba;
    ///
    /// let image = RasterImage::from_pixel(4, 4, Rgba([255, 0, 0, 128]));
    /// let png = OutputFormatHandler::encode(&image, OutputFormat::Png)?;
    /// assert_eq!(&png[1..4], b"PNG");
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn encode(image: &RasterImage, format: OutputFormat) -> Result<Vec<u8>> {
        let image_format = Self::image_format(format)?;
        let dynamic = DynamicImage::ImageRgba8(image.as_rgba().clone());

        let mut buffer = Cursor::new(Vec::new());
        dynamic.write_to(&mut buffer, image_format).map_err(|e| {
            ComposeError::internal(format!(
                "Failed to encode {}x{} image as {}: {}",
                image.width(),
                image.height(),
                format,
                e
            ))
        })?;
        Ok(buffer.into_inner())
    }

    /// Map an output format onto the `image` crate's format
    ///
    /// # Errors
    /// `WebP` without the `webp-support` feature
    pub fn image_format(format: OutputFormat) -> Result<ImageFormat> {
        match format {
            OutputFormat::Png => Ok(ImageFormat::Png),
            OutputFormat::Tiff => Ok(ImageFormat::Tiff),
            #[cfg(feature = "webp-support")]
            OutputFormat::WebP => Ok(ImageFormat::WebP),
            #[cfg(not(feature = "webp-support"))]
            OutputFormat::WebP => Err(ComposeError::invalid_config(
                "WebP output requires the 'webp-support' feature",
            )),
        }
    }

    /// File extension (without the dot) for a given output format
    ///
    /// # Examples
    /// ```rust
    /// use selfie_compose::{services::OutputFormatHandler, OutputFormat};
    ///
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Png), "png");
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Tiff), "tiff");
    /// ```
    #[must_use]
    pub fn get_extension(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "png",
            OutputFormat::Tiff => "tiff",
            OutputFormat::WebP => "webp",
        }
    }

    /// Guess the output format from a file extension (case-insensitive)
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<OutputFormat> {
        match extension.to_ascii_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            "tif" | "tiff" => Some(OutputFormat::Tiff),
            "webp" => Some(OutputFormat::WebP),
            _ => None,
        }
    }
}
