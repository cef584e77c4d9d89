#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Selfie Compose
//!
//! Cut a person out of a photo with a segmentation mask, then move, scale and
//! fade them over a new background and flatten the result into one image.
//!
//! ## Features
//!
//! - **Mask Application**: Confidence masks of any size become the photo's alpha channel
//! - **Gesture Transforms**: Pinch and drag events accumulate into one affine layer transform
//! - **Async Segmentation**: Segmentation runs off the caller's task, with cancellation and timeouts
//! - **Compositing**: Source-over blending with bilinear sampling and layer opacity
//! - **Background Picking**: Directory or in-memory background sources with lazy decoding
//! - **Lossless Export**: PNG, TIFF and WebP into a timestamped collection directory
//! - **Pluggable Segmentation**: Mask files, or an ONNX model through Tract (`tract` feature)
//! - **CLI Integration**: Optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use selfie_compose::{ComposeConfig, EditSession, ImageIOService, MaskFileSegmenter};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ComposeConfig::builder().output_dir("out").build()?;
//! let mut session = EditSession::from_path("selfie.jpg", config)?;
//!
//! // Segment in the background, then wait for it
//! session.request_segmentation(Arc::new(MaskFileSegmenter::new("selfie_mask.png")))?;
//! session.wait_for_segmentation().await;
//!
//! // New background, then move the foreground around
//! session.set_background(ImageIOService::load_image("beach.jpg")?)?;
//! let gestures = session.gesture_sender();
//! gestures.pinch(0.8, 400.0, 300.0);
//! gestures.drag((0.0, 0.0), (120.0, 40.0));
//!
//! let (path, result) = session.save((800, 600))?;
//! println!("{} ({:?})", path.display(), result.dimensions());
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `tract` (default): ONNX segmentation models through the pure Rust Tract runtime
//! - `cli` (default): Command-line interface and tracing subscriber setup
//! - `webp-support` (default): Lossless WebP export
//! - `tracing-json`, `tracing-files`: Extra subscriber outputs for the CLI

pub mod background;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod error;
pub mod gestures;
pub mod mask;
pub mod segmentation;
pub mod services;
pub mod session;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod transform;
pub mod types;

use std::sync::Arc;

// Public API exports
pub use background::{
    BackgroundEntry, BackgroundPicker, BackgroundSource, DirectoryBackgroundSource,
    MemoryBackgroundSource,
};
pub use compositor::{CompositionInput, Compositor};
pub use config::{ComposeConfig, ComposeConfigBuilder, OutputFormat, ResampleFilter};
pub use error::{ComposeError, Result};
pub use gestures::{gesture_channel, GestureEvent, GestureQueue, GestureSender, TransformState};
pub use mask::MaskApplicator;
pub use segmentation::{
    InferenceBackend, MaskFileSegmenter, PreprocessingConfig, SegmentationBackend,
    SegmentationOrchestrator, SegmentationState, TensorSegmenter,
};
#[cfg(feature = "tract")]
pub use segmentation::TractBackend;
pub use services::{
    CollectionEntry, ImageCollection, ImageIOService, OutputFormatHandler, OutputPathAllocator,
};
pub use session::{EditSession, PollSummary, SaveError};
pub use transform::AffineTransform;
pub use types::{
    ComposedResult, CompositionMetadata, CompositionTimings, Mask, MaskStatistics, RasterImage,
};

#[cfg(feature = "cli")]
pub use tracing_config::{
    events, init_cli_tracing, spans, TracingConfig, TracingFormat, TracingOutput,
};

/// Segment a photo and flatten it over an optional background
///
/// One-shot version of the edit flow without gestures: the canvas is the
/// background's size, or the photo's when there is none. A failed
/// segmentation falls back to the original photo.
///
/// # Examples
///
/// ```rust,no_run
/// use selfie_compose::{compose_with_backend, ComposeConfig, MaskFileSegmenter, RasterImage};
/// use std::sync::Arc;
///
/// # async fn example(photo: RasterImage, background: RasterImage) -> anyhow::Result<()> {
/// let result = compose_with_backend(
///     photo,
///     Arc::new(MaskFileSegmenter::new("mask.png")),
///     Some(background),
///     ComposeConfig::default(),
/// )
/// .await?;
/// let png = result.to_bytes(selfie_compose::OutputFormat::Png)?;
/// # Ok(())
/// # }
/// ```
pub async fn compose_with_backend(
    photo: RasterImage,
    backend: Arc<dyn SegmentationBackend>,
    background: Option<RasterImage>,
    config: ComposeConfig,
) -> Result<ComposedResult> {
    let viewport = photo.dimensions();
    let mut session = EditSession::new(photo, config)?;

    session.request_segmentation(backend)?;
    session.wait_for_segmentation().await;

    if let Some(background) = background {
        session.set_background(background)?;
    }
    let result = session.compose(viewport);
    session.close();
    result
}

/// Same as [`compose_with_backend`], from encoded image bytes
pub async fn compose_from_bytes(
    photo_bytes: &[u8],
    backend: Arc<dyn SegmentationBackend>,
    background_bytes: Option<&[u8]>,
    config: ComposeConfig,
) -> Result<ComposedResult> {
    let photo = RasterImage::decode(photo_bytes)?;
    let background = background_bytes.map(RasterImage::decode).transpose()?;
    compose_with_backend(photo, backend, background, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::test_utils::{FailingSegmenter, FixedMaskSegmenter};
    use image::Rgba;

    #[tokio::test]
    async fn test_compose_with_backend_uses_background_canvas() {
        let photo = RasterImage::from_pixel(40, 20, Rgba([200, 10, 10, 255]));
        let background = RasterImage::from_pixel(60, 50, Rgba([0, 0, 255, 255]));
        let mask = Mask::uniform(8, 8, 0.0).unwrap();

        let result = compose_with_backend(
            photo,
            Arc::new(FixedMaskSegmenter::new(mask)),
            Some(background),
            ComposeConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.dimensions(), (60, 50));
        assert!(result.metadata.segmented);
        // Fully transparent foreground leaves the background visible
        assert_eq!(result.image.pixel(5, 5), Rgba([0, 0, 255, 255]));
    }

    #[tokio::test]
    async fn test_compose_with_backend_falls_back_on_failure() {
        let photo = RasterImage::from_pixel(10, 10, Rgba([1, 2, 3, 255]));

        let result = compose_with_backend(
            photo.clone(),
            Arc::new(FailingSegmenter::new("no person found")),
            None,
            ComposeConfig::default(),
        )
        .await
        .unwrap();

        assert!(!result.metadata.segmented);
        assert_eq!(result.image.as_raw(), photo.as_raw());
    }

    #[tokio::test]
    async fn test_compose_from_bytes_rejects_garbage() {
        let mask = Mask::uniform(4, 4, 1.0).unwrap();
        let result = compose_from_bytes(
            b"not an image",
            Arc::new(FixedMaskSegmenter::new(mask)),
            None,
            ComposeConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(ComposeError::Decode(_))));
    }
}
