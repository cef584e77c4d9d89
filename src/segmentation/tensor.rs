//! Bridge from synchronous NCHW tensor inference to [`SegmentationBackend`]

use super::SegmentationBackend;
use crate::{
    error::{ComposeError, Result},
    types::{Mask, RasterImage},
};
use async_trait::async_trait;
use image::imageops::FilterType;
use instant::Duration;
use ndarray::{Array4, Axis};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Synchronous inference engine for a single-image segmentation model
///
/// Input is `(1, 3, H, W)` normalised RGB, output `(1, 1, H', W')`
/// confidences.
pub trait InferenceBackend: Send {
    /// Load the model if needed, returning the load time
    ///
    /// # Errors
    /// - Model file missing or invalid
    fn initialize(&mut self) -> Result<Option<Duration>>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Preprocessing the model expects
    fn preprocessing_config(&self) -> PreprocessingConfig;

    fn is_initialized(&self) -> bool;
}

/// Model input size and normalisation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// `[width, height]` of the model input
    pub target_size: [u32; 2],
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: [320, 320],
            normalization_mean: [0.485, 0.456, 0.406],
            normalization_std: [0.229, 0.224, 0.225],
        }
    }
}

/// Adapts an [`InferenceBackend`] into an async segmentation collaborator
///
/// Inference runs on the blocking pool; concurrent requests are serialised
/// on the backend.
pub struct TensorSegmenter<B> {
    backend: Arc<Mutex<B>>,
    name: String,
}

impl<B: InferenceBackend + 'static> TensorSegmenter<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            name: "tensor".to_string(),
        }
    }

    #[must_use]
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Stretch-resize to the model input and normalise into an NCHW tensor
    #[must_use]
    pub fn preprocess(image: &RasterImage, config: &PreprocessingConfig) -> Array4<f32> {
        let [target_width, target_height] = config.target_size;
        let rgb = image::imageops::resize(
            &image.to_dynamic().to_rgb8(),
            target_width,
            target_height,
            FilterType::Triangle,
        );

        let mut tensor =
            Array4::<f32>::zeros((1, 3, target_height as usize, target_width as usize));
        #[allow(clippy::indexing_slicing)]
        // Safe: tensor allocated with the resized image's dimensions
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for channel in 0..3 {
                tensor[[0, channel, y as usize, x as usize]] = (f32::from(pixel[channel]) / 255.0
                    - config.normalization_mean[channel])
                    / config.normalization_std[channel];
            }
        }
        tensor
    }

    /// Convert a `(1, 1, H, W)` output tensor into a mask
    ///
    /// # Errors
    /// Any other shape, or an empty spatial extent
    pub fn tensor_to_mask(tensor: &Array4<f32>) -> Result<Mask> {
        let shape = tensor.shape();
        if shape[0] != 1 || shape[1] != 1 {
            return Err(ComposeError::invalid_mask(format!(
                "Expected output tensor of shape (1, 1, H, W), got {:?}",
                shape
            )));
        }
        let height = u32::try_from(shape[2])
            .map_err(|_| ComposeError::invalid_mask("Output tensor height exceeds u32"))?;
        let width = u32::try_from(shape[3])
            .map_err(|_| ComposeError::invalid_mask("Output tensor width exceeds u32"))?;

        let plane = tensor.index_axis(Axis(0), 0);
        let plane = plane.index_axis(Axis(0), 0);
        Mask::new(width, height, plane.iter().copied().collect())
    }
}

#[async_trait]
impl<B: InferenceBackend + 'static> SegmentationBackend for TensorSegmenter<B> {
    async fn segment(&self, image: &RasterImage) -> Result<Mask> {
        let backend = Arc::clone(&self.backend);
        let image = image.clone();

        tokio::task::spawn_blocking(move || {
            let mut backend = backend
                .lock()
                .map_err(|_| ComposeError::segmentation("Inference backend lock poisoned"))?;
            if !backend.is_initialized() {
                if let Some(load_time) = backend.initialize()? {
                    log::info!("Segmentation model loaded in {}ms", load_time.as_millis());
                }
            }
            let input = Self::preprocess(&image, &backend.preprocessing_config());
            let output = backend.infer(&input)?;
            Self::tensor_to_mask(&output)
        })
        .await
        .map_err(|e| ComposeError::segmentation(format!("Inference task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::test_utils::MockInferenceBackend;
    use image::Rgba;

    #[test]
    fn test_preprocess_shape_and_normalisation() {
        let image = RasterImage::from_pixel(50, 30, Rgba([255, 0, 0, 255]));
        let config = PreprocessingConfig {
            target_size: [16, 8],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [0.5, 0.5, 0.5],
        };

        let tensor = TensorSegmenter::<MockInferenceBackend>::preprocess(&image, &config);
        assert_eq!(tensor.shape(), &[1, 3, 8, 16]);
        assert!((tensor[[0, 0, 3, 7]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 3, 7]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_tensor_to_mask_row_major() {
        let tensor = Array4::from_shape_vec((1, 1, 2, 3), vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5])
            .unwrap();
        let mask = TensorSegmenter::<MockInferenceBackend>::tensor_to_mask(&tensor).unwrap();

        assert_eq!(mask.dimensions(), (3, 2));
        assert_eq!(mask.get(2, 0), Some(0.2));
        assert_eq!(mask.get(0, 1), Some(0.3));
    }

    #[test]
    fn test_tensor_to_mask_rejects_multichannel() {
        let tensor = Array4::<f32>::zeros((1, 2, 4, 4));
        assert!(TensorSegmenter::<MockInferenceBackend>::tensor_to_mask(&tensor).is_err());
    }

    #[tokio::test]
    async fn test_segment_initializes_backend_once() {
        let backend = MockInferenceBackend::new(0.75);
        let initializations = backend.initialization_counter();
        let segmenter = TensorSegmenter::new(backend);
        let image = RasterImage::from_pixel(10, 10, Rgba([1, 2, 3, 255]));

        let first = segmenter.segment(&image).await.unwrap();
        let _second = segmenter.segment(&image).await.unwrap();

        assert_eq!(first.dimensions(), (32, 32));
        assert!(first.values().iter().all(|v| (*v - 0.75).abs() < 1e-6));
        assert_eq!(initializations.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inference_failure_propagates() {
        let segmenter = TensorSegmenter::new(MockInferenceBackend::failing());
        let image = RasterImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        assert!(segmenter.segment(&image).await.is_err());
    }
}
