//! Tract backend for ONNX segmentation models
//!
//! Pure Rust inference with no native runtime to install.

use super::tensor::{InferenceBackend, PreprocessingConfig};
use crate::error::{ComposeError, Result};
use instant::{Duration, Instant};
use ndarray::Array4;
use std::path::{Path, PathBuf};
use tract_onnx::prelude::*;

/// Type alias for the optimized runnable tract model
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Runs an ONNX segmentation model loaded from disk
#[derive(Debug)]
pub struct TractBackend {
    model_path: PathBuf,
    preprocessing: PreprocessingConfig,
    model: Option<TractModel>,
}

impl TractBackend {
    /// Create an uninitialized backend; the model loads on first use
    pub fn new<P: Into<PathBuf>>(model_path: P) -> Self {
        Self {
            model_path: model_path.into(),
            preprocessing: PreprocessingConfig::default(),
            model: None,
        }
    }

    #[must_use]
    pub fn with_preprocessing(mut self, preprocessing: PreprocessingConfig) -> Self {
        self.preprocessing = preprocessing;
        self
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn load_model(&mut self) -> Result<Duration> {
        let model_load_start = Instant::now();
        let model_data = std::fs::read(&self.model_path)
            .map_err(|e| ComposeError::file_io_error("read segmentation model", &self.model_path, &e))?;

        log::info!(
            "🚀 Loading segmentation model {} ({:.2} MB) with tract",
            self.model_path.display(),
            model_data.len() as f64 / (1024.0 * 1024.0)
        );

        let [width, height] = self.preprocessing.target_size;
        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| ComposeError::segmentation(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([1, 3, height as usize, width as usize]).into())
            .map_err(|e| ComposeError::segmentation(format!("Failed to set model input: {e}")))?
            .into_optimized()
            .map_err(|e| ComposeError::segmentation(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| {
                ComposeError::segmentation(format!("Failed to create runnable model: {e}"))
            })?;

        self.model = Some(model);
        let model_load_time = model_load_start.elapsed();
        log::info!(
            "✅ Tract backend initialized in {}ms",
            model_load_time.as_millis()
        );
        Ok(model_load_time)
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }
        self.load_model().map(Some)
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| ComposeError::segmentation("Tract model not initialized"))?;

        log::debug!("🔮 Running tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let outputs = model
            .run(tvec![Tensor::from(input.clone()).into()])
            .map_err(|e| ComposeError::segmentation(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| ComposeError::segmentation("No output tensor found"))?
            .into_arc_tensor();
        let output_view = output_tensor.to_array_view::<f32>().map_err(|e| {
            ComposeError::segmentation(format!("Failed to convert output tensor: {e}"))
        })?;

        let output = output_view
            .to_owned()
            .into_dimensionality::<ndarray::Ix4>()
            .map_err(|e| {
                ComposeError::segmentation(format!(
                    "Expected 4D output tensor, got {:?}: {e}",
                    output_tensor.shape()
                ))
            })?;

        log::debug!(
            "✅ Tract inference completed in {}ms, output {:?}",
            inference_start.elapsed().as_millis(),
            output.shape()
        );
        Ok(output)
    }

    fn preprocessing_config(&self) -> PreprocessingConfig {
        self.preprocessing
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }
}
