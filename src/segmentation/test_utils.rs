//! Test doubles for the segmentation collaborator
//!
//! Deterministic stand-ins for a real model: a fixed mask, a failure, an
//! artificial delay and a mock tensor backend.

use super::{
    tensor::{InferenceBackend, PreprocessingConfig},
    SegmentationBackend,
};
use crate::{
    error::{ComposeError, Result},
    types::{Mask, RasterImage},
};
use async_trait::async_trait;
use instant::Duration;
use ndarray::Array4;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Always answers with the same mask
#[derive(Debug, Clone)]
pub struct FixedMaskSegmenter {
    mask: Mask,
    calls: Arc<AtomicUsize>,
}

impl FixedMaskSegmenter {
    #[must_use]
    pub fn new(mask: Mask) -> Self {
        Self {
            mask,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `segment` calls so far (shared between clones)
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SegmentationBackend for FixedMaskSegmenter {
    async fn segment(&self, _image: &RasterImage) -> Result<Mask> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.mask.clone())
    }

    fn name(&self) -> &str {
        "fixed-mask"
    }
}

/// Always fails
#[derive(Debug)]
pub struct FailingSegmenter {
    message: String,
    kind: FailureKind,
}

#[derive(Debug, Clone, Copy)]
enum FailureKind {
    Segmentation,
    Internal,
}

impl FailingSegmenter {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Segmentation,
        }
    }

    /// Fail with a non-segmentation error variant
    #[must_use]
    pub fn with_error(error: ComposeError) -> Self {
        let kind = if matches!(error, ComposeError::Segmentation(_)) {
            FailureKind::Segmentation
        } else {
            FailureKind::Internal
        };
        Self {
            message: error.to_string(),
            kind,
        }
    }
}

#[async_trait]
impl SegmentationBackend for FailingSegmenter {
    async fn segment(&self, _image: &RasterImage) -> Result<Mask> {
        Err(match self.kind {
            FailureKind::Segmentation => ComposeError::segmentation(self.message.clone()),
            FailureKind::Internal => ComposeError::internal(self.message.clone()),
        })
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Delegates to another backend after sleeping on the tokio clock
pub struct DelayedSegmenter {
    inner: Arc<dyn SegmentationBackend>,
    delay: Duration,
}

impl DelayedSegmenter {
    #[must_use]
    pub fn new(inner: Arc<dyn SegmentationBackend>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl SegmentationBackend for DelayedSegmenter {
    async fn segment(&self, image: &RasterImage) -> Result<Mask> {
        tokio::time::sleep(self.delay).await;
        self.inner.segment(image).await
    }

    fn name(&self) -> &str {
        "delayed"
    }
}

/// Mock tensor backend producing a constant `(1, 1, 32, 32)` output
#[derive(Debug)]
pub struct MockInferenceBackend {
    value: f32,
    initialized: bool,
    should_fail_inference: bool,
    initializations: Arc<AtomicUsize>,
}

impl MockInferenceBackend {
    pub const OUTPUT_SIZE: usize = 32;

    #[must_use]
    pub fn new(value: f32) -> Self {
        Self {
            value,
            initialized: false,
            should_fail_inference: false,
            initializations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A backend whose inference always fails
    #[must_use]
    pub fn failing() -> Self {
        let mut backend = Self::new(0.0);
        backend.should_fail_inference = true;
        backend
    }

    /// Shared counter of `initialize` calls that loaded the "model"
    #[must_use]
    pub fn initialization_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.initializations)
    }
}

impl InferenceBackend for MockInferenceBackend {
    fn initialize(&mut self) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        self.initializations.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.initialized {
            return Err(ComposeError::segmentation("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(ComposeError::segmentation("Mock inference failure"));
        }
        if input.shape()[1] != 3 {
            return Err(ComposeError::segmentation("Mock backend expects 3 channels"));
        }
        Ok(Array4::from_elem(
            (1, 1, Self::OUTPUT_SIZE, Self::OUTPUT_SIZE),
            self.value,
        ))
    }

    fn preprocessing_config(&self) -> PreprocessingConfig {
        PreprocessingConfig {
            target_size: [64, 64],
            ..PreprocessingConfig::default()
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
