//! Subject segmentation and its asynchronous orchestration
//!
//! A [`SegmentationBackend`] turns a photo into a confidence [`Mask`]. The
//! [`SegmentationOrchestrator`] runs one backend call per edit session on a
//! tokio task, applies the mask off the UI task, and reports back with a
//! [`SegmentationOutcome`] message tagged with the session id.

use crate::{
    config::ComposeConfig,
    error::{ComposeError, Result},
    mask::MaskApplicator,
    types::{Mask, MaskStatistics, RasterImage},
};
use async_trait::async_trait;
use instant::Instant;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub mod mask_file;
pub mod tensor;
pub mod test_utils;
#[cfg(feature = "tract")]
pub mod tract;

pub use mask_file::MaskFileSegmenter;
pub use tensor::{InferenceBackend, PreprocessingConfig, TensorSegmenter};
#[cfg(feature = "tract")]
pub use tract::TractBackend;

/// Segmentation collaborator: photo in, per-pixel subject confidence out
#[async_trait]
pub trait SegmentationBackend: Send + Sync {
    /// Produce a confidence mask for `image`
    ///
    /// The mask grid may differ from the image size; it is resampled when
    /// applied.
    async fn segment(&self, image: &RasterImage) -> Result<Mask>;

    /// Short name for logs
    fn name(&self) -> &str {
        "segmentation"
    }
}

/// Lifecycle of the single segmentation request of an edit session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentationState {
    #[default]
    Idle,
    Requested,
    Succeeded,
    Failed,
}

impl SegmentationState {
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Successful result computed on the worker
#[derive(Debug, Clone)]
pub struct SegmentedForeground {
    /// Source photo with mask-derived alpha, at source resolution
    pub image: RasterImage,
    pub mask_statistics: MaskStatistics,
    pub segmentation_ms: u64,
    pub mask_application_ms: u64,
}

/// Message delivered to the session that requested segmentation
#[derive(Debug)]
pub struct SegmentationOutcome {
    pub session_id: Uuid,
    pub result: Result<SegmentedForeground>,
}

/// Runs segmentation requests on worker tasks
#[derive(Debug, Clone, Default)]
pub struct SegmentationOrchestrator {
    applicator: MaskApplicator,
    timeout: Option<Duration>,
}

impl SegmentationOrchestrator {
    #[must_use]
    pub fn new(applicator: MaskApplicator, timeout: Option<Duration>) -> Self {
        Self {
            applicator,
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &ComposeConfig) -> Self {
        Self::new(
            MaskApplicator::new(config.mask_filter),
            config.segmentation_timeout(),
        )
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Segment `source` and apply the mask, failing on timeout
    ///
    /// Every failure is reported as [`ComposeError::Segmentation`] so callers
    /// can fall back to the original photo.
    pub async fn run(
        &self,
        source: &RasterImage,
        backend: &dyn SegmentationBackend,
    ) -> Result<SegmentedForeground> {
        let segmentation_start = Instant::now();
        let request = backend.segment(source);
        let mask = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, request).await.map_err(|_| {
                ComposeError::segmentation(format!(
                    "{} did not answer within {}ms",
                    backend.name(),
                    limit.as_millis()
                ))
            })?,
            None => request.await,
        }
        .map_err(into_segmentation_error)?;
        let segmentation_ms = segmentation_start.elapsed().as_millis() as u64;

        let mask_statistics = mask.statistics();
        debug!(
            backend = backend.name(),
            mask = %format!("{}x{}", mask.width(), mask.height()),
            foreground_ratio = mask_statistics.foreground_ratio,
            "mask received in {}ms",
            segmentation_ms
        );

        let application_start = Instant::now();
        let applicator = self.applicator;
        let source = source.clone();
        let image = tokio::task::spawn_blocking(move || applicator.apply(&source, &mask))
            .await
            .map_err(|e| ComposeError::segmentation(format!("Mask application failed: {}", e)))?;

        Ok(SegmentedForeground {
            image,
            mask_statistics,
            segmentation_ms,
            mask_application_ms: application_start.elapsed().as_millis() as u64,
        })
    }

    /// Run [`Self::run`] on a new task and send the outcome to `outcomes`
    ///
    /// Nothing is sent once `cancel` fires; a closed receiver is ignored.
    pub fn spawn(
        &self,
        session_id: Uuid,
        source: RasterImage,
        backend: Arc<dyn SegmentationBackend>,
        cancel: CancellationToken,
        outcomes: mpsc::UnboundedSender<SegmentationOutcome>,
    ) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let span = info_span!("segmentation", session_id = %session_id, backend = backend.name());

        tokio::spawn(
            async move {
                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!("segmentation cancelled before completion");
                        return;
                    }
                    result = orchestrator.run(&source, backend.as_ref()) => result,
                };

                if let Err(ref e) = result {
                    warn!(error = %e, "segmentation failed, original photo stays active");
                }
                if outcomes.send(SegmentationOutcome { session_id, result }).is_err() {
                    debug!("session dropped before segmentation outcome was delivered");
                }
            }
            .instrument(span),
        )
    }
}

fn into_segmentation_error(error: ComposeError) -> ComposeError {
    match error {
        ComposeError::Segmentation(_) => error,
        other => ComposeError::segmentation(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::test_utils::{DelayedSegmenter, FailingSegmenter, FixedMaskSegmenter};
    use image::Rgba;

    fn photo() -> RasterImage {
        RasterImage::from_pixel(20, 10, Rgba([40, 80, 120, 255]))
    }

    #[tokio::test]
    async fn test_run_applies_mask() {
        let backend = FixedMaskSegmenter::new(Mask::uniform(8, 8, 0.5).unwrap());
        let result = SegmentationOrchestrator::default()
            .run(&photo(), &backend)
            .await
            .unwrap();

        assert_eq!(result.image.dimensions(), (20, 10));
        assert!(result.image.as_rgba().pixels().all(|p| p[3] == 128));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_backend_errors_become_segmentation_errors() {
        let backend = FailingSegmenter::with_error(ComposeError::internal("model missing"));
        let err = SegmentationOrchestrator::default()
            .run(&photo(), &backend)
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails() {
        let backend = DelayedSegmenter::new(
            Arc::new(FixedMaskSegmenter::new(Mask::uniform(2, 2, 1.0).unwrap())),
            Duration::from_secs(30),
        );
        let orchestrator =
            SegmentationOrchestrator::new(MaskApplicator::default(), Some(Duration::from_secs(1)));

        let err = orchestrator.run(&photo(), &backend).await.unwrap_err();
        assert!(matches!(err, ComposeError::Segmentation(_)));
    }

    #[tokio::test]
    async fn test_spawn_delivers_tagged_outcome() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session_id = Uuid::new_v4();
        let backend: Arc<dyn SegmentationBackend> =
            Arc::new(FixedMaskSegmenter::new(Mask::uniform(4, 4, 1.0).unwrap()));

        SegmentationOrchestrator::default()
            .spawn(session_id, photo(), backend, CancellationToken::new(), tx)
            .await
            .unwrap();

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.session_id, session_id);
        assert!(outcome.result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_sends_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let backend: Arc<dyn SegmentationBackend> = Arc::new(DelayedSegmenter::new(
            Arc::new(FixedMaskSegmenter::new(Mask::uniform(4, 4, 1.0).unwrap())),
            Duration::from_secs(5),
        ));

        let handle = SegmentationOrchestrator::default().spawn(
            Uuid::new_v4(),
            photo(),
            backend,
            cancel.clone(),
            tx,
        );
        cancel.cancel();
        handle.await.unwrap();

        assert!(rx.recv().await.is_none());
    }
}
