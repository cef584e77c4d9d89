//! Edit session: one photo from load to saved composition
//!
//! The session is owned by a single task and mutated through `&mut self`.
//! Gesture recognisers and the segmentation worker talk to it only through
//! message queues, drained by [`EditSession::poll`].

use crate::{
    compositor::{CompositionInput, Compositor},
    config::ComposeConfig,
    error::{ComposeError, Result},
    gestures::{gesture_channel, GestureQueue, GestureSender, TransformState},
    segmentation::{
        SegmentationBackend, SegmentationOrchestrator, SegmentationOutcome, SegmentationState,
    },
    services::{ImageIOService, OutputPathAllocator},
    transform::AffineTransform,
    types::{CompositionMetadata, CompositionTimings, ComposedResult, MaskStatistics, RasterImage},
};
use instant::Instant;
use std::{path::Path, path::PathBuf, sync::Arc};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// What a call to [`EditSession::poll`] changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub gestures_applied: usize,
    /// Segmentation finished during this poll
    pub segmentation_finished: bool,
    /// Outcomes discarded because they belonged to another or a closed session
    pub outcomes_dropped: usize,
}

/// Failure of [`EditSession::save`]
///
/// `result` holds the composed image when composing succeeded and only the
/// write failed.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct SaveError {
    #[source]
    pub error: ComposeError,
    pub result: Option<ComposedResult>,
}

impl From<SaveError> for ComposeError {
    fn from(error: SaveError) -> Self {
        error.error
    }
}

/// Mutable state of one edit flow
pub struct EditSession {
    id: Uuid,
    config: ComposeConfig,
    original: RasterImage,
    segmented: Option<RasterImage>,
    background: Option<RasterImage>,
    transform: TransformState,
    gesture_sender: GestureSender,
    gesture_queue: GestureQueue,
    opacity: f32,
    segmentation_state: SegmentationState,
    mask_statistics: Option<MaskStatistics>,
    timings: CompositionTimings,
    active: bool,
    cancel: CancellationToken,
    orchestrator: SegmentationOrchestrator,
    outcome_sender: mpsc::UnboundedSender<SegmentationOutcome>,
    outcome_receiver: mpsc::UnboundedReceiver<SegmentationOutcome>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for EditSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditSession")
            .field("id", &self.id)
            .field("original", &self.original.dimensions())
            .field("segmented", &self.segmented.is_some())
            .field("background", &self.background.as_ref().map(RasterImage::dimensions))
            .field("opacity", &self.opacity)
            .field("segmentation_state", &self.segmentation_state)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl EditSession {
    /// Start a session for an already decoded photo
    ///
    /// # Errors
    /// Invalid configuration
    pub fn new(original: RasterImage, config: ComposeConfig) -> Result<Self> {
        config.validate()?;
        let (gesture_sender, gesture_queue) = gesture_channel();
        let (outcome_sender, outcome_receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        info!(
            session_id = %id,
            photo = %format!("{}x{}", original.width(), original.height()),
            "edit session started"
        );

        Ok(Self {
            id,
            orchestrator: SegmentationOrchestrator::from_config(&config),
            opacity: config.default_opacity,
            config,
            original,
            segmented: None,
            background: None,
            transform: TransformState::new(),
            gesture_sender,
            gesture_queue,
            segmentation_state: SegmentationState::Idle,
            mask_statistics: None,
            timings: CompositionTimings::new(),
            active: true,
            cancel: CancellationToken::new(),
            outcome_sender,
            outcome_receiver,
            worker: None,
        })
    }

    /// Decode the photo from a file
    pub fn from_path<P: AsRef<Path>>(path: P, config: ComposeConfig) -> Result<Self> {
        Self::new(ImageIOService::load_image(path)?, config)
    }

    /// Decode the photo from encoded bytes
    pub fn from_bytes(bytes: &[u8], config: ComposeConfig) -> Result<Self> {
        Self::new(RasterImage::decode(bytes)?, config)
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn config(&self) -> &ComposeConfig {
        &self.config
    }

    #[must_use]
    pub fn original(&self) -> &RasterImage {
        &self.original
    }

    #[must_use]
    pub fn segmented(&self) -> Option<&RasterImage> {
        self.segmented.as_ref()
    }

    #[must_use]
    pub fn background(&self) -> Option<&RasterImage> {
        self.background.as_ref()
    }

    /// The segmented image once available, the original otherwise
    #[must_use]
    pub fn active_foreground(&self) -> &RasterImage {
        self.segmented.as_ref().unwrap_or(&self.original)
    }

    #[must_use]
    pub fn segmentation_state(&self) -> SegmentationState {
        self.segmentation_state
    }

    /// Statistics of the applied mask, after successful segmentation
    #[must_use]
    pub fn mask_statistics(&self) -> Option<&MaskStatistics> {
        self.mask_statistics.as_ref()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Snapshot of the foreground transform as of the last poll
    #[must_use]
    pub fn transform(&self) -> AffineTransform {
        self.transform.transform()
    }

    #[must_use]
    pub fn transform_state(&self) -> &TransformState {
        &self.transform
    }

    /// Sender for gesture recognisers; events apply on the next poll
    #[must_use]
    pub fn gesture_sender(&self) -> GestureSender {
        self.gesture_sender.clone()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(ComposeError::SessionClosed(self.id.to_string()))
        }
    }

    /// Start segmentation of the original photo on a worker task
    ///
    /// Only the first call starts work; later calls return the current state.
    ///
    /// # Errors
    /// - Session closed
    /// - No tokio runtime on the calling thread
    #[instrument(skip(self, backend), fields(session_id = %self.id))]
    pub fn request_segmentation(
        &mut self,
        backend: Arc<dyn SegmentationBackend>,
    ) -> Result<SegmentationState> {
        self.ensure_active()?;
        if self.segmentation_state != SegmentationState::Idle {
            debug!(state = ?self.segmentation_state, "segmentation already requested");
            return Ok(self.segmentation_state);
        }
        tokio::runtime::Handle::try_current().map_err(|e| {
            ComposeError::internal(format!("Segmentation needs a tokio runtime: {}", e))
        })?;

        self.worker = Some(self.orchestrator.spawn(
            self.id,
            self.original.clone(),
            backend,
            self.cancel.child_token(),
            self.outcome_sender.clone(),
        ));
        self.segmentation_state = SegmentationState::Requested;
        Ok(self.segmentation_state)
    }

    /// Apply queued gestures and any delivered segmentation outcome
    pub fn poll(&mut self) -> PollSummary {
        let mut summary = PollSummary::default();

        while let Ok(outcome) = self.outcome_receiver.try_recv() {
            if self.accept_outcome(outcome) {
                summary.segmentation_finished = true;
            } else {
                summary.outcomes_dropped += 1;
            }
        }

        if self.active {
            summary.gestures_applied = self.transform.drain(&mut self.gesture_queue);
        }
        summary
    }

    /// Wait until the requested segmentation has finished, then poll
    ///
    /// Returns immediately when nothing is in flight.
    pub async fn wait_for_segmentation(&mut self) -> SegmentationState {
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                if self.active && self.segmentation_state == SegmentationState::Requested {
                    warn!(session_id = %self.id, error = %e, "segmentation worker died");
                    self.segmentation_state = SegmentationState::Failed;
                }
            }
        }
        self.poll();
        self.segmentation_state
    }

    fn accept_outcome(&mut self, outcome: SegmentationOutcome) -> bool {
        if outcome.session_id != self.id || !self.active {
            debug!(
                session_id = %self.id,
                outcome_session = %outcome.session_id,
                active = self.active,
                "dropping segmentation outcome"
            );
            return false;
        }
        if self.segmentation_state != SegmentationState::Requested {
            debug!(session_id = %self.id, "segmentation outcome already applied");
            return false;
        }

        match outcome.result {
            Ok(foreground) => {
                info!(
                    session_id = %self.id,
                    foreground_ratio = foreground.mask_statistics.foreground_ratio,
                    "segmented foreground ready in {}ms",
                    foreground.segmentation_ms + foreground.mask_application_ms
                );
                self.timings.segmentation_ms = foreground.segmentation_ms;
                self.timings.mask_application_ms = foreground.mask_application_ms;
                self.mask_statistics = Some(foreground.mask_statistics);
                self.segmented = Some(foreground.image);
                self.segmentation_state = SegmentationState::Succeeded;
            },
            Err(e) => {
                warn!(
                    session_id = %self.id,
                    error = %e,
                    "segmentation failed, keeping the original photo"
                );
                self.segmentation_state = SegmentationState::Failed;
            },
        }
        true
    }

    /// Put `image` behind the foreground; the transform is left untouched
    pub fn set_background(&mut self, image: RasterImage) -> Result<()> {
        self.ensure_active()?;
        debug!(
            session_id = %self.id,
            background = %format!("{}x{}", image.width(), image.height()),
            "background set"
        );
        self.background = Some(image);
        Ok(())
    }

    pub fn clear_background(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.background = None;
        Ok(())
    }

    /// Set the foreground opacity, clamped to `[0, 1]`; NaN is ignored
    pub fn set_opacity(&mut self, opacity: f32) -> Result<()> {
        self.ensure_active()?;
        if !opacity.is_nan() {
            self.opacity = opacity.clamp(0.0, 1.0);
        }
        Ok(())
    }

    /// Back to the identity transform
    pub fn reset_transform(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.poll();
        self.transform.reset();
        Ok(())
    }

    /// Flatten background and foreground into a new image
    ///
    /// Pending gestures are applied first so the result matches what the
    /// user last saw. `viewport` is the canvas size used without background.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn compose(&mut self, viewport: (u32, u32)) -> Result<ComposedResult> {
        self.ensure_active()?;
        self.poll();

        let composition_start = Instant::now();
        let input = CompositionInput::new(self.active_foreground(), viewport)
            .with_background(self.background.as_ref())
            .with_transform(self.transform.transform())
            .with_opacity(self.opacity);
        let canvas = input.canvas_dimensions();
        let image = Compositor::compose(&input);

        let mut timings = self.timings.clone();
        timings.composition_ms = composition_start.elapsed().as_millis() as u64;
        timings.total_ms =
            timings.segmentation_ms + timings.mask_application_ms + timings.composition_ms;

        let metadata = CompositionMetadata {
            session_id: self.id.to_string(),
            has_background: self.background.is_some(),
            segmented: self.segmented.is_some(),
            canvas,
            timings,
        };
        Ok(ComposedResult::new(image, metadata))
    }

    /// Write a composed result to the next free output path
    ///
    /// On failure the result stays with the caller and can be written again.
    pub fn write_result(&self, result: &mut ComposedResult) -> Result<PathBuf> {
        let allocator = OutputPathAllocator::from_config(&self.config);
        let path = allocator.allocate()?;
        result.save(&path, allocator.format())?;
        Ok(path)
    }

    /// Compose and write to the next free output path
    ///
    /// When the write fails the composed image comes back inside the
    /// [`SaveError`] so it can be handed to [`Self::write_result`] again.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn save(
        &mut self,
        viewport: (u32, u32),
    ) -> std::result::Result<(PathBuf, ComposedResult), SaveError> {
        let mut result = self.compose(viewport).map_err(|error| SaveError {
            error,
            result: None,
        })?;
        match self.write_result(&mut result) {
            Ok(path) => Ok((path, result)),
            Err(error) => {
                warn!(session_id = %self.id, error = %error, "composition not written, result kept");
                Err(SaveError {
                    error,
                    result: Some(result),
                })
            },
        }
    }

    /// End the session: in-flight segmentation is cancelled and late
    /// outcomes are discarded
    pub fn close(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.cancel.cancel();
        info!(session_id = %self.id, "edit session closed");
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gestures::GestureEvent,
        segmentation::test_utils::{DelayedSegmenter, FailingSegmenter, FixedMaskSegmenter},
        types::Mask,
    };
    use image::Rgba;
    use std::time::Duration;

    fn session() -> EditSession {
        EditSession::new(
            RasterImage::from_pixel(20, 10, Rgba([90, 60, 30, 255])),
            ComposeConfig::default(),
        )
        .unwrap()
    }

    fn fixed(value: f32) -> Arc<dyn SegmentationBackend> {
        Arc::new(FixedMaskSegmenter::new(Mask::uniform(5, 5, value).unwrap()))
    }

    #[test]
    fn test_new_session_defaults() {
        let session = session();
        assert!(session.is_active());
        assert_eq!(session.segmentation_state(), SegmentationState::Idle);
        assert!(session.transform().is_identity());
        assert!(session.active_foreground().ptr_eq(session.original()));
        assert_eq!(session.opacity(), 1.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ComposeConfig {
            default_opacity: 3.0,
            ..ComposeConfig::default()
        };
        let image = RasterImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        assert!(EditSession::new(image, config).is_err());
    }

    #[tokio::test]
    async fn test_success_switches_active_foreground() {
        let mut session = session();
        session.request_segmentation(fixed(0.0)).unwrap();
        assert_eq!(
            session.wait_for_segmentation().await,
            SegmentationState::Succeeded
        );

        let foreground = session.active_foreground();
        assert_eq!(foreground.dimensions(), (20, 10));
        assert!(foreground.as_rgba().pixels().all(|p| p[3] == 0));
        assert!(session.mask_statistics().is_some());
    }

    #[tokio::test]
    async fn test_second_request_is_noop() {
        let backend = Arc::new(FixedMaskSegmenter::new(Mask::uniform(2, 2, 1.0).unwrap()));
        let mut session = session();

        session.request_segmentation(backend.clone()).unwrap();
        assert_eq!(
            session.request_segmentation(backend.clone()).unwrap(),
            SegmentationState::Requested
        );
        session.wait_for_segmentation().await;
        assert_eq!(
            session.request_segmentation(backend.clone()).unwrap(),
            SegmentationState::Succeeded
        );
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_original() {
        let mut session = session();
        session
            .request_segmentation(Arc::new(FailingSegmenter::new("no subject")))
            .unwrap();

        assert_eq!(session.wait_for_segmentation().await, SegmentationState::Failed);
        assert!(session.segmented().is_none());
        assert!(session.active_foreground().ptr_eq(session.original()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_drops_late_result() {
        let mut session = session();
        session
            .request_segmentation(Arc::new(DelayedSegmenter::new(
                fixed(1.0),
                Duration::from_secs(2),
            )))
            .unwrap();
        session.close();

        session.wait_for_segmentation().await;
        assert!(session.segmented().is_none());
        assert!(matches!(
            session.compose((10, 10)),
            Err(ComposeError::SessionClosed(_))
        ));
        assert!(session.request_segmentation(fixed(1.0)).is_err());
    }

    #[tokio::test]
    async fn test_foreign_outcome_dropped() {
        let mut session = session();
        session.segmentation_state = SegmentationState::Requested;
        session
            .outcome_sender
            .send(SegmentationOutcome {
                session_id: Uuid::new_v4(),
                result: Err(ComposeError::segmentation("not ours")),
            })
            .unwrap();

        let summary = session.poll();
        assert_eq!(summary.outcomes_dropped, 1);
        assert_eq!(session.segmentation_state(), SegmentationState::Requested);
    }

    #[test]
    fn test_request_without_runtime_fails() {
        let mut session = session();
        assert!(session.request_segmentation(fixed(1.0)).is_err());
        assert_eq!(session.segmentation_state(), SegmentationState::Idle);
    }

    #[test]
    fn test_gestures_apply_on_poll() {
        let mut session = session();
        let sender = session.gesture_sender();
        sender.send(GestureEvent::PointerDown { x: 0.0, y: 0.0 });
        sender.send(GestureEvent::PointerMove { x: 3.0, y: 4.0 });
        assert!(session.transform().is_identity());

        assert_eq!(session.poll().gestures_applied, 2);
        assert_eq!(
            session.transform(),
            AffineTransform::from_translation(3.0, 4.0)
        );

        session.reset_transform().unwrap();
        assert!(session.transform().is_identity());
    }

    #[test]
    fn test_compose_with_and_without_background() {
        let mut session = session();
        let without = session.compose((30, 30)).unwrap();
        assert_eq!(without.dimensions(), (30, 30));
        assert!(!without.metadata.has_background);

        session
            .set_background(RasterImage::from_pixel(50, 40, Rgba([0, 0, 0, 255])))
            .unwrap();
        let with = session.compose((30, 30)).unwrap();
        assert_eq!(with.dimensions(), (50, 40));
        assert!(with.metadata.has_background);
        assert_eq!(with.image.pixel(5, 5), without.image.pixel(5, 5));

        session.clear_background().unwrap();
        assert_eq!(session.compose((30, 30)).unwrap().dimensions(), (30, 30));
    }

    #[test]
    fn test_opacity_clamped() {
        let mut session = session();
        session.set_opacity(1.5).unwrap();
        assert_eq!(session.opacity(), 1.0);
        session.set_opacity(-1.0).unwrap();
        assert_eq!(session.opacity(), 0.0);
        session.set_opacity(f32::NAN).unwrap();
        assert_eq!(session.opacity(), 0.0);
    }

    #[test]
    fn test_save_writes_prefixed_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ComposeConfig::builder()
            .output_dir(dir.path())
            .build()
            .unwrap();
        let mut session =
            EditSession::new(RasterImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])), config)
                .unwrap();

        let (path, result) = session.save((4, 4)).unwrap();
        assert!(path.exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("IMG_"));
        assert!(result.metadata.timings.image_encode_ms.is_some());
    }

    #[test]
    fn test_failed_save_returns_composed_result() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"a file where the directory should be").unwrap();
        let config = ComposeConfig::builder().output_dir(&blocked).build().unwrap();
        let mut session =
            EditSession::new(RasterImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])), config)
                .unwrap();

        let err = session.save((4, 4)).unwrap_err();
        assert!(matches!(err.error, ComposeError::Io(_)));
        let mut result = err.result.expect("composed result kept");
        assert_eq!(result.dimensions(), (4, 4));

        std::fs::remove_file(&blocked).unwrap();
        let path = session.write_result(&mut result).unwrap();
        assert!(path.starts_with(&blocked));
        assert!(path.exists());
    }

    #[test]
    fn test_save_on_closed_session_has_no_result() {
        let mut session = session();
        session.close();

        let err = session.save((4, 4)).unwrap_err();
        assert!(matches!(err.error, ComposeError::SessionClosed(_)));
        assert!(err.result.is_none());
        assert!(matches!(
            ComposeError::from(err),
            ComposeError::SessionClosed(_)
        ));
    }
}
