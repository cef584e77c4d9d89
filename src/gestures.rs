//! Gesture events and the transform state they drive
//!
//! Gesture recognisers (pinch and drag) run wherever the platform delivers
//! input and push discrete [`GestureEvent`]s through a [`GestureSender`].
//! The task that owns the edit session drains the queue in arrival order and
//! applies each event to its [`TransformState`] immediately.
//!
//! Priority rule: while a scale gesture is in progress, pointer moves do not
//! translate the layer. The last pointer position still tracks those moves so
//! the drag resumes from where the finger is once the pinch ends.

use crate::transform::AffineTransform;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// One discrete input from a gesture recogniser
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GestureEvent {
    /// A pinch gesture started
    ScaleBegin,
    /// Incremental pinch update: scale by `factor` about the focus point
    Scale {
        factor: f64,
        focus_x: f64,
        focus_y: f64,
    },
    /// The pinch gesture ended
    ScaleEnd,
    /// First pointer went down
    PointerDown { x: f64, y: f64 },
    /// Pointer moved
    PointerMove { x: f64, y: f64 },
    /// Pointer lifted
    PointerUp,
    /// Platform cancelled the touch sequence
    PointerCancel,
}

/// Foreground placement mutated by gesture events
#[derive(Debug, Clone, Default)]
pub struct TransformState {
    transform: AffineTransform,
    scale_in_progress: bool,
    dragging: bool,
    last_pointer: (f64, f64),
    applied_events: u64,
}

impl TransformState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current transform
    #[must_use]
    pub fn transform(&self) -> AffineTransform {
        self.transform
    }

    #[must_use]
    pub fn is_scaling(&self) -> bool {
        self.scale_in_progress
    }

    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Number of events applied since creation or the last reset
    #[must_use]
    pub fn applied_events(&self) -> u64 {
        self.applied_events
    }

    /// Apply a single event
    ///
    /// Non-finite or non-positive scale factors are ignored so the transform
    /// stays invertible.
    pub fn apply(&mut self, event: GestureEvent) {
        self.applied_events += 1;
        match event {
            GestureEvent::ScaleBegin => self.scale_in_progress = true,
            GestureEvent::Scale {
                factor,
                focus_x,
                focus_y,
            } => {
                if factor.is_finite() && factor > 0.0 {
                    self.transform.post_scale(factor, factor, focus_x, focus_y);
                    trace!(factor, focus_x, focus_y, "scale applied");
                }
            },
            GestureEvent::ScaleEnd => self.scale_in_progress = false,
            GestureEvent::PointerDown { x, y } => {
                self.last_pointer = (x, y);
                self.dragging = true;
            },
            GestureEvent::PointerMove { x, y } => {
                if self.dragging && !self.scale_in_progress {
                    let (dx, dy) = (x - self.last_pointer.0, y - self.last_pointer.1);
                    self.transform.post_translate(dx, dy);
                    trace!(dx, dy, "translation applied");
                }
                self.last_pointer = (x, y);
            },
            GestureEvent::PointerUp | GestureEvent::PointerCancel => self.dragging = false,
        }
    }

    /// Apply every queued event, returning how many were applied
    pub fn drain(&mut self, queue: &mut GestureQueue) -> usize {
        let mut applied = 0;
        while let Ok(event) = queue.receiver.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Back to identity with no gesture in progress
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Producer side of the gesture queue; cheap to clone per recogniser
#[derive(Debug, Clone)]
pub struct GestureSender {
    sender: mpsc::UnboundedSender<GestureEvent>,
}

impl GestureSender {
    /// Queue an event; returns `false` once the session side is gone
    pub fn send(&self, event: GestureEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn scale(&self, factor: f64, focus_x: f64, focus_y: f64) -> bool {
        self.send(GestureEvent::Scale {
            factor,
            focus_x,
            focus_y,
        })
    }

    /// Queue a complete pinch: begin, one update, end
    pub fn pinch(&self, factor: f64, focus_x: f64, focus_y: f64) -> bool {
        self.send(GestureEvent::ScaleBegin)
            && self.scale(factor, focus_x, focus_y)
            && self.send(GestureEvent::ScaleEnd)
    }

    /// Queue a complete single-pointer drag from `from` to `to`
    pub fn drag(&self, from: (f64, f64), to: (f64, f64)) -> bool {
        self.send(GestureEvent::PointerDown {
            x: from.0,
            y: from.1,
        }) && self.send(GestureEvent::PointerMove { x: to.0, y: to.1 })
            && self.send(GestureEvent::PointerUp)
    }
}

/// Single-consumer side of the gesture queue
#[derive(Debug)]
pub struct GestureQueue {
    receiver: mpsc::UnboundedReceiver<GestureEvent>,
}

impl GestureQueue {
    /// Wait for the next event (for event-loop style consumers)
    pub async fn recv(&mut self) -> Option<GestureEvent> {
        self.receiver.recv().await
    }
}

/// Create a connected sender/queue pair
#[must_use]
pub fn gesture_channel() -> (GestureSender, GestureQueue) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (GestureSender { sender }, GestureQueue { receiver })
}
