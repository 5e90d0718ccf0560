//! Contracts of the external collaborators.
//!
//! The core never talks to a camera, model, chat bot, door or bucket
//! directly. Implement these traits to connect real services.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::warn;

use crate::dispatcher::AnalysisResult;
use crate::error::{ActuatorError, ArchiveError, ClassifierError, NotifyError};
use crate::tracker::{Position, TrackId};

/// Remote prey classifier: JPEG bytes in, verdict out.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn analyze(&self, image_jpeg: &[u8]) -> Result<AnalysisResult, ClassifierError>;
}

/// Physical door lock. Both operations are idempotent.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn lock(&self) -> Result<(), ActuatorError>;
    async fn unlock(&self) -> Result<(), ActuatorError>;
}

/// Operator-facing alerts. Best effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        notification: Notification,
        image_jpeg: Option<Vec<u8>>,
    ) -> Result<(), NotifyError>;
}

/// Long-term image storage. Best effort, off the hot path.
#[async_trait]
pub trait Archiver: Send + Sync {
    async fn persist(&self, image_jpeg: Vec<u8>, category: ArchiveCategory)
    -> Result<(), ArchiveError>;
}

/// Flap motion sensor. Reports when the flap last swung.
pub trait FlapSensor: Send + Sync {
    fn last_flap(&self) -> Option<Instant>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveCategory {
    /// Crop that was sent to the classifier
    Analysis,
    /// Crop the classifier flagged as carrying prey
    Prey,
    /// Best crop of a finalized track
    Detection,
}

impl ArchiveCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveCategory::Analysis => "analysis",
            ArchiveCategory::Prey => "prey",
            ArchiveCategory::Detection => "detection",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorAction {
    Lock,
    Unlock,
}

impl fmt::Display for ActuatorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorAction::Lock => f.write_str("lock"),
            ActuatorAction::Unlock => f.write_str("unlock"),
        }
    }
}

/// Something the operator should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Positive analysis. `lock_note` describes what the door did.
    PreyDetected {
        track_id: TrackId,
        position: Position,
        message: String,
        lock_note: String,
    },
    /// Negative (or failed) analysis of a qualifying track.
    ObjectObserved {
        track_id: TrackId,
        label: String,
        position: Position,
        message: String,
    },
    /// Routine summary of a track that left the scene.
    TrackFinalized {
        track_id: TrackId,
        label: String,
        hits: u32,
        observed_for: Duration,
        best_score: f32,
    },
    Unlocked {
        reason: String,
    },
    /// The door may not be in the state the controller believes.
    ActuatorFailure {
        action: ActuatorAction,
        error: String,
    },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::PreyDetected {
                message, lock_note, ..
            } => write!(f, "CAT WITH PREY DETECTED: {message}\n{lock_note}"),
            Notification::ObjectObserved {
                label, position, ..
            } => write!(f, "{label} observed ({position}), no prey"),
            Notification::TrackFinalized {
                label,
                hits,
                observed_for,
                best_score,
                ..
            } => write!(
                f,
                "{label} seen {hits} times over {:.1}s (best confidence {best_score:.2})",
                observed_for.as_secs_f64()
            ),
            Notification::Unlocked { reason } => write!(f, "Door unlocked: {reason}"),
            Notification::ActuatorFailure { action, error } => {
                write!(f, "Warning: door {action} failed, physical state unknown: {error}")
            }
        }
    }
}

/// Deliver without waiting; failures are logged and dropped.
pub fn notify_in_background(
    notifier: &Arc<dyn Notifier>,
    notification: Notification,
    image_jpeg: Option<Vec<u8>>,
) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(notification, image_jpeg).await {
            warn!(error = %e, "Notifier failed");
        }
    });
}

/// Persist without waiting; failures are logged and dropped.
pub fn archive_in_background(
    archiver: &Arc<dyn Archiver>,
    image_jpeg: Vec<u8>,
    category: ArchiveCategory,
) {
    let archiver = Arc::clone(archiver);
    tokio::spawn(async move {
        if let Err(e) = archiver.persist(image_jpeg, category).await {
            warn!(error = %e, category = category.as_str(), "Archiver failed");
        }
    });
}
