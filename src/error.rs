//! Error types.

use thiserror::Error;

/// Failure reported by the remote prey classifier.
#[derive(Debug, Clone, Error)]
pub enum ClassifierError {
    /// Network or timeout failure; worth retrying.
    #[error("transient classifier failure: {0}")]
    Transient(String),
    /// The service answered but refused the request.
    #[error("classifier rejected request: {0}")]
    Rejected(String),
}

impl ClassifierError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClassifierError::Transient(_))
    }
}

/// Transport failure from the lock actuator.
#[derive(Debug, Clone, Error)]
#[error("actuator error: {0}")]
pub struct ActuatorError(pub String);

/// Delivery failure from the notifier.
#[derive(Debug, Clone, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Failure writing an image to the archive.
#[derive(Debug, Clone, Error)]
#[error("archive failed: {0}")]
pub struct ArchiveError(pub String);

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("analysis dispatcher is shut down")]
    DispatcherClosed,

    #[error("lock controller is not running")]
    LockControllerClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
