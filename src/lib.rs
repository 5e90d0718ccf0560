//! Event tracking and decision pipeline for a camera-watched cat flap.
//!
//! Detections are associated into tracks, qualifying tracks are sent to a
//! remote prey classifier, and a positive verdict locks the door for a
//! fixed time while further analysis is suspended.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod imaging;
pub mod integration;
pub mod lock;
pub mod logging;
pub mod ports;
pub mod similarity;
pub mod tracker;

pub use config::GuardConfig;
pub use dispatcher::{
    AnalysisDispatcher, AnalysisResult, AnalysisTask, DispatcherConfig, DispatcherStats,
    FailurePolicy, SubmitOutcome,
};
pub use error::{ActuatorError, ArchiveError, ClassifierError, Error, NotifyError, Result};
pub use integration::{
    Collaborators, DetectionBuilder, DetectionSource, Frame, FrameReport, FrameSource,
    PipelineConfig, PipelineHandle, PreyPipeline,
};
pub use lock::{
    LockConfig, LockController, LockHandle, LockMode, LockOutcome, LockReport, LockStatus,
    LockTrigger, PauseFlag,
};
pub use ports::{
    ActuatorAction, Actuator, ArchiveCategory, Archiver, Classifier, FlapSensor, Notification,
    Notifier,
};
pub use similarity::{SimilarityGate, structural_similarity};
pub use tracker::{
    Crop, Detection, ObjectTracker, Position, Rect, TrackEvent, TrackId, TrackState, TrackedObject,
    TrackerConfig,
};
