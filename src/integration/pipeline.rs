//! PreyPipeline: the per-frame loop tying detection, tracking, analysis and
//! the door lock together.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::GuardConfig;
use crate::dispatcher::{AnalysisDispatcher, AnalysisTask, DispatcherStats, SubmitOutcome};
use crate::error::Result;
use crate::imaging;
use crate::integration::{DetectionSource, Frame, FrameSource};
use crate::lock::{LockController, LockHandle, LockReport, LockStatus};
use crate::ports::{
    Actuator, ArchiveCategory, Archiver, Classifier, FlapSensor, Notification, Notifier,
    archive_in_background, notify_in_background,
};
use crate::tracker::{ObjectTracker, Position, TrackEvent, TrackedObject};

/// Which tracks are worth a classifier call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Labels that can carry prey.
    pub qualifying_classes: Vec<String>,
    /// Confident detections a track needs before it is analyzed.
    pub min_qualifying_hits: u32,
    /// Positions allowed to trigger analysis; empty allows all.
    pub allowed_positions: Vec<Position>,
    /// Send a summary when a track is finalized.
    pub notify_expired: bool,
    /// Seconds after a flap swing during which no track is analyzed. Zero
    /// disables the check.
    pub recent_exit_secs: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            qualifying_classes: vec!["cat".to_string()],
            min_qualifying_hits: 1,
            allowed_positions: Vec::new(),
            notify_expired: true,
            recent_exit_secs: 180.0,
        }
    }
}

impl PipelineConfig {
    pub fn qualifies(&self, track: &TrackedObject) -> bool {
        self.qualifying_classes.iter().any(|c| *c == track.label)
            && track.confident_hits >= self.min_qualifying_hits
    }

    pub fn position_allowed(&self, position: Position) -> bool {
        self.allowed_positions.is_empty() || self.allowed_positions.contains(&position)
    }

    pub fn recent_exit(&self) -> Duration {
        Duration::try_from_secs_f64(self.recent_exit_secs).unwrap_or(Duration::ZERO)
    }

    /// True while `now` is within the recent-exit window of the last flap swing.
    pub fn just_exited(&self, last_flap: Option<Instant>, now: Instant) -> bool {
        let window = self.recent_exit();
        match last_flap {
            Some(flap) if !window.is_zero() => now.saturating_duration_since(flap) < window,
            _ => false,
        }
    }
}

/// External services the pipeline drives.
pub struct Collaborators {
    pub classifier: Arc<dyn Classifier>,
    pub actuator: Arc<dyn Actuator>,
    pub notifier: Arc<dyn Notifier>,
    pub archiver: Option<Arc<dyn Archiver>>,
    pub flap_sensor: Option<Arc<dyn FlapSensor>>,
}

/// What happened to one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub frame_id: u64,
    pub detections: usize,
    pub events: Vec<TrackEvent>,
    /// Tracks handed to the dispatcher and accepted.
    pub submitted: usize,
    /// Qualifying tracks skipped because the door is locked.
    pub skipped_paused: usize,
    /// Qualifying tracks skipped because the flap swung moments ago.
    pub skipped_recent_exit: usize,
}

/// A combined pipeline that bundles detection inference with tracking,
/// prey analysis and the door lock.
///
/// Frames are processed one at a time; classifier calls run in the
/// background and never block the loop.
pub struct PreyPipeline<D: DetectionSource> {
    detector: D,
    tracker: ObjectTracker,
    dispatcher: AnalysisDispatcher,
    lock: LockHandle,
    notifier: Arc<dyn Notifier>,
    archiver: Option<Arc<dyn Archiver>>,
    flap_sensor: Option<Arc<dyn FlapSensor>>,
    config: PipelineConfig,
    max_image_side: u32,
    snapshot: watch::Sender<Option<Frame>>,
}

impl<D: DetectionSource> PreyPipeline<D> {
    /// Start the lock controller and the dispatcher, then wire them to the
    /// detector. Must be called inside a tokio runtime.
    pub fn new(detector: D, config: GuardConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let Collaborators {
            classifier,
            actuator,
            notifier,
            archiver,
            flap_sensor,
        } = collaborators;

        let lock = LockController::spawn(config.lock, actuator, Arc::clone(&notifier));
        let max_image_side = config.dispatcher.max_image_side;
        let dispatcher = AnalysisDispatcher::new(
            config.dispatcher,
            classifier,
            lock.clone(),
            Arc::clone(&notifier),
            archiver.clone(),
        );
        let (snapshot, _) = watch::channel(None);

        Ok(Self {
            detector,
            tracker: ObjectTracker::new(config.tracker),
            dispatcher,
            lock,
            notifier,
            archiver,
            flap_sensor,
            config: config.pipeline,
            max_image_side,
            snapshot,
        })
    }

    /// Handle for manual commands and status queries.
    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            lock: self.lock.clone(),
            snapshot: self.snapshot.subscribe(),
            max_image_side: self.max_image_side,
        }
    }

    /// Process a single frame.
    ///
    /// Runs detection, feeds the tracker, submits qualifying tracks for
    /// analysis and reports finalized ones.
    pub async fn process_frame(&mut self, frame: Frame) -> std::result::Result<FrameReport, D::Error> {
        self.snapshot.send_replace(Some(frame.clone()));

        let detections = self.detector.detect(&frame)?;
        let mut report = FrameReport {
            frame_id: frame.frame_id,
            detections: detections.len(),
            ..Default::default()
        };

        let events = self.tracker.update(detections, frame.timestamp);
        for event in &events {
            match event {
                TrackEvent::Created(track) | TrackEvent::Updated(track) => {
                    self.consider(track, &frame, &mut report).await;
                }
                TrackEvent::Expired(track) => self.finalize(track),
            }
        }
        report.events = events;
        Ok(report)
    }

    async fn consider(&self, track: &TrackedObject, frame: &Frame, report: &mut FrameReport) {
        if !self.config.qualifies(track) {
            return;
        }
        if self.lock.is_paused() {
            report.skipped_paused += 1;
            return;
        }
        let last_flap = self.flap_sensor.as_ref().and_then(|sensor| sensor.last_flap());
        if self.config.just_exited(last_flap, frame.timestamp) {
            report.skipped_recent_exit += 1;
            debug!(track_id = %track.id, "Cat just went out, skipping analysis");
            return;
        }
        let position = Position::of(&track.bbox, frame.width());
        if !self.config.position_allowed(position) {
            debug!(track_id = %track.id, %position, "Position not monitored");
            return;
        }

        let task = AnalysisTask::new(track.id, track.label.clone(), Arc::clone(&track.best_crop), position);
        match self.dispatcher.submit(task).await {
            Ok(SubmitOutcome::Queued) => report.submitted += 1,
            Ok(SubmitOutcome::Paused) => report.skipped_paused += 1,
            Ok(_) => {}
            Err(e) => error!(track_id = %track.id, error = %e, "Could not submit analysis"),
        }
    }

    fn finalize(&self, track: &TrackedObject) {
        self.dispatcher.forget(track.id);

        let needs_image = self.config.notify_expired || self.archiver.is_some();
        let jpeg = if needs_image && track.best_crop.width() > 0 && track.best_crop.height() > 0 {
            match imaging::encode_bounded_jpeg(&track.best_crop, self.max_image_side) {
                Ok(jpeg) => Some(jpeg),
                Err(e) => {
                    warn!(track_id = %track.id, error = %e, "Could not encode best crop");
                    None
                }
            }
        } else {
            None
        };

        if let (Some(archiver), Some(jpeg)) = (&self.archiver, &jpeg) {
            archive_in_background(archiver, jpeg.clone(), ArchiveCategory::Detection);
        }
        if self.config.notify_expired {
            notify_in_background(
                &self.notifier,
                Notification::TrackFinalized {
                    track_id: track.id,
                    label: track.label.clone(),
                    hits: track.hits,
                    observed_for: track.observed_for(),
                    best_score: track.best_score,
                },
                jpeg,
            );
        }
    }

    /// Pull frames until the source runs dry.
    ///
    /// Detector failures skip the frame; a frame source failure ends the
    /// loop. Returns the number of frames processed.
    pub async fn run<S>(&mut self, source: &mut S) -> std::result::Result<u64, S::Error>
    where
        S: FrameSource,
        S::Error: fmt::Display,
        D::Error: fmt::Display,
    {
        let mut processed = 0;
        loop {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!(frames = processed, "Frame source finished");
                    return Ok(processed);
                }
                Err(e) => {
                    error!(error = %e, "Frame source failed");
                    return Err(e);
                }
            };
            let frame_id = frame.frame_id;
            match self.process_frame(frame).await {
                Ok(report) => {
                    processed += 1;
                    debug!(
                        frame_id,
                        detections = report.detections,
                        events = report.events.len(),
                        submitted = report.submitted,
                        "Processed frame"
                    );
                }
                Err(e) => warn!(frame_id, error = %e, "Detection failed, skipping frame"),
            }
        }
    }

    pub fn tracker(&self) -> &ObjectTracker {
        &self.tracker
    }

    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    /// Wait for outstanding analysis to finish. The lock controller keeps
    /// running while any [`PipelineHandle`] is alive.
    pub async fn shutdown(self) {
        self.dispatcher.shutdown().await;
        info!("Pipeline stopped");
    }
}

/// Operations exposed to the command layer.
#[derive(Clone)]
pub struct PipelineHandle {
    lock: LockHandle,
    snapshot: watch::Receiver<Option<Frame>>,
    max_image_side: u32,
}

impl PipelineHandle {
    pub async fn lock(&self, reason: impl Into<String>) -> Result<LockReport> {
        self.lock.lock(reason).await
    }

    pub async fn unlock(&self, reason: impl Into<String>) -> Result<LockReport> {
        self.lock.unlock(reason).await
    }

    pub async fn status(&self) -> Result<LockStatus> {
        self.lock.status().await
    }

    /// Most recent frame seen by the pipeline.
    pub fn capture_snapshot(&self) -> Option<Frame> {
        self.snapshot.borrow().clone()
    }

    /// Most recent frame, bounded and JPEG-encoded.
    pub fn capture_snapshot_jpeg(&self) -> Result<Option<Vec<u8>>> {
        match self.capture_snapshot() {
            Some(frame) => Ok(Some(imaging::encode_bounded_jpeg(&frame.image, self.max_image_side)?)),
            None => Ok(None),
        }
    }
}
