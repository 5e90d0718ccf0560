//! Object tracker: turns per-frame detections into persistent tracks.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::tracker::matching::{self, AssignmentResult, Detection};
use crate::tracker::rect::Rect;
use crate::tracker::tracked_object::{TrackId, TrackedObject};

/// Configuration for the [`ObjectTracker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// A detection matches a track only when IoU is strictly above this.
    pub iou_threshold: f32,
    /// Seconds a track survives without a match.
    pub track_window_secs: f64,
    /// Detections at or above this confidence count towards qualification.
    pub confident_score: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            track_window_secs: 15.0,
            confident_score: 0.45,
        }
    }
}

impl TrackerConfig {
    pub fn track_window(&self) -> Duration {
        Duration::try_from_secs_f64(self.track_window_secs).unwrap_or(Duration::ZERO)
    }
}

/// Lifecycle event emitted by [`ObjectTracker::update`].
#[derive(Debug, Clone)]
pub enum TrackEvent {
    Created(TrackedObject),
    Updated(TrackedObject),
    /// Finalized track; carries its best crop.
    Expired(TrackedObject),
}

impl TrackEvent {
    pub fn track(&self) -> &TrackedObject {
        match self {
            TrackEvent::Created(t) | TrackEvent::Updated(t) | TrackEvent::Expired(t) => t,
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, TrackEvent::Expired(_))
    }
}

pub struct ObjectTracker {
    /// Live tracks, kept in creation order.
    tracks: Vec<TrackedObject>,
    next_id: u64,
    config: TrackerConfig,
    track_window: Duration,
}

impl ObjectTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let track_window = config.track_window();
        Self {
            tracks: Vec::new(),
            next_id: 1,
            config,
            track_window,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Currently live tracks, oldest first.
    pub fn live_tracks(&self) -> &[TrackedObject] {
        &self.tracks
    }

    pub fn get(&self, id: TrackId) -> Option<&TrackedObject> {
        self.tracks.iter().find(|t| t.id == id)
    }

    fn next_track_id(&mut self) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Feed one frame's detections and return the resulting track events.
    ///
    /// Tracks whose deadline has already passed at `now` are not eligible for
    /// matching; they are finalized and reported after the frame's
    /// `Created`/`Updated` events.
    pub fn update(&mut self, detections: Vec<Detection>, now: Instant) -> Vec<TrackEvent> {
        let mut events = Vec::new();

        // Step 1: Drop malformed detections
        let total = detections.len();
        let detections: Vec<Detection> = detections
            .into_iter()
            .filter(|d| !d.bbox.is_degenerate() && d.score.is_finite())
            .collect();
        if detections.len() < total {
            debug!(dropped = total - detections.len(), "Dropped degenerate detections");
        }

        // Step 2: Split off tracks that have run out of time
        let (live, mut expired): (Vec<_>, Vec<_>) = self
            .tracks
            .drain(..)
            .partition(|t| !t.is_expired_at(now));
        self.tracks = live;

        // Step 3: Greedy association, highest confidence first
        let track_boxes: Vec<Rect> = self.tracks.iter().map(|t| t.bbox).collect();
        let track_labels: Vec<&str> = self.tracks.iter().map(|t| t.label.as_str()).collect();
        let ious = matching::class_gated_iou(&track_boxes, &track_labels, &detections);
        let order = matching::confidence_order(&detections);

        let AssignmentResult {
            matches,
            unmatched_detections,
            ..
        } = matching::greedy_assignment(&ious, &order, self.config.iou_threshold);

        let mut slots: Vec<Option<Detection>> = detections.into_iter().map(Some).collect();

        for (itrack, idet) in matches {
            let Some(det) = slots[idet].take() else {
                continue;
            };
            let confident = det.score >= self.config.confident_score;
            let track = &mut self.tracks[itrack];
            track.update(det, now, self.track_window, confident);
            debug!(track_id = %track.id, label = %track.label, hits = track.hits, "Updated track");
            events.push(TrackEvent::Updated(track.clone()));
        }

        // Step 4: Unmatched detections start new tracks
        for idet in unmatched_detections {
            let Some(det) = slots[idet].take() else {
                continue;
            };
            let id = self.next_track_id();
            let confident = det.score >= self.config.confident_score;
            let track = TrackedObject::new(id, det, now, self.track_window, confident);
            info!(
                track_id = %track.id,
                label = %track.label,
                score = track.best_score,
                "Created new track"
            );
            events.push(TrackEvent::Created(track.clone()));
            self.tracks.push(track);
        }

        // Step 5: Finalize expired tracks
        for mut track in expired.drain(..) {
            track.mark_expired();
            info!(
                track_id = %track.id,
                label = %track.label,
                hits = track.hits,
                observed_secs = track.observed_for().as_secs_f64(),
                "Track expired"
            );
            events.push(TrackEvent::Expired(track));
        }

        events
    }
}
