//! A single object followed across frames.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::tracker::matching::{Crop, Detection};
use crate::tracker::rect::Rect;
use crate::tracker::track_state::TrackState;

/// Identifier of a track, unique among a tracker's live tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

/// Horizontal bucket of a box within the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Middle,
    Right,
}

impl Position {
    /// Bucket a box by its centre x against thirds of the frame width.
    pub fn of(bbox: &Rect, frame_width: u32) -> Self {
        let (cx, _) = bbox.center();
        let width = frame_width as f32;
        if cx < width / 3.0 {
            Position::Left
        } else if cx > 2.0 * width / 3.0 {
            Position::Right
        } else {
            Position::Middle
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Left => "left",
            Position::Middle => "middle",
            Position::Right => "right",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object tracked across frames.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    /// Unique track identifier
    pub id: TrackId,
    /// Class label shared by every detection in the track
    pub label: String,
    /// Current lifecycle state
    pub state: TrackState,
    /// Bounding box of the most recent match
    pub bbox: Rect,
    pub first_seen: Instant,
    pub last_seen: Instant,
    /// `last_seen + track_window`
    pub expires_at: Instant,
    /// Highest-quality crop observed so far
    pub best_crop: Crop,
    pub best_quality: f32,
    /// Confidence of the detection that produced `best_crop`
    pub best_score: f32,
    /// Number of detections matched into this track, including the first
    pub hits: u32,
    /// Detections at or above the tracker's qualifying confidence
    pub confident_hits: u32,
}

impl TrackedObject {
    pub(crate) fn new(
        id: TrackId,
        detection: Detection,
        now: Instant,
        track_window: Duration,
        confident: bool,
    ) -> Self {
        let quality = detection.quality();
        Self {
            id,
            label: detection.label,
            state: TrackState::New,
            bbox: detection.bbox,
            first_seen: now,
            last_seen: now,
            expires_at: now + track_window,
            best_crop: detection.crop,
            best_quality: quality,
            best_score: detection.score,
            hits: 1,
            confident_hits: u32::from(confident),
        }
    }

    pub(crate) fn update(
        &mut self,
        detection: Detection,
        now: Instant,
        track_window: Duration,
        confident: bool,
    ) {
        let quality = detection.quality();
        self.bbox = detection.bbox;
        self.last_seen = now;
        self.expires_at = now + track_window;
        self.hits += 1;
        if confident {
            self.confident_hits += 1;
        }
        if quality > self.best_quality {
            self.best_quality = quality;
            self.best_score = detection.score;
            self.best_crop = detection.crop;
        }
        self.state = TrackState::Tracked;
    }

    pub(crate) fn mark_expired(&mut self) {
        self.state = TrackState::Expired;
    }

    /// Whether the expiry deadline has passed at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    /// Time between the first and the most recent sighting.
    pub fn observed_for(&self) -> Duration {
        self.last_seen.saturating_duration_since(self.first_seen)
    }
}
