//! Analysis requests and verdicts.

use tokio::time::Instant;

use crate::error::ClassifierError;
use crate::tracker::{Crop, Position, TrackId};

/// Verdict returned by the classifier. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub is_positive: bool,
    /// Human-readable explanation, forwarded to the operator.
    pub message: String,
    /// Raw response payload from the service.
    pub raw: serde_json::Value,
}

impl AnalysisResult {
    pub fn positive(message: impl Into<String>) -> Self {
        Self {
            is_positive: true,
            message: message.into(),
            raw: serde_json::Value::Null,
        }
    }

    pub fn negative(message: impl Into<String>) -> Self {
        Self {
            is_positive: false,
            message: message.into(),
            raw: serde_json::Value::Null,
        }
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }
}

/// One prey-analysis request for a track.
#[derive(Debug, Clone)]
pub struct AnalysisTask {
    pub track_id: TrackId,
    pub label: String,
    pub crop: Crop,
    pub position: Position,
    pub enqueued_at: Instant,
    /// Classifier calls made so far.
    pub attempts: u32,
    pub last_error: Option<ClassifierError>,
}

impl AnalysisTask {
    pub fn new(track_id: TrackId, label: impl Into<String>, crop: Crop, position: Position) -> Self {
        Self {
            track_id,
            label: label.into(),
            crop,
            position,
            enqueued_at: Instant::now(),
            attempts: 0,
            last_error: None,
        }
    }
}

/// What [`AnalysisDispatcher::submit`](super::AnalysisDispatcher::submit) did
/// with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Too similar to the last image sent for this track.
    Duplicate,
    /// A task for this track is already queued or in flight.
    Outstanding,
    /// The door is locked; analysis is suspended.
    Paused,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_payload_is_kept() {
        let result = AnalysisResult::positive("mouse").with_raw(serde_json::json!({"prey": true}));
        assert!(result.is_positive);
        assert_eq!(result.raw["prey"], serde_json::Value::Bool(true));
        assert!(!AnalysisResult::negative("nothing").is_positive);
    }
}
