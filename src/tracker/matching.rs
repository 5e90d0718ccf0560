//! Matching utilities for frame-to-frame association.

use std::sync::Arc;

use image::RgbImage;
use ndarray::Array2;
use tokio::time::Instant;

use crate::tracker::rect::{Rect, iou_batch};

/// Pixel crop attached to a detection. Shared so track snapshots stay cheap.
pub type Crop = Arc<RgbImage>;

/// One sighting in one frame, as produced by a detector.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Class label reported by the detector (e.g. "cat").
    pub label: String,
    /// Detection confidence score
    pub score: f32,
    /// Bounding box in frame coordinates (TLWH)
    pub bbox: Rect,
    /// Timestamp of the source frame
    pub timestamp: Instant,
    /// Pixels inside `bbox`
    pub crop: Crop,
}

impl Detection {
    pub fn new(
        label: impl Into<String>,
        score: f32,
        bbox: Rect,
        timestamp: Instant,
        crop: Crop,
    ) -> Self {
        Self {
            label: label.into(),
            score,
            bbox,
            timestamp,
            crop,
        }
    }

    /// Quality of this sighting's crop; grows with both confidence and box area.
    pub fn quality(&self) -> f32 {
        self.score.max(0.0) * self.bbox.area().max(0.0)
    }
}

/// IoU matrix between live tracks and detections, with cross-class pairs zeroed.
pub fn class_gated_iou(
    track_boxes: &[Rect],
    track_labels: &[&str],
    detections: &[Detection],
) -> Array2<f32> {
    let det_boxes: Vec<Rect> = detections.iter().map(|d| d.bbox).collect();
    let mut ious = iou_batch(track_boxes, &det_boxes);
    for (i, label) in track_labels.iter().enumerate() {
        for (j, det) in detections.iter().enumerate() {
            if det.label != *label {
                ious[[i, j]] = 0.0;
            }
        }
    }
    ious
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentResult {
    /// (track index, detection index)
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Detection indices ordered by descending confidence.
pub fn confidence_order(detections: &[Detection]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| detections[b].score.total_cmp(&detections[a].score));
    order
}

/// Greedy assignment over an IoU matrix of shape (tracks, detections).
///
/// Detections are visited in `det_order`; each claims the unclaimed track
/// with the highest IoU strictly above `thresh`. Rows are expected in track
/// creation order, so on equal IoU the oldest track wins.
pub fn greedy_assignment(ious: &Array2<f32>, det_order: &[usize], thresh: f32) -> AssignmentResult {
    let (num_tracks, num_dets) = ious.dim();
    let mut claimed = vec![false; num_tracks];
    let mut matches = Vec::new();
    let mut unmatched_detections = Vec::new();

    for &j in det_order.iter().filter(|&&j| j < num_dets) {
        let mut best: Option<(usize, f32)> = None;
        for i in 0..num_tracks {
            if claimed[i] {
                continue;
            }
            let iou = ious[[i, j]];
            if iou <= thresh {
                continue;
            }
            match best {
                Some((_, best_iou)) if iou <= best_iou => {}
                _ => best = Some((i, iou)),
            }
        }

        match best {
            Some((i, _)) => {
                claimed[i] = true;
                matches.push((i, j));
            }
            None => unmatched_detections.push(j),
        }
    }

    let unmatched_tracks = claimed
        .iter()
        .enumerate()
        .filter_map(|(i, &c)| if c { None } else { Some(i) })
        .collect();

    AssignmentResult {
        matches,
        unmatched_tracks,
        unmatched_detections,
    }
}
