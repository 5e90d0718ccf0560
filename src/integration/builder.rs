//! Builder for creating Detection objects from various input formats.

use std::sync::Arc;

use image::RgbImage;
use image::imageops;
use tokio::time::Instant;

use crate::integration::Frame;
use crate::tracker::{Crop, Detection, Rect};

/// Builder for creating `Detection` objects from various input formats.
#[derive(Debug, Clone, Default)]
pub struct DetectionBuilder {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    label: String,
    crop: Option<Crop>,
    timestamp: Option<Instant>,
}

impl DetectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bounding box in TLBR format (x1, y1, x2, y2).
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.x1 = x1;
        self.y1 = y1;
        self.x2 = x2;
        self.y2 = y2;
        self
    }

    /// Set bounding box in XYWH format (center_x, center_y, width, height).
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.x1 = cx - w / 2.0;
        self.y1 = cy - h / 2.0;
        self.x2 = cx + w / 2.0;
        self.y2 = cy + h / 2.0;
        self
    }

    /// Set bounding box in TLWH format (left, top, width, height).
    pub fn tlwh(mut self, x: f32, y: f32, w: f32, h: f32) -> Self {
        self.x1 = x;
        self.y1 = y;
        self.x2 = x + w;
        self.y2 = y + h;
        self
    }

    pub fn score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn crop(mut self, crop: Crop) -> Self {
        self.crop = Some(crop);
        self
    }

    pub fn timestamp(mut self, timestamp: Instant) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Cut the crop out of `frame` and take its timestamp.
    ///
    /// Uses the box set so far, clamped to the frame, so call it after the
    /// box setters.
    pub fn crop_from(mut self, frame: &Frame) -> Self {
        let (w, h) = frame.image.dimensions();
        let clamp = |v: f32, max: u32| v.clamp(0.0, max as f32) as u32;
        let (x1, y1) = (clamp(self.x1.floor(), w), clamp(self.y1.floor(), h));
        let (x2, y2) = (clamp(self.x2.ceil(), w), clamp(self.y2.ceil(), h));
        let region = imageops::crop_imm(
            &*frame.image,
            x1,
            y1,
            x2.saturating_sub(x1),
            y2.saturating_sub(y1),
        );
        self.crop = Some(Arc::new(region.to_image()));
        self.timestamp = Some(frame.timestamp);
        self
    }

    /// Build the final `Detection`.
    pub fn build(self) -> Detection {
        Detection::new(
            self.label,
            self.score,
            Rect::from_tlbr(self.x1, self.y1, self.x2, self.y2),
            self.timestamp.unwrap_or_else(Instant::now),
            self.crop.unwrap_or_else(|| Arc::new(RgbImage::new(0, 0))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_builder() {
        let det = DetectionBuilder::new()
            .tlbr(10.0, 20.0, 50.0, 80.0)
            .score(0.95)
            .label("cat")
            .build();

        assert_eq!(det.score, 0.95);
        assert_eq!(det.label, "cat");
        assert_eq!(det.bbox, Rect::new(10.0, 20.0, 40.0, 60.0));
    }

    #[test]
    fn test_crop_is_clamped_to_frame() {
        let frame = Frame::new(Arc::new(RgbImage::new(100, 50)), Instant::now(), 1);
        let det = DetectionBuilder::new()
            .tlwh(80.0, 10.0, 40.0, 20.0)
            .label("cat")
            .score(0.9)
            .crop_from(&frame)
            .build();

        assert_eq!(det.crop.dimensions(), (20, 20));
        assert_eq!(det.timestamp, frame.timestamp);
        // The box itself is kept as reported.
        assert_eq!(det.bbox.width, 40.0);
    }
}
