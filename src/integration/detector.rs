//! Traits for the camera and detection-model backends.

use tokio::time::Instant;

use crate::tracker::{Crop, Detection};

/// One captured camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Crop,
    pub timestamp: Instant,
    /// Monotonic counter assigned by the frame source.
    pub frame_id: u64,
}

impl Frame {
    pub fn new(image: Crop, timestamp: Instant, frame_id: u64) -> Self {
        Self {
            image,
            timestamp,
            frame_id,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }
}

/// Camera or video backend.
///
/// `Ok(None)` means the stream has ended.
pub trait FrameSource {
    type Error;

    fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error>;
}

/// Trait for object detection inference backends.
///
/// Implement this trait to connect any detection model to the pipeline.
/// An empty list is a valid answer.
///
/// # Example
///
/// ```ignore
/// use catflap_guard::{Detection, DetectionSource, Frame};
///
/// struct MyDetector {
///     // Your model here
/// }
///
/// impl DetectionSource for MyDetector {
///     type Error = std::io::Error;
///
///     fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
///         // Run inference and return detections with their crops
///         Ok(vec![])
///     }
/// }
/// ```
pub trait DetectionSource {
    /// Error type for detection failures.
    type Error;

    /// Run inference on one frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Self::Error>;
}
