//! Integration module connecting camera and detection backends with the
//! tracker, the analysis dispatcher and the lock controller.
//!
//! Implement [`FrameSource`] and [`DetectionSource`] for your camera and
//! model, then drive a [`PreyPipeline`].

mod builder;
mod detector;
mod pipeline;

pub use builder::DetectionBuilder;
pub use detector::{DetectionSource, Frame, FrameSource};
pub use pipeline::{Collaborators, FrameReport, PipelineConfig, PipelineHandle, PreyPipeline};
