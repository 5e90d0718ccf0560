mod matching;
mod object_tracker;
mod rect;
mod track_state;
mod tracked_object;

pub use matching::{Crop, Detection};
pub use object_tracker::{ObjectTracker, TrackEvent, TrackerConfig};
pub use rect::{Rect, iou_batch};
pub use track_state::TrackState;
pub use tracked_object::{Position, TrackId, TrackedObject};
