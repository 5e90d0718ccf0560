/// Track state enumeration for the tracked-object lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    /// Created this frame from an unmatched detection
    #[default]
    New,
    /// Matched at least once after creation
    Tracked,
    /// Deadline passed without a match; removed from the live set
    Expired,
}
