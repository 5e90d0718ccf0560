mod analysis_dispatcher;
mod task;

pub use analysis_dispatcher::{AnalysisDispatcher, DispatcherConfig, DispatcherStats, FailurePolicy};
pub use task::{AnalysisResult, AnalysisTask, SubmitOutcome};
