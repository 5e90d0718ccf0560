mod controller;
mod state;

pub use controller::{LockController, LockHandle};
pub use state::{LockConfig, LockMode, LockOutcome, LockReport, LockStatus, LockTrigger, PauseFlag};
