//! Lock state, configuration and reports.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Configuration for the [`LockController`](super::LockController).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Seconds the door stays locked after the most recent lock event.
    pub lock_duration_secs: f64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_duration_secs: 300.0,
        }
    }
}

impl LockConfig {
    pub fn lock_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.lock_duration_secs).unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockMode {
    #[default]
    Unlocked,
    Locked,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Unlocked => f.write_str("UNLOCKED"),
            LockMode::Locked => f.write_str("LOCKED"),
        }
    }
}

/// What asked for the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTrigger {
    PreyDetected,
    /// Classification exhausted its retries under the fail-locked policy.
    AnalysisFailure,
    Manual,
}

impl fmt::Display for LockTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTrigger::PreyDetected => f.write_str("prey detected"),
            LockTrigger::AnalysisFailure => f.write_str("analysis failure"),
            LockTrigger::Manual => f.write_str("manual"),
        }
    }
}

/// Logical state of the door as the controller intends it.
#[derive(Debug, Clone, PartialEq)]
pub struct LockStatus {
    pub mode: LockMode,
    pub reason: Option<String>,
    pub locked_at: Option<Instant>,
    pub scheduled_unlock_at: Option<Instant>,
    /// `max(0, scheduled_unlock_at - now)`
    pub remaining: Duration,
    /// Set when the most recent actuator call failed.
    pub last_actuator_error: Option<String>,
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        self.mode == LockMode::Locked
    }

    pub fn remaining_seconds(&self) -> f64 {
        self.remaining.as_secs_f64()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// UNLOCKED -> LOCKED
    Locked,
    /// LOCKED -> LOCKED, timer replaced
    Extended,
    /// LOCKED -> UNLOCKED
    Unlocked,
    /// UNLOCKED -> UNLOCKED, nothing done
    AlreadyUnlocked,
}

/// Result of one transition, with the status right after it.
#[derive(Debug, Clone, PartialEq)]
pub struct LockReport {
    pub outcome: LockOutcome,
    pub status: LockStatus,
    /// Actuator error raised by this transition, if any.
    pub actuator_error: Option<String>,
}

impl LockReport {
    /// One-line description for the operator.
    pub fn summary(&self) -> String {
        let remaining = self.status.remaining_seconds();
        match (&self.outcome, &self.actuator_error) {
            (LockOutcome::Locked | LockOutcome::Extended, Some(e)) => {
                format!("Warning: could not lock the door ({e}); lock timer set for {remaining:.0}s")
            }
            (LockOutcome::Locked, None) => format!("Door locked for {remaining:.0}s"),
            (LockOutcome::Extended, None) => {
                format!("Door already locked, {remaining:.0}s remaining")
            }
            (LockOutcome::Unlocked, Some(e)) => {
                format!("Warning: could not unlock the door ({e})")
            }
            (LockOutcome::Unlocked, None) => "Door unlocked".to_string(),
            (LockOutcome::AlreadyUnlocked, _) => "Door was not locked".to_string(),
        }
    }
}

/// Read-only view of the "detection paused" flag. Only the lock controller
/// writes it.
#[derive(Debug, Clone, Default)]
pub struct PauseFlag(Arc<AtomicBool>);

impl PauseFlag {
    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, paused: bool) {
        self.0.store(paused, Ordering::Release);
    }
}

/// State owned by the controller task.
#[derive(Debug, Default)]
pub(crate) struct LockState {
    pub mode: LockMode,
    pub reason: Option<String>,
    pub locked_at: Option<Instant>,
    /// Start of the current locked stretch, across extensions.
    pub locked_since: Option<Instant>,
    pub scheduled_unlock_at: Option<Instant>,
    pub last_actuator_error: Option<String>,
    /// Bumped on every re-arm; a firing timer carries the value it was armed with.
    pub timer_generation: u64,
    pub timer: Option<JoinHandle<()>>,
}

impl LockState {
    pub fn status(&self, now: Instant) -> LockStatus {
        let remaining = self
            .scheduled_unlock_at
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);
        LockStatus {
            mode: self.mode,
            reason: self.reason.clone(),
            locked_at: self.locked_at,
            scheduled_unlock_at: self.scheduled_unlock_at,
            remaining,
            last_actuator_error: self.last_actuator_error.clone(),
        }
    }

    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
