//! Lock controller task and its handle.
//!
//! Every transition, whether from analysis results, manual commands or the
//! auto-unlock timer, is a message into one queue drained by a single task.
//! The timer is a separate task that only posts `TimerFired` back into that
//! queue, so it can never race a manual command.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::lock::state::{
    LockConfig, LockMode, LockOutcome, LockReport, LockState, LockStatus, LockTrigger, PauseFlag,
};
use crate::ports::{ActuatorAction, Actuator, Notification, Notifier, notify_in_background};

enum Command {
    Lock {
        reason: String,
        trigger: LockTrigger,
        reply: oneshot::Sender<LockReport>,
    },
    Unlock {
        reason: String,
        reply: oneshot::Sender<LockReport>,
    },
    TimerFired {
        generation: u64,
    },
    Status {
        reply: oneshot::Sender<LockStatus>,
    },
    Shutdown,
}

/// The single owner of [`LockState`] and the pause flag.
pub struct LockController {
    lock_duration: Duration,
    actuator: Arc<dyn Actuator>,
    notifier: Arc<dyn Notifier>,
    state: LockState,
    paused: PauseFlag,
    commands: mpsc::UnboundedReceiver<Command>,
    timer_tx: mpsc::WeakUnboundedSender<Command>,
}

impl LockController {
    /// Start the controller task in the UNLOCKED state.
    ///
    /// The task stops once every [`LockHandle`] is dropped or
    /// [`LockHandle::shutdown`] is called.
    pub fn spawn(
        config: LockConfig,
        actuator: Arc<dyn Actuator>,
        notifier: Arc<dyn Notifier>,
    ) -> LockHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let paused = PauseFlag::default();
        let controller = LockController {
            lock_duration: config.lock_duration(),
            actuator,
            notifier,
            state: LockState::default(),
            paused: paused.clone(),
            commands: rx,
            timer_tx: tx.downgrade(),
        };
        tokio::spawn(controller.run());
        LockHandle { tx, paused }
    }

    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Lock {
                    reason,
                    trigger,
                    reply,
                } => {
                    let report = self.lock(reason, trigger).await;
                    let _ = reply.send(report);
                }
                Command::Unlock { reason, reply } => {
                    let report = self.unlock(reason, false).await;
                    let _ = reply.send(report);
                }
                Command::TimerFired { generation } => self.on_timer(generation).await,
                Command::Status { reply } => {
                    let _ = reply.send(self.state.status(Instant::now()));
                }
                Command::Shutdown => break,
            }
        }
        self.state.cancel_timer();
        debug!("Lock controller stopped");
    }

    async fn lock(&mut self, reason: String, trigger: LockTrigger) -> LockReport {
        let now = Instant::now();
        let deadline = now + self.lock_duration;

        let (outcome, actuator_error) = match self.state.mode {
            LockMode::Unlocked => {
                let error = self.call_actuator(ActuatorAction::Lock).await;
                self.state.mode = LockMode::Locked;
                self.state.locked_since = Some(now);
                info!(
                    %trigger,
                    reason = %reason,
                    lock_secs = self.lock_duration.as_secs_f64(),
                    "Door LOCKED"
                );
                (LockOutcome::Locked, error)
            }
            LockMode::Locked => {
                // Physical state is unknown after a failed call, so try again.
                let error = if self.state.last_actuator_error.is_some() {
                    self.call_actuator(ActuatorAction::Lock).await
                } else {
                    None
                };
                info!(%trigger, reason = %reason, "Door already locked, extending lock");
                (LockOutcome::Extended, error)
            }
        };

        self.state.reason = Some(reason);
        self.state.locked_at = Some(now);
        self.state.scheduled_unlock_at = Some(deadline);
        self.arm_timer(deadline);
        self.paused.set(true);

        LockReport {
            outcome,
            status: self.state.status(now),
            actuator_error,
        }
    }

    async fn unlock(&mut self, reason: String, automatic: bool) -> LockReport {
        if self.state.mode == LockMode::Unlocked {
            info!(reason = %reason, "Door was not locked");
            return LockReport {
                outcome: LockOutcome::AlreadyUnlocked,
                status: self.state.status(Instant::now()),
                actuator_error: None,
            };
        }

        let error = self.call_actuator(ActuatorAction::Unlock).await;
        let now = Instant::now();
        let held_for = self
            .state
            .locked_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();

        self.state.cancel_timer();
        self.state.mode = LockMode::Unlocked;
        self.state.reason = Some(reason.clone());
        self.state.locked_at = None;
        self.state.locked_since = None;
        self.state.scheduled_unlock_at = None;
        self.paused.set(false);

        info!(
            reason = %reason,
            automatic,
            held_secs = held_for.as_secs_f64(),
            "Door UNLOCKED"
        );
        if automatic {
            notify_in_background(&self.notifier, Notification::Unlocked { reason }, None);
        }

        LockReport {
            outcome: LockOutcome::Unlocked,
            status: self.state.status(now),
            actuator_error: error,
        }
    }

    async fn on_timer(&mut self, generation: u64) {
        if self.state.mode != LockMode::Locked || generation != self.state.timer_generation {
            debug!(generation, "Ignoring stale unlock timer");
            return;
        }
        let Some(deadline) = self.state.scheduled_unlock_at else {
            return;
        };
        if Instant::now() < deadline {
            self.arm_timer(deadline);
            return;
        }
        self.state.timer = None;
        self.unlock("lock timer expired".to_string(), true).await;
    }

    /// Replace any pending timer with one firing at `deadline`.
    fn arm_timer(&mut self, deadline: Instant) {
        self.state.cancel_timer();
        self.state.timer_generation += 1;
        let generation = self.state.timer_generation;
        let tx = self.timer_tx.clone();
        self.state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::TimerFired { generation });
            }
        }));
    }

    /// Run the actuator; on failure record it and warn the operator.
    async fn call_actuator(&mut self, action: ActuatorAction) -> Option<String> {
        let result = match action {
            ActuatorAction::Lock => self.actuator.lock().await,
            ActuatorAction::Unlock => self.actuator.unlock().await,
        };
        match result {
            Ok(()) => {
                self.state.last_actuator_error = None;
                None
            }
            Err(e) => {
                let error = e.to_string();
                warn!(%action, error = %error, "Actuator call failed");
                self.state.last_actuator_error = Some(error.clone());
                notify_in_background(
                    &self.notifier,
                    Notification::ActuatorFailure {
                        action,
                        error: error.clone(),
                    },
                    None,
                );
                Some(error)
            }
        }
    }
}

/// Cloneable entry point to the lock controller.
#[derive(Clone)]
pub struct LockHandle {
    tx: mpsc::UnboundedSender<Command>,
    paused: PauseFlag,
}

impl LockHandle {
    async fn request_lock(&self, reason: String, trigger: LockTrigger) -> Result<LockReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Lock {
                reason,
                trigger,
                reply,
            })
            .map_err(|_| Error::LockControllerClosed)?;
        rx.await.map_err(|_| Error::LockControllerClosed)
    }

    /// Manual lock command.
    pub async fn lock(&self, reason: impl Into<String>) -> Result<LockReport> {
        self.request_lock(reason.into(), LockTrigger::Manual).await
    }

    /// Positive classification.
    pub async fn on_prey_detected(&self, reason: impl Into<String>) -> Result<LockReport> {
        self.request_lock(reason.into(), LockTrigger::PreyDetected).await
    }

    /// Classification failure under the fail-locked policy.
    pub async fn on_analysis_failure(&self, reason: impl Into<String>) -> Result<LockReport> {
        self.request_lock(reason.into(), LockTrigger::AnalysisFailure)
            .await
    }

    /// Manual unlock command. A no-op while already unlocked.
    pub async fn unlock(&self, reason: impl Into<String>) -> Result<LockReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Unlock {
                reason: reason.into(),
                reply,
            })
            .map_err(|_| Error::LockControllerClosed)?;
        rx.await.map_err(|_| Error::LockControllerClosed)
    }

    pub async fn status(&self) -> Result<LockStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Status { reply })
            .map_err(|_| Error::LockControllerClosed)?;
        rx.await.map_err(|_| Error::LockControllerClosed)
    }

    /// Set while LOCKED; analysis submissions are suppressed.
    pub fn is_paused(&self) -> bool {
        self.paused.is_paused()
    }

    pub fn pause_flag(&self) -> PauseFlag {
        self.paused.clone()
    }

    /// Stop the controller. Pending timers are cancelled; the door is left as is.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}
