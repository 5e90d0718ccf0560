use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use catflap_guard::{
    Actuator, ActuatorError, LockConfig, LockController, LockMode, LockOutcome, Notification,
    Notifier, NotifyError,
};
use tokio::time::{Instant, sleep};

#[derive(Default)]
struct CountingActuator {
    locks: AtomicU32,
    unlocks: AtomicU32,
}

#[async_trait]
impl Actuator for CountingActuator {
    async fn lock(&self) -> Result<(), ActuatorError> {
        self.locks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn unlock(&self) -> Result<(), ActuatorError> {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct SilentNotifier;

#[async_trait]
impl Notifier for SilentNotifier {
    async fn notify(&self, _: Notification, _: Option<Vec<u8>>) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn relock_at_100s_moves_unlock_to_400s() {
    let actuator = Arc::new(CountingActuator::default());
    let lock = LockController::spawn(LockConfig::default(), actuator.clone(), Arc::new(SilentNotifier));
    let t0 = Instant::now();

    let first = lock.on_prey_detected("bird").await.unwrap();
    assert_eq!(first.outcome, LockOutcome::Locked);
    assert_eq!(first.status.locked_at, Some(t0));
    assert_eq!(first.status.scheduled_unlock_at, Some(t0 + Duration::from_secs(300)));

    sleep(Duration::from_secs(100)).await;
    let second = lock.lock("operator").await.unwrap();
    assert_eq!(second.outcome, LockOutcome::Extended);
    assert_near(second.status.scheduled_unlock_at, t0 + Duration::from_secs(400));
    assert_eq!(second.status.remaining, Duration::from_secs(300));

    // Past the first deadline: still locked, no stacked timer fired.
    sleep(Duration::from_secs(250)).await;
    let status = lock.status().await.unwrap();
    assert_eq!(status.mode, LockMode::Locked);
    assert!(status.remaining <= Duration::from_secs(50));
    assert!(status.remaining > Duration::from_secs(49));

    sleep_until_just_before(t0 + Duration::from_secs(400)).await;
    assert!(lock.status().await.unwrap().is_locked());

    sleep(Duration::from_millis(20)).await;
    let status = lock.status().await.unwrap();
    assert_eq!(status.mode, LockMode::Unlocked);
    assert_eq!(status.scheduled_unlock_at, None);
    assert!(!lock.is_paused());

    assert_eq!(actuator.locks.load(Ordering::SeqCst), 1);
    assert_eq!(actuator.unlocks.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn many_relocks_leave_one_timer() {
    let actuator = Arc::new(CountingActuator::default());
    let config = LockConfig {
        lock_duration_secs: 10.0,
    };
    let lock = LockController::spawn(config, actuator.clone(), Arc::new(SilentNotifier));

    for _ in 0..20 {
        lock.on_prey_detected("again").await.unwrap();
        sleep(Duration::from_secs(1)).await;
    }
    sleep(Duration::from_secs(30)).await;

    assert!(!lock.status().await.unwrap().is_locked());
    assert_eq!(actuator.locks.load(Ordering::SeqCst), 1);
    assert_eq!(actuator.unlocks.load(Ordering::SeqCst), 1);
}

fn assert_near(actual: Option<Instant>, expected: Instant) {
    let actual = actual.expect("no unlock scheduled");
    let skew = if actual > expected { actual - expected } else { expected - actual };
    assert!(skew < Duration::from_millis(5), "{actual:?} vs {expected:?}");
}

async fn sleep_until_just_before(deadline: Instant) {
    tokio::time::sleep_until(deadline - Duration::from_millis(1)).await;
}
