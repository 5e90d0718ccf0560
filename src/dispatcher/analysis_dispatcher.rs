//! Queue, dedup and bounded-concurrency execution of prey analysis.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::dispatcher::task::{AnalysisResult, AnalysisTask, SubmitOutcome};
use crate::error::{Error, Result};
use crate::imaging;
use crate::lock::{LockHandle, PauseFlag};
use crate::ports::{
    ArchiveCategory, Archiver, Classifier, Notification, Notifier, archive_in_background,
    notify_in_background,
};
use crate::similarity::SimilarityGate;
use crate::tracker::{Crop, TrackId};

/// What to do when the classifier keeps failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log it and carry on as if the result were negative.
    #[default]
    TreatAsNegative,
    /// Lock the door as if prey had been found.
    Lock,
}

/// Configuration for the [`AnalysisDispatcher`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum simultaneous classifier calls.
    pub concurrency: usize,
    /// Tasks waiting for a worker; `submit` waits when this is full.
    pub queue_capacity: usize,
    /// Submissions at least this similar to the last sent image are dropped.
    pub ssim_threshold: f64,
    /// Classifier calls per task, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub retry_backoff_secs: f64,
    pub failure_policy: FailurePolicy,
    /// Longest side, in pixels, of images sent to the classifier.
    pub max_image_side: u32,
    pub notify_negative_results: bool,
    pub archive_analysis_images: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queue_capacity: 50,
            ssim_threshold: 0.9,
            max_attempts: 3,
            retry_backoff_secs: 0.5,
            failure_policy: FailurePolicy::TreatAsNegative,
            max_image_side: 384,
            notify_negative_results: true,
            archive_analysis_images: true,
        }
    }
}

impl DispatcherConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_backoff_secs).unwrap_or(Duration::ZERO)
    }
}

/// Counters since the dispatcher started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub submitted: u64,
    pub queued: u64,
    pub deduplicated: u64,
    pub skipped_outstanding: u64,
    pub skipped_paused: u64,
    pub remote_calls: u64,
    pub positives: u64,
    pub negatives: u64,
    pub failures: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    queued: AtomicU64,
    deduplicated: AtomicU64,
    skipped_outstanding: AtomicU64,
    skipped_paused: AtomicU64,
    remote_calls: AtomicU64,
    positives: AtomicU64,
    negatives: AtomicU64,
    failures: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn enter_flight(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            skipped_outstanding: self.skipped_outstanding.load(Ordering::Relaxed),
            skipped_paused: self.skipped_paused.load(Ordering::Relaxed),
            remote_calls: self.remote_calls.load(Ordering::Relaxed),
            positives: self.positives.load(Ordering::Relaxed),
            negatives: self.negatives.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

/// Per-track bookkeeping.
#[derive(Default)]
struct TrackLedger {
    /// Tracks with a task queued or in flight.
    outstanding: HashSet<TrackId>,
    /// Bounded copy of the last image that got a verdict, per track.
    last_sent: HashMap<TrackId, Crop>,
    /// Finalized while outstanding; their image is dropped when the task ends.
    forgotten: HashSet<TrackId>,
}

/// Releases a track's outstanding slot when its worker ends, panics included.
struct OutstandingGuard {
    shared: Arc<Shared>,
    track_id: TrackId,
}

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        let mut ledger = self.shared.ledger();
        ledger.outstanding.remove(&self.track_id);
        if ledger.forgotten.remove(&self.track_id) {
            ledger.last_sent.remove(&self.track_id);
        }
    }
}

struct Shared {
    config: DispatcherConfig,
    gate: SimilarityGate,
    classifier: Arc<dyn Classifier>,
    lock: LockHandle,
    paused: PauseFlag,
    notifier: Arc<dyn Notifier>,
    archiver: Option<Arc<dyn Archiver>>,
    ledger: Mutex<TrackLedger>,
    counters: Counters,
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, TrackLedger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn archive(&self, image_jpeg: &[u8], category: ArchiveCategory) {
        if let Some(archiver) = &self.archiver {
            archive_in_background(archiver, image_jpeg.to_vec(), category);
        }
    }
}

/// Sends qualifying crops to the classifier and acts on the verdicts.
///
/// At most one task per track is outstanding, at most `concurrency` calls are
/// in flight, and waiting tasks are served in submission order.
pub struct AnalysisDispatcher {
    shared: Arc<Shared>,
    tx: mpsc::Sender<AnalysisTask>,
    drain: JoinHandle<()>,
}

impl AnalysisDispatcher {
    pub fn new(
        config: DispatcherConfig,
        classifier: Arc<dyn Classifier>,
        lock: LockHandle,
        notifier: Arc<dyn Notifier>,
        archiver: Option<Arc<dyn Archiver>>,
    ) -> Self {
        let capacity = config.queue_capacity.max(1);
        let concurrency = config.concurrency.max(1);
        let shared = Arc::new(Shared {
            gate: SimilarityGate::new(config.ssim_threshold),
            config,
            classifier,
            paused: lock.pause_flag(),
            lock,
            notifier,
            archiver,
            ledger: Mutex::new(TrackLedger::default()),
            counters: Counters::default(),
        });
        let (tx, rx) = mpsc::channel(capacity);
        let drain = tokio::spawn(drain(Arc::clone(&shared), rx, concurrency));
        Self { shared, tx, drain }
    }

    /// Offer a crop for analysis.
    ///
    /// Dropped without a remote call while the door is locked, while the
    /// track already has a task outstanding, or when the crop is too similar
    /// to the last image sent for the track. Waits when the queue is full.
    pub async fn submit(&self, task: AnalysisTask) -> Result<SubmitOutcome> {
        let shared = &self.shared;
        Counters::bump(&shared.counters.submitted);
        let track_id = task.track_id;

        if shared.paused.is_paused() {
            Counters::bump(&shared.counters.skipped_paused);
            debug!(%track_id, "Detection paused, skipping analysis");
            return Ok(SubmitOutcome::Paused);
        }

        {
            let mut ledger = shared.ledger();
            if ledger.outstanding.contains(&track_id) {
                Counters::bump(&shared.counters.skipped_outstanding);
                debug!(%track_id, "Analysis already outstanding");
                return Ok(SubmitOutcome::Outstanding);
            }
            if let Some(previous) = ledger.last_sent.get(&track_id) {
                let candidate = imaging::bound_size(&task.crop, shared.config.max_image_side);
                let score = shared.gate.score(previous, &candidate);
                if score >= shared.gate.threshold() {
                    Counters::bump(&shared.counters.deduplicated);
                    debug!(%track_id, ssim = score, "Dropping near-duplicate image");
                    return Ok(SubmitOutcome::Duplicate);
                }
            }
            ledger.outstanding.insert(track_id);
        }

        if let Err(mpsc::error::SendError(task)) = self.tx.send(task).await {
            shared.ledger().outstanding.remove(&task.track_id);
            return Err(Error::DispatcherClosed);
        }
        Counters::bump(&shared.counters.queued);
        debug!(%track_id, "Queued analysis");
        Ok(SubmitOutcome::Queued)
    }

    /// Drop the last-sent image of a finalized track.
    ///
    /// A task still outstanding for the track drops its image when it ends.
    pub fn forget(&self, track_id: TrackId) {
        let mut ledger = self.shared.ledger();
        ledger.last_sent.remove(&track_id);
        if ledger.outstanding.contains(&track_id) {
            ledger.forgotten.insert(track_id);
        }
    }

    #[cfg(test)]
    fn remembers(&self, track_id: TrackId) -> bool {
        self.shared.ledger().last_sent.contains_key(&track_id)
    }

    pub fn has_outstanding(&self, track_id: TrackId) -> bool {
        self.shared.ledger().outstanding.contains(&track_id)
    }

    pub fn stats(&self) -> DispatcherStats {
        self.shared.counters.snapshot()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Stop accepting work and wait for queued and in-flight tasks to finish.
    pub async fn shutdown(self) {
        let Self { tx, drain, .. } = self;
        drop(tx);
        if let Err(e) = drain.await {
            error!(error = %e, "Analysis drain task failed");
        }
    }
}

async fn drain(shared: Arc<Shared>, mut rx: mpsc::Receiver<AnalysisTask>, concurrency: usize) {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut workers = JoinSet::new();

    while let Some(task) = rx.recv().await {
        while let Some(joined) = workers.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Analysis worker panicked");
            }
        }

        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let guard = OutstandingGuard {
            shared: Arc::clone(&shared),
            track_id: task.track_id,
        };
        workers.spawn(async move {
            run_task(&guard.shared, task).await;
            drop(guard);
            drop(permit);
        });
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Analysis worker panicked");
        }
    }
    debug!("Analysis dispatcher drained");
}

async fn run_task(shared: &Shared, mut task: AnalysisTask) {
    let config = &shared.config;
    let bounded = Arc::new(imaging::bound_size(&task.crop, config.max_image_side));
    let jpeg = match imaging::encode_jpeg(&bounded) {
        Ok(jpeg) => jpeg,
        Err(e) => {
            warn!(track_id = %task.track_id, error = %e, "Could not encode crop for analysis");
            on_failure(shared, &task, format!("could not encode crop: {e}")).await;
            return;
        }
    };

    if config.archive_analysis_images {
        shared.archive(&jpeg, ArchiveCategory::Analysis);
    }

    let verdict = classify_with_retry(shared, &mut task, &jpeg).await;
    // Only a judged image suppresses later look-alikes.
    if verdict.is_some() {
        shared.ledger().last_sent.insert(task.track_id, bounded);
    }
    match verdict {
        Some(result) if result.is_positive => on_positive(shared, &task, result, jpeg).await,
        Some(result) => {
            Counters::bump(&shared.counters.negatives);
            info!(
                track_id = %task.track_id,
                position = %task.position,
                message = %result.message,
                "No prey detected"
            );
            observed(shared, &task, result.message);
        }
        None => {
            let cause = task
                .last_error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown error".to_string());
            on_failure(shared, &task, cause).await;
        }
    }
}

async fn classify_with_retry(
    shared: &Shared,
    task: &mut AnalysisTask,
    jpeg: &[u8],
) -> Option<AnalysisResult> {
    let max_attempts = shared.config.max_attempts.max(1);
    let mut backoff = shared.config.retry_backoff();

    loop {
        task.attempts += 1;
        Counters::bump(&shared.counters.remote_calls);
        shared.counters.enter_flight();
        let outcome = shared.classifier.analyze(jpeg).await;
        shared.counters.leave_flight();

        match outcome {
            Ok(result) => return Some(result),
            Err(e) if e.is_transient() && task.attempts < max_attempts => {
                debug!(
                    track_id = %task.track_id,
                    attempt = task.attempts,
                    error = %e,
                    "Classifier call failed, retrying"
                );
                task.last_error = Some(e);
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(e) => {
                warn!(
                    track_id = %task.track_id,
                    attempts = task.attempts,
                    error = %e,
                    "Prey analysis failed"
                );
                task.last_error = Some(e);
                return None;
            }
        }
    }
}

async fn on_positive(shared: &Shared, task: &AnalysisTask, result: AnalysisResult, jpeg: Vec<u8>) {
    Counters::bump(&shared.counters.positives);
    info!(
        track_id = %task.track_id,
        position = %task.position,
        message = %result.message,
        "PREY DETECTED"
    );

    let lock_note = match shared.lock.on_prey_detected(result.message.clone()).await {
        Ok(report) => report.summary(),
        Err(e) => {
            error!(track_id = %task.track_id, error = %e, "Could not lock after positive analysis");
            format!("Warning: door not locked ({e})")
        }
    };

    shared.archive(&jpeg, ArchiveCategory::Prey);
    notify_in_background(
        &shared.notifier,
        Notification::PreyDetected {
            track_id: task.track_id,
            position: task.position,
            message: result.message,
            lock_note,
        },
        Some(jpeg),
    );
}

async fn on_failure(shared: &Shared, task: &AnalysisTask, cause: String) {
    Counters::bump(&shared.counters.failures);
    match shared.config.failure_policy {
        FailurePolicy::TreatAsNegative => {
            observed(shared, task, format!("analysis failed: {cause}"));
        }
        FailurePolicy::Lock => {
            let note = match shared
                .lock
                .on_analysis_failure(format!("analysis failed: {cause}"))
                .await
            {
                Ok(report) => report.summary(),
                Err(e) => {
                    error!(track_id = %task.track_id, error = %e, "Could not lock after failed analysis");
                    format!("door not locked ({e})")
                }
            };
            notify_in_background(
                &shared.notifier,
                Notification::ObjectObserved {
                    track_id: task.track_id,
                    label: task.label.clone(),
                    position: task.position,
                    message: format!("analysis failed: {cause}; {note}"),
                },
                None,
            );
        }
    }
}

fn observed(shared: &Shared, task: &AnalysisTask, message: String) {
    if !shared.config.notify_negative_results {
        return;
    }
    notify_in_background(
        &shared.notifier,
        Notification::ObjectObserved {
            track_id: task.track_id,
            label: task.label.clone(),
            position: task.position,
            message,
        },
        None,
    );
}
