use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use catflap_guard::{
    Actuator, ActuatorError, AnalysisResult, ArchiveCategory, ArchiveError, Archiver, Classifier,
    ClassifierError, Collaborators, Detection, DetectionBuilder, DetectionSource, Frame, FrameSource,
    GuardConfig, LockMode, Notification, Notifier, NotifyError, PreyPipeline,
};
use image::{Rgb, RgbImage};
use tokio::time::Instant;

struct PreyClassifier {
    calls: AtomicU32,
}

#[async_trait]
impl Classifier for PreyClassifier {
    async fn analyze(&self, image_jpeg: &[u8]) -> Result<AnalysisResult, ClassifierError> {
        assert!(!image_jpeg.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(AnalysisResult::positive("cat is carrying a bird"))
    }
}

#[derive(Default)]
struct RecordingActuator {
    actions: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl Actuator for RecordingActuator {
    async fn lock(&self) -> Result<(), ActuatorError> {
        self.actions.lock().unwrap().push("lock");
        Ok(())
    }

    async fn unlock(&self) -> Result<(), ActuatorError> {
        self.actions.lock().unwrap().push("unlock");
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, n: Notification, _: Option<Vec<u8>>) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(n);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingArchiver {
    categories: Mutex<Vec<ArchiveCategory>>,
}

#[async_trait]
impl Archiver for RecordingArchiver {
    async fn persist(&self, _: Vec<u8>, category: ArchiveCategory) -> Result<(), ArchiveError> {
        self.categories.lock().unwrap().push(category);
        Ok(())
    }
}

/// A cat walking left to right across a 640x480 scene, one frame every 200ms.
struct WalkingCat {
    start: Instant,
    frame_id: u64,
    frames: u64,
}

impl FrameSource for WalkingCat {
    type Error = Infallible;

    fn next_frame(&mut self) -> Result<Option<Frame>, Self::Error> {
        if self.frame_id >= self.frames {
            return Ok(None);
        }
        let id = self.frame_id;
        self.frame_id += 1;
        let image = RgbImage::from_fn(640, 480, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y + id as u32) % 256) as u8]));
        Ok(Some(Frame::new(
            Arc::new(image),
            self.start + Duration::from_millis(id * 200),
            id,
        )))
    }
}

struct CatDetector;

impl DetectionSource for CatDetector {
    type Error = Infallible;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
        let x = 200.0 + frame.frame_id as f32 * 4.0;
        Ok(vec![
            DetectionBuilder::new()
                .tlwh(x, 150.0, 160.0, 120.0)
                .score(0.92)
                .label("cat")
                .crop_from(frame)
                .build(),
        ])
    }
}

#[tokio::test(start_paused = true)]
async fn prey_locks_door_then_timer_unlocks() {
    let classifier = Arc::new(PreyClassifier {
        calls: AtomicU32::new(0),
    });
    let actuator = Arc::new(RecordingActuator::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let archiver = Arc::new(RecordingArchiver::default());

    let mut pipeline = PreyPipeline::new(
        CatDetector,
        GuardConfig::default(),
        Collaborators {
            classifier: classifier.clone(),
            actuator: actuator.clone(),
            notifier: notifier.clone(),
            archiver: Some(archiver.clone()),
            flap_sensor: None,
        },
    )
    .unwrap();
    let handle = pipeline.handle();

    // First frame: the new cat track is submitted.
    let mut camera = WalkingCat {
        start: Instant::now(),
        frame_id: 0,
        frames: 1,
    };
    assert_eq!(pipeline.run(&mut camera).await.unwrap(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.mode, LockMode::Locked);
    assert!(status.remaining_seconds() <= 300.0);

    // While locked, further frames are tracked but never analyzed.
    camera.frames = 20;
    assert_eq!(pipeline.run(&mut camera).await.unwrap(), 19);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.dispatcher_stats().queued, 1);
    assert!(handle.capture_snapshot().is_some_and(|f| f.frame_id == 19));

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(handle.status().await.unwrap().mode, LockMode::Unlocked);
    assert_eq!(*actuator.actions.lock().unwrap(), vec!["lock", "unlock"]);

    let sent = notifier.sent.lock().unwrap().clone();
    assert!(matches!(sent.first(), Some(Notification::PreyDetected { lock_note, .. }) if lock_note.starts_with("Door locked")));
    assert!(sent.iter().any(|n| matches!(n, Notification::Unlocked { .. })));

    let categories = archiver.categories.lock().unwrap().clone();
    assert!(categories.contains(&ArchiveCategory::Analysis));
    assert!(categories.contains(&ArchiveCategory::Prey));

    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn manual_commands_through_handle() {
    let actuator = Arc::new(RecordingActuator::default());
    let pipeline = PreyPipeline::new(
        CatDetector,
        GuardConfig::default(),
        Collaborators {
            classifier: Arc::new(PreyClassifier {
                calls: AtomicU32::new(0),
            }),
            actuator: actuator.clone(),
            notifier: Arc::new(RecordingNotifier::default()),
            archiver: None,
            flap_sensor: None,
        },
    )
    .unwrap();
    let handle = pipeline.handle();

    let report = handle.unlock("nothing to do").await.unwrap();
    assert_eq!(report.summary(), "Door was not locked");

    let report = handle.lock("vet visit").await.unwrap();
    assert!(report.status.is_locked());
    assert_eq!(report.status.reason.as_deref(), Some("vet visit"));

    tokio::time::sleep(Duration::from_secs(60)).await;
    let report = handle.unlock("back home").await.unwrap();
    assert_eq!(report.status.mode, LockMode::Unlocked);
    assert_eq!(report.status.remaining_seconds(), 0.0);
    assert_eq!(*actuator.actions.lock().unwrap(), vec!["lock", "unlock"]);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let mut config = GuardConfig::default();
    config.dispatcher.concurrency = 0;
    let result = PreyPipeline::new(
        CatDetector,
        config,
        Collaborators {
            classifier: Arc::new(PreyClassifier {
                calls: AtomicU32::new(0),
            }),
            actuator: Arc::new(RecordingActuator::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            archiver: None,
            flap_sensor: None,
        },
    );
    assert!(matches!(result, Err(catflap_guard::Error::Config(_))));
}
