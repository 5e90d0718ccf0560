//! Aggregate configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dispatcher::DispatcherConfig;
use crate::error::{Error, Result};
use crate::integration::PipelineConfig;
use crate::lock::LockConfig;
use crate::tracker::TrackerConfig;

/// Every component configuration in one place. Missing sections and fields
/// take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub tracker: TrackerConfig,
    pub dispatcher: DispatcherConfig,
    pub lock: LockConfig,
    pub pipeline: PipelineConfig,
}

impl GuardConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.tracker;
        unit_interval("tracker.iou_threshold", t.iou_threshold as f64)?;
        unit_interval("tracker.confident_score", t.confident_score as f64)?;
        positive("tracker.track_window_secs", t.track_window_secs)?;

        let d = &self.dispatcher;
        if d.concurrency == 0 {
            return Err(Error::Config("dispatcher.concurrency must be at least 1".into()));
        }
        if d.queue_capacity == 0 {
            return Err(Error::Config("dispatcher.queue_capacity must be at least 1".into()));
        }
        if d.max_attempts == 0 {
            return Err(Error::Config("dispatcher.max_attempts must be at least 1".into()));
        }
        unit_interval("dispatcher.ssim_threshold", d.ssim_threshold)?;
        if !(d.retry_backoff_secs.is_finite() && d.retry_backoff_secs >= 0.0) {
            return Err(Error::Config(
                "dispatcher.retry_backoff_secs must be a non-negative number".into(),
            ));
        }

        positive("lock.lock_duration_secs", self.lock.lock_duration_secs)?;

        if self.pipeline.qualifying_classes.is_empty() {
            return Err(Error::Config("pipeline.qualifying_classes must not be empty".into()));
        }
        let recent_exit = self.pipeline.recent_exit_secs;
        if !(recent_exit.is_finite() && recent_exit >= 0.0) {
            return Err(Error::Config(format!(
                "pipeline.recent_exit_secs must be a non-negative number, got {recent_exit}"
            )));
        }
        Ok(())
    }
}

fn unit_interval(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be within [0, 1], got {value}")))
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be a positive number of seconds, got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::FailurePolicy;
    use crate::tracker::Position;

    #[test]
    fn defaults_are_valid() {
        let config = GuardConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tracker.iou_threshold, 0.3);
        assert_eq!(config.dispatcher.concurrency, 10);
        assert_eq!(config.lock.lock_duration_secs, 300.0);
        assert_eq!(config.pipeline.qualifying_classes, vec!["cat".to_string()]);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = GuardConfig::from_json_str(
            r#"{
                "dispatcher": { "failure_policy": "lock", "concurrency": 4 },
                "pipeline": { "allowed_positions": ["middle"] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.dispatcher.failure_policy, FailurePolicy::Lock);
        assert_eq!(config.dispatcher.concurrency, 4);
        assert_eq!(config.dispatcher.max_attempts, 3);
        assert_eq!(config.pipeline.allowed_positions, vec![Position::Middle]);
        assert_eq!(config.tracker.track_window_secs, 15.0);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = GuardConfig::from_json_str(r#"{"tracker": {"iou_threshold": 1.5}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = GuardConfig::from_json_str(r#"{"lock": {"lock_duration_secs": 0}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = GuardConfig::from_json_str(r#"{"pipeline": {"qualifying_classes": []}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = GuardConfig::from_json_str(r#"{"pipeline": {"recent_exit_secs": -1}}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(GuardConfig::from_json_str(r#"{"pipeline": {"recent_exit_secs": 0}}"#).is_ok());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = GuardConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = GuardConfig::from_json_file("/nonexistent/catflap.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
