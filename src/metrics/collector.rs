//! Metrics collection and registry.

use crate::session::SessionStats;
use crate::upload::{JobStatus, JobStore, QueueError, UploadQueue};
use crate::validation::ReasonCode;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),
    #[error("server error: {0}")]
    Server(String),
}

/// Upload queue sizes by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub uploading: usize,
    pub uploaded: usize,
    pub failed: usize,
}

impl QueueCounts {
    /// Counts the jobs of a queue.
    pub fn of<S: JobStore>(queue: &UploadQueue<S>) -> Result<Self, QueueError> {
        Ok(Self {
            pending: queue.count_by_status(JobStatus::Pending)?,
            uploading: queue.count_by_status(JobStatus::Uploading)?,
            uploaded: queue.count_by_status(JobStatus::Uploaded)?,
            failed: queue.count_by_status(JobStatus::Failed)?,
        })
    }
}

/// A snapshot of system state for metrics update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Session and engine counters.
    pub session: SessionStats,
    /// Upload queue sizes, when a queue is attached.
    pub queue: Option<QueueCounts>,
}

/// Prometheus metrics registry for the capture pipeline.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,

    // Engine
    frames_analyzed: IntCounter,
    frames_dropped: IntCounter,
    frames_obstructed: IntCounter,
    analysis_faults: IntCounter,
    calibrations: IntCounter,
    triggers: IntCounter,
    focus_requests: IntCounter,

    // Session
    frames_skipped: IntCounter,
    photos_accepted: IntCounter,
    photos_rejected: IntCounter,
    capture_failures: IntCounter,
    cards_queued: IntCounter,

    // Validation
    validation_results: IntCounterVec,

    // Upload
    upload_jobs: IntGaugeVec,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, MetricsError> {
    let c = IntCounter::new(name, help)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn catch_up(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

impl MetricsRegistry {
    /// Creates a new registry with all capture metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let frames_analyzed = counter(
            &registry,
            "card_capture_frames_analyzed_total",
            "Preview frames analyzed by the engine",
        )?;
        let frames_dropped = counter(
            &registry,
            "card_capture_frames_dropped_total",
            "Preview frames dropped while a capture was busy",
        )?;
        let frames_obstructed = counter(
            &registry,
            "card_capture_frames_obstructed_total",
            "Preview frames rejected as lens obstruction",
        )?;
        let analysis_faults = counter(
            &registry,
            "card_capture_analysis_faults_total",
            "Preview frames that could not be analyzed",
        )?;
        let calibrations = counter(
            &registry,
            "card_capture_calibrations_total",
            "Background calibrations completed",
        )?;
        let triggers = counter(&registry, "card_capture_triggers_total", "Still captures triggered")?;
        let focus_requests = counter(
            &registry,
            "card_capture_focus_requests_total",
            "Autofocus requests issued",
        )?;

        let frames_skipped = counter(
            &registry,
            "card_capture_frames_skipped_total",
            "Preview frames skipped because the analysis worker was busy",
        )?;
        let photos_accepted = counter(
            &registry,
            "card_capture_photos_accepted_total",
            "Stills accepted by the validator",
        )?;
        let photos_rejected = counter(
            &registry,
            "card_capture_photos_rejected_total",
            "Stills rejected by the validator",
        )?;
        let capture_failures = counter(
            &registry,
            "card_capture_still_failures_total",
            "Still captures that failed outright",
        )?;
        let cards_queued = counter(
            &registry,
            "card_capture_cards_queued_total",
            "Labeled cards queued for upload",
        )?;

        let validation_results = IntCounterVec::new(
            Opts::new("card_capture_validation_results_total", "Validator outcomes by reason code"),
            &["reason"],
        )?;
        registry.register(Box::new(validation_results.clone()))?;

        let upload_jobs = IntGaugeVec::new(
            Opts::new("card_capture_upload_jobs", "Upload jobs by status"),
            &["status"],
        )?;
        registry.register(Box::new(upload_jobs.clone()))?;

        Ok(Self {
            registry,
            frames_analyzed,
            frames_dropped,
            frames_obstructed,
            analysis_faults,
            calibrations,
            triggers,
            focus_requests,
            frames_skipped,
            photos_accepted,
            photos_rejected,
            capture_failures,
            cards_queued,
            validation_results,
            upload_jobs,
        })
    }

    /// Updates all metrics from a snapshot of system state.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        let engine = &snapshot.session.engine;
        catch_up(&self.frames_analyzed, engine.frames_analyzed);
        catch_up(&self.frames_dropped, engine.frames_dropped);
        catch_up(&self.frames_obstructed, engine.frames_obstructed);
        catch_up(&self.analysis_faults, engine.analysis_faults);
        catch_up(&self.calibrations, engine.calibrations_completed);
        catch_up(&self.triggers, engine.triggers);
        catch_up(&self.focus_requests, engine.focus_requests);

        let session = &snapshot.session;
        catch_up(&self.frames_skipped, session.frames_skipped);
        catch_up(&self.photos_accepted, session.photos_accepted);
        catch_up(&self.photos_rejected, session.photos_rejected);
        catch_up(&self.capture_failures, session.capture_failures);
        catch_up(&self.cards_queued, session.cards_queued);

        if let Some(queue) = snapshot.queue {
            for (status, count) in [
                (JobStatus::Pending, queue.pending),
                (JobStatus::Uploading, queue.uploading),
                (JobStatus::Uploaded, queue.uploaded),
                (JobStatus::Failed, queue.failed),
            ] {
                let label = status.to_string();
                self.upload_jobs
                    .with_label_values(&[label.as_str()])
                    .set(count as i64);
            }
        }
    }

    /// Counts one validator outcome.
    pub fn record_validation(&self, reason: ReasonCode) {
        self.validation_results
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{CardRecord, Grade};
    use crate::engine::EngineStats;
    use crate::upload::MemoryJobStore;

    fn snapshot(analyzed: u64, triggers: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            session: SessionStats {
                engine: EngineStats {
                    frames_analyzed: analyzed,
                    triggers,
                    ..EngineStats::default()
                },
                photos_accepted: triggers,
                frames_skipped: analyzed / 5,
                ..SessionStats::default()
            },
            queue: Some(QueueCounts {
                pending: 2,
                failed: 1,
                ..QueueCounts::default()
            }),
        }
    }

    #[test]
    fn test_registry_creation() {
        assert!(MetricsRegistry::new().is_ok());
    }

    #[test]
    fn test_counters_follow_totals() {
        let registry = MetricsRegistry::new().unwrap();
        registry.update(&snapshot(10, 1));
        registry.update(&snapshot(25, 2));
        // Totals never move backwards.
        registry.update(&snapshot(5, 0));

        let output = registry.encode().unwrap();
        assert!(output.contains("card_capture_frames_analyzed_total 25"));
        assert!(output.contains("card_capture_triggers_total 2"));
        assert!(output.contains("card_capture_frames_skipped_total 5"));
        assert!(output.contains("card_capture_photos_accepted_total 2"));
        assert!(output.contains("card_capture_upload_jobs{status=\"PENDING\"} 2"));
        assert!(output.contains("card_capture_upload_jobs{status=\"FAILED\"} 1"));
    }

    #[test]
    fn test_validation_reasons() {
        let registry = MetricsRegistry::new().unwrap();
        registry.record_validation(ReasonCode::Blur);
        registry.record_validation(ReasonCode::Blur);
        registry.record_validation(ReasonCode::Ok);

        let output = registry.encode().unwrap();
        assert!(output.contains("card_capture_validation_results_total{reason=\"BLUR\"} 2"));
        assert!(output.contains("card_capture_validation_results_total{reason=\"OK\"} 1"));
    }

    #[test]
    fn test_queue_counts() {
        let mut queue = UploadQueue::new(MemoryJobStore::new());
        let record = CardRecord {
            base_id: "b".into(),
            device: "d".into(),
            front_path: "f.jpg".into(),
            back_path: "b.jpg".into(),
            front_grade: Grade::NearMint,
            back_grade: Grade::NearMint,
            final_grade: Grade::NearMint,
            created_at_ms: 0,
        };
        let a = queue.enqueue(&record, 1).unwrap();
        queue.enqueue(&record, 2).unwrap();
        queue.mark_uploaded(a).unwrap();

        let counts = QueueCounts::of(&queue).unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.uploaded, 1);
        assert_eq!(counts.failed, 0);
    }
}
