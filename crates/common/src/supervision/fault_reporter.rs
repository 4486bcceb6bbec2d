use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Faults the pipelines survive and report instead of propagating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    PublishFailure,
    LoopFailure,
    DequeueFailure,
    ArchiveWriteFailure,
    ShutdownTimeout,
}

impl FaultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FaultKind::PublishFailure => "publish_failure",
            FaultKind::LoopFailure => "loop_failure",
            FaultKind::DequeueFailure => "dequeue_failure",
            FaultKind::ArchiveWriteFailure => "archive_write_failure",
            FaultKind::ShutdownTimeout => "shutdown_timeout",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineFault {
    pub kind: FaultKind,
    pub component: &'static str,
    pub message: String,
    /// Events lost or put back because of this fault
    pub affected_events: usize,
    pub occurred_at: DateTime<Utc>,
}

impl PipelineFault {
    pub fn new(kind: FaultKind, component: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            component,
            message: message.into(),
            affected_events: 0,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_affected_events(mut self, count: usize) -> Self {
        self.affected_events = count;
        self
    }
}

/// Running totals per fault kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultSnapshot {
    pub publish_failures: u64,
    pub loop_failures: u64,
    pub dequeue_failures: u64,
    pub archive_write_failures: u64,
    pub shutdown_timeouts: u64,
    pub events_dropped: u64,
}

impl FaultSnapshot {
    pub fn total(&self) -> u64 {
        self.publish_failures
            + self.loop_failures
            + self.dequeue_failures
            + self.archive_write_failures
            + self.shutdown_timeouts
    }
}

#[derive(Debug, Default)]
struct FaultCounters {
    publish_failures: AtomicU64,
    loop_failures: AtomicU64,
    dequeue_failures: AtomicU64,
    archive_write_failures: AtomicU64,
    shutdown_timeouts: AtomicU64,
    events_dropped: AtomicU64,
}

impl FaultCounters {
    fn counter(&self, kind: FaultKind) -> &AtomicU64 {
        match kind {
            FaultKind::PublishFailure => &self.publish_failures,
            FaultKind::LoopFailure => &self.loop_failures,
            FaultKind::DequeueFailure => &self.dequeue_failures,
            FaultKind::ArchiveWriteFailure => &self.archive_write_failures,
            FaultKind::ShutdownTimeout => &self.shutdown_timeouts,
        }
    }
}

/// Structured error channel shared by every long-running pipeline task
///
/// Each report is logged, counted, and forwarded to the subscriber if one is attached.
/// Reporting never blocks and never fails.
#[derive(Debug, Clone, Default)]
pub struct FaultReporter {
    counters: Arc<FaultCounters>,
    subscriber: Option<mpsc::UnboundedSender<PipelineFault>>,
}

impl FaultReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reporter that also forwards every fault to the returned receiver
    pub fn with_subscriber() -> (Self, mpsc::UnboundedReceiver<PipelineFault>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                counters: Arc::default(),
                subscriber: Some(tx),
            },
            rx,
        )
    }

    pub fn report(&self, fault: PipelineFault) {
        match fault.kind {
            FaultKind::ShutdownTimeout => warn!(
                fault = %fault.kind,
                component = fault.component,
                affected_events = fault.affected_events,
                "{}",
                fault.message
            ),
            _ => error!(
                fault = %fault.kind,
                component = fault.component,
                affected_events = fault.affected_events,
                "{}",
                fault.message
            ),
        }

        self.counters
            .counter(fault.kind)
            .fetch_add(1, Ordering::Relaxed);
        if matches!(
            fault.kind,
            FaultKind::PublishFailure | FaultKind::ArchiveWriteFailure
        ) {
            self.counters
                .events_dropped
                .fetch_add(fault.affected_events as u64, Ordering::Relaxed);
        }

        if let Some(subscriber) = &self.subscriber {
            // A closed subscriber only loses the forwarded copy.
            let _ = subscriber.send(fault);
        }
    }

    pub fn snapshot(&self) -> FaultSnapshot {
        let c = &self.counters;
        FaultSnapshot {
            publish_failures: c.publish_failures.load(Ordering::Relaxed),
            loop_failures: c.loop_failures.load(Ordering::Relaxed),
            dequeue_failures: c.dequeue_failures.load(Ordering::Relaxed),
            archive_write_failures: c.archive_write_failures.load(Ordering::Relaxed),
            shutdown_timeouts: c.shutdown_timeouts.load(Ordering::Relaxed),
            events_dropped: c.events_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_kind() {
        let reporter = FaultReporter::new();
        reporter.report(
            PipelineFault::new(FaultKind::PublishFailure, "test", "broker down")
                .with_affected_events(3),
        );
        reporter.report(PipelineFault::new(FaultKind::DequeueFailure, "test", "reset"));
        reporter.report(PipelineFault::new(FaultKind::DequeueFailure, "test", "reset"));

        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.publish_failures, 1);
        assert_eq!(snapshot.dequeue_failures, 2);
        assert_eq!(snapshot.events_dropped, 3);
        assert_eq!(snapshot.total(), 3);
    }

    #[test]
    fn test_clones_share_counters() {
        let reporter = FaultReporter::new();
        let clone = reporter.clone();
        clone.report(PipelineFault::new(FaultKind::LoopFailure, "test", "panic"));
        assert_eq!(reporter.snapshot().loop_failures, 1);
    }

    #[tokio::test]
    async fn test_subscriber_receives_faults() {
        let (reporter, mut faults) = FaultReporter::with_subscriber();
        reporter.report(
            PipelineFault::new(FaultKind::ArchiveWriteFailure, "archive_writer", "disk full")
                .with_affected_events(2),
        );

        let fault = faults.recv().await.unwrap();
        assert_eq!(fault.kind, FaultKind::ArchiveWriteFailure);
        assert_eq!(fault.component, "archive_writer");
        assert_eq!(fault.affected_events, 2);
    }

    #[test]
    fn test_dropped_subscriber_does_not_fail_reports() {
        let (reporter, faults) = FaultReporter::with_subscriber();
        drop(faults);
        reporter.report(PipelineFault::new(FaultKind::ShutdownTimeout, "test", "late"));
        assert_eq!(reporter.snapshot().shutdown_timeouts, 1);
    }
}
