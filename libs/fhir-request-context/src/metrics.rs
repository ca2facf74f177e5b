//! Storage metrics attached to a request by the storage layer.

use std::fmt::Debug;
use std::time::{Duration, Instant};

/// Opaque handle describing the storage work done for one request.
///
/// The request context only carries it; the storage layer decides what is inside.
pub trait StorageRequestMetrics: Debug + Send + Sync {
    /// Name of the storage operation (e.g. `search`, `upsert`).
    fn operation(&self) -> &str;

    /// Time spent in storage.
    fn elapsed(&self) -> Duration;

    /// Number of resources read or written, if tracked.
    fn resource_count(&self) -> Option<u64> {
        None
    }
}

/// Timing-based metrics for a single storage operation.
#[derive(Debug, Clone)]
pub struct StorageOperationMetrics {
    operation: String,
    started_at: Instant,
    elapsed: Option<Duration>,
    resource_count: Option<u64>,
}

impl StorageOperationMetrics {
    /// Start timing `operation`.
    pub fn start(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            started_at: Instant::now(),
            elapsed: None,
            resource_count: None,
        }
    }

    pub fn with_resource_count(mut self, count: u64) -> Self {
        self.resource_count = Some(count);
        self
    }

    /// Stop the clock. Later calls keep the first measurement.
    pub fn finish(mut self) -> Self {
        if self.elapsed.is_none() {
            self.elapsed = Some(self.started_at.elapsed());
        }
        self
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed.is_some()
    }
}

impl StorageRequestMetrics for StorageOperationMetrics {
    fn operation(&self) -> &str {
        &self.operation
    }

    fn elapsed(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started_at.elapsed())
    }

    fn resource_count(&self) -> Option<u64> {
        self.resource_count
    }
}
