use std::sync::{Arc, Mutex};

use crate::result::TestResult;

/// Shared destination for finished results.
///
/// Every job contributes exactly one result; implementations take ownership,
/// so a submitted result is sealed.
pub trait ResultSink: Send + Sync {
    fn add(&self, result: TestResult);
}

/// Blanket implementation so `Arc<dyn ResultSink>` can be used directly.
impl<T: ResultSink + ?Sized> ResultSink for Arc<T> {
    fn add(&self, result: TestResult) {
        (**self).add(result)
    }
}

/// Sink that keeps every result in memory, in arrival order.
#[derive(Default)]
pub struct CollectingSink {
    results: Mutex<Vec<TestResult>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take all collected results, leaving the sink empty.
    pub fn drain(&self) -> Vec<TestResult> {
        std::mem::take(&mut *self.lock())
    }

    /// Snapshot of collected results.
    pub fn results(&self) -> Vec<TestResult> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TestResult>> {
        // A panicking producer must not hide the results that did arrive.
        self.results.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ResultSink for CollectingSink {
    fn add(&self, result: TestResult) {
        tracing::debug!(job = %result.name(), status = ?result.status(), "result collected");
        self.lock().push(result);
    }
}
