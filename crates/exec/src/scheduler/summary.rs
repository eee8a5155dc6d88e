use std::time::Duration;

use serde::Serialize;

/// What happened during one [`Scheduler::run_all`](super::Scheduler::run_all).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Jobs handed to the scheduler.
    pub jobs: usize,
    pub embedded_dispatched: usize,
    pub embedded_completed: usize,
    pub forked_dispatched: usize,
    /// Forked workers whose own result reached the sink.
    pub forked_passed: usize,
    /// Results the scheduler had to make up for a job.
    pub synthesized_failures: usize,
    /// Jobs that could never be dispatched.
    pub rejected: usize,
    pub protocol_violations: Vec<String>,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Number of results the run contributed to the sink.
    pub fn results(&self) -> usize {
        self.embedded_completed + self.forked_passed + self.synthesized_failures + self.rejected
    }

    pub fn is_clean(&self) -> bool {
        self.protocol_violations.is_empty() && self.synthesized_failures == 0 && self.rejected == 0
    }
}
