//! The boundary to the code under test.
//!
//! Workload bodies are produced elsewhere; this module only defines how a
//! runner finds and invokes one for a [`Job`], plus a small built-in workload
//! used by the binaries and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};

use crate::error::CoreError;
use crate::job::Job;
use crate::result::{Status, TestResult};

/// Executes the roles of one job and reports what it observed.
pub trait Workload: Send + Sync {
    /// Harness identifier this workload answers to.
    fn harness(&self) -> &str;

    /// Run the job to completion on the calling thread (spawning role
    /// threads as needed).
    fn run(&self, job: &Arc<Job>) -> Result<TestResult, CoreError>;
}

/// Workloads keyed by harness identifier.
pub struct WorkloadRegistry {
    workloads: HashMap<String, Arc<dyn Workload>>,
}

impl WorkloadRegistry {
    pub fn new() -> Self {
        Self {
            workloads: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in workloads.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(RacyCounter::default())
            .expect("builtin harness names are unique");
        registry
    }

    /// Register a workload. Returns error if the harness is already taken.
    pub fn register(&mut self, workload: impl Workload + 'static) -> Result<(), CoreError> {
        let harness = workload.harness().to_string();
        if self.workloads.contains_key(&harness) {
            return Err(CoreError::DuplicateHarness(harness));
        }
        self.workloads.insert(harness, Arc::new(workload));
        Ok(())
    }

    pub fn get(&self, harness: &str) -> Option<Arc<dyn Workload>> {
        self.workloads.get(harness).cloned()
    }

    /// Validate the job, find its workload and run it.
    ///
    /// Failures come back as `TestError` results rather than errors, so the
    /// caller always has exactly one result to submit.
    pub fn execute(&self, job: &Arc<Job>) -> TestResult {
        let outcome = job.validate().and_then(|_| {
            let workload = self
                .get(&job.harness)
                .ok_or_else(|| CoreError::UnknownHarness(job.harness.clone()))?;
            workload.run(job)
        });
        match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(job = %job.name, error = %e, "workload failed");
                TestResult::failure(Arc::clone(job), Status::TestError, [e.to_string()])
            }
        }
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }
}

impl Default for WorkloadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Every role bumps a shared counter with a non-atomic read-modify-write,
/// then the final value of each round is recorded. Any value below the
/// thread count is a lost update.
pub struct RacyCounter {
    rounds: u64,
}

impl RacyCounter {
    pub const HARNESS: &'static str = "builtin.racy_counter";

    pub fn new(rounds: u64) -> Self {
        Self { rounds }
    }
}

impl Default for RacyCounter {
    fn default() -> Self {
        Self::new(5_000)
    }
}

impl Workload for RacyCounter {
    fn harness(&self) -> &str {
        Self::HARNESS
    }

    fn run(&self, job: &Arc<Job>) -> Result<TestResult, CoreError> {
        let threads = job.threads;
        let rounds = self.rounds;
        let counter = Arc::new(AtomicU64::new(0));
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|idx| {
                let counter = Arc::clone(&counter);
                let barrier = Arc::clone(&barrier);
                std::thread::Builder::new()
                    .name(format!("{}-{}", job.name, job.roles[idx]))
                    .spawn(move || {
                        let mut seen: Vec<u64> = Vec::new();
                        for _ in 0..rounds {
                            let v = counter.load(Ordering::Relaxed);
                            counter.store(v + 1, Ordering::Relaxed);
                            barrier.wait();
                            // Thread 0 owns the bookkeeping between rounds.
                            if idx == 0 {
                                seen.push(counter.swap(0, Ordering::Relaxed));
                            }
                            barrier.wait();
                        }
                        seen
                    })
            })
            .collect::<Result<_, _>>()?;

        let mut result = TestResult::new(Arc::clone(job), Status::Normal);
        for (idx, handle) in handles.into_iter().enumerate() {
            let seen = handle
                .join()
                .map_err(|_| CoreError::Workload(format!("role {} panicked", job.roles[idx])))?;
            for value in seen {
                result.add_state(value.to_string(), 1);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{DispatchMode, ExecMode};

    fn racy_job(threads: usize) -> Arc<Job> {
        let roles: Vec<String> = (0..threads).map(|i| format!("actor{}", i + 1)).collect();
        let roles: Vec<&str> = roles.iter().map(String::as_str).collect();
        Arc::new(Job::uniform(
            "t.RacyCounter",
            RacyCounter::HARNESS,
            &roles,
            ExecMode::Tier2,
            DispatchMode::Embedded,
        ))
    }

    #[test]
    fn racy_counter_records_one_state_per_round() {
        let job = racy_job(2);
        let result = RacyCounter::new(200).run(&job).unwrap();

        assert_eq!(result.status(), Status::Normal);
        assert_eq!(result.total_count(), 200);
        for key in result.state_keys() {
            let v: u64 = key.parse().unwrap();
            assert!((1..=2).contains(&v), "unexpected final value {v}");
        }
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut registry = WorkloadRegistry::with_builtins();
        assert_eq!(registry.len(), 1);
        assert!(matches!(
            registry.register(RacyCounter::default()),
            Err(CoreError::DuplicateHarness(_))
        ));
    }

    #[test]
    fn unknown_harness_becomes_test_error() {
        let registry = WorkloadRegistry::new();
        let job = Arc::new(Job::uniform("t.Missing", "nope", &["a"], ExecMode::Tier1, DispatchMode::Embedded));
        let result = registry.execute(&job);
        assert_eq!(result.status(), Status::TestError);
        assert!(result.messages()[0].contains("nope"));
    }

    #[test]
    fn invalid_job_becomes_test_error() {
        let registry = WorkloadRegistry::with_builtins();
        let job = Arc::new(
            Job::uniform("t.Bad", RacyCounter::HARNESS, &["a", "b"], ExecMode::Tier1, DispatchMode::Embedded)
                .with_modes(vec![]),
        );
        assert_eq!(registry.execute(&job).status(), Status::TestError);
    }
}
