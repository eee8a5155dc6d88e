//! In-process execution of embedded jobs.

use std::sync::mpsc::Sender;
use std::sync::Arc;

use tracing::{debug, warn};

use forkstress_core::{Environment, Job, ResultSink, Status, TestResult, WorkloadRegistry};

use crate::scheduler::SchedulerEvent;

/// Runs embedded jobs on the CPUs the scheduler acquired for them.
///
/// `submit` must not block. Whatever happens, the runner reports exactly one
/// result per job through the [`EmbeddedCompletion`] it was handed.
pub trait EmbeddedRunner: Send + Sync {
    fn submit(&self, job: Arc<Job>, cpus: Vec<usize>, completion: EmbeddedCompletion);
}

/// Proof of an outstanding embedded job.
///
/// [`finish`](Self::finish) publishes the result and gives the CPUs back. A
/// completion dropped unfinished reports a `TestError` instead, so a panicking
/// runner cannot leak CPUs or lose the job.
pub struct EmbeddedCompletion {
    job: Arc<Job>,
    cpus: Option<Vec<usize>>,
    sink: Arc<dyn ResultSink>,
    events: Sender<SchedulerEvent>,
}

impl EmbeddedCompletion {
    pub(crate) fn new(
        job: Arc<Job>,
        cpus: Vec<usize>,
        sink: Arc<dyn ResultSink>,
        events: Sender<SchedulerEvent>,
    ) -> Self {
        Self {
            job,
            cpus: Some(cpus),
            sink,
            events,
        }
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub fn finish(mut self, result: TestResult) {
        self.complete(result);
    }

    fn complete(&mut self, result: TestResult) {
        let Some(cpus) = self.cpus.take() else {
            return;
        };
        self.sink.add(result);
        if self.events.send(SchedulerEvent::EmbeddedDone { cpus }).is_err() {
            debug!(job = %self.job.name, "scheduler gone before embedded job finished");
        }
    }
}

impl Drop for EmbeddedCompletion {
    fn drop(&mut self) {
        if self.cpus.is_some() {
            warn!(job = %self.job.name, "embedded job abandoned without a result");
            let result = TestResult::failure(
                Arc::clone(&self.job),
                Status::TestError,
                ["Embedded runner finished without reporting a result"],
            );
            self.complete(result);
        }
    }
}

/// Runs each embedded job on its own OS thread through a workload registry.
///
/// Threads are not pinned. The acquired CPUs only bound how many jobs run
/// at once and show up in the logs.
pub struct ThreadedRunner {
    registry: Arc<WorkloadRegistry>,
}

impl ThreadedRunner {
    pub fn new(registry: WorkloadRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}

impl Default for ThreadedRunner {
    fn default() -> Self {
        Self::new(WorkloadRegistry::with_builtins())
    }
}

impl EmbeddedRunner for ThreadedRunner {
    fn submit(&self, job: Arc<Job>, cpus: Vec<usize>, completion: EmbeddedCompletion) {
        let registry = Arc::clone(&self.registry);
        let name = format!("embedded-{}", job.name);
        debug!(job = %job.name, cpus = ?cpus, "running embedded job");
        // On spawn failure the closure is dropped and the completion reports it.
        let spawned = std::thread::Builder::new().name(name).spawn(move || {
            let mut result = registry.execute(&job);
            result.set_env(Environment::capture());
            completion.finish(result);
        });
        if let Err(e) = spawned {
            warn!(error = %e, "could not spawn embedded job thread");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use forkstress_core::{CollectingSink, DispatchMode, ExecMode, RacyCounter};

    use super::*;

    fn job(harness: &str) -> Arc<Job> {
        Arc::new(Job::uniform("t.Embedded", harness, &["a", "b"], ExecMode::Tier2, DispatchMode::Embedded))
    }

    fn completion(
        job: &Arc<Job>,
        sink: &Arc<CollectingSink>,
    ) -> (EmbeddedCompletion, mpsc::Receiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::channel();
        let sink: Arc<dyn ResultSink> = Arc::clone(sink) as Arc<dyn ResultSink>;
        (EmbeddedCompletion::new(Arc::clone(job), vec![0, 1], sink, tx), rx)
    }

    fn released(rx: &mpsc::Receiver<SchedulerEvent>) -> Vec<usize> {
        match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
            SchedulerEvent::EmbeddedDone { cpus } => cpus,
            _ => panic!("expected a release"),
        }
    }

    #[test]
    fn threaded_runner_reports_result_and_releases() {
        let sink = Arc::new(CollectingSink::new());
        let job = job(RacyCounter::HARNESS);
        let (completion, rx) = completion(&job, &sink);

        let mut registry = WorkloadRegistry::new();
        registry.register(RacyCounter::new(50)).unwrap();
        ThreadedRunner::new(registry).submit(Arc::clone(&job), vec![0, 1], completion);

        assert_eq!(released(&rx), vec![0, 1]);
        let results = sink.drain();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status(), Status::Normal);
        assert_eq!(results[0].total_count(), 50);
        assert!(results[0].env().is_some());
    }

    #[test]
    fn unknown_harness_is_a_test_error() {
        let sink = Arc::new(CollectingSink::new());
        let job = job("no.such.harness");
        let (completion, rx) = completion(&job, &sink);
        ThreadedRunner::default().submit(Arc::clone(&job), vec![0, 1], completion);

        released(&rx);
        assert_eq!(sink.drain()[0].status(), Status::TestError);
    }

    #[test]
    fn dropped_completion_still_reports_once() {
        let sink = Arc::new(CollectingSink::new());
        let job = job(RacyCounter::HARNESS);
        let (completion, rx) = completion(&job, &sink);
        drop(completion);

        assert_eq!(released(&rx), vec![0, 1]);
        assert!(rx.try_recv().is_err());
        let results = sink.drain();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status(), Status::TestError);
    }

    #[test]
    fn panicking_runner_is_contained() {
        struct Panics;
        impl EmbeddedRunner for Panics {
            fn submit(&self, _job: Arc<Job>, _cpus: Vec<usize>, completion: EmbeddedCompletion) {
                std::thread::spawn(move || {
                    let _held = completion;
                    panic!("workload blew up");
                });
            }
        }

        let sink = Arc::new(CollectingSink::new());
        let job = job(RacyCounter::HARNESS);
        let (completion, rx) = completion(&job, &sink);
        Panics.submit(Arc::clone(&job), vec![0, 1], completion);

        released(&rx);
        assert_eq!(sink.len(), 1);
    }
}
