use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use forkstress_core::{DispatchMode, Job, Status, TestResult};
use forkstress_link::LinkError;

use crate::embedded::EmbeddedCompletion;
use crate::error::ExecError;
use crate::scheduler::events::SchedulerEvent;
use crate::scheduler::summary::RunSummary;
use crate::worker::{WorkerProcess, WorkerState};

use super::{Scheduler, SchedulerState};

impl Scheduler {
    /// Dispatch every job in order and block until all of them reported.
    ///
    /// Each job contributes exactly one result to the sink; job failures
    /// never abort the run. A scheduler runs once; jobs given to a finished
    /// scheduler are rejected.
    pub fn run_all<I>(&mut self, jobs: I) -> RunSummary
    where
        I: IntoIterator<Item = Job>,
    {
        if self.state != SchedulerState::Init {
            for job in jobs {
                self.summary.jobs += 1;
                self.reject(&Arc::new(job), "scheduler has already run".into());
            }
            return self.summary.clone();
        }

        let started = Instant::now();
        self.state = SchedulerState::Dispatching;
        info!(threads = self.layout.capacity(), "dispatching jobs");

        for job in jobs {
            self.summary.jobs += 1;
            self.dispatch(Arc::new(job));
        }

        self.state = SchedulerState::Draining;
        info!(outstanding = self.workers.len(), "all jobs dispatched, draining");
        // Only succeeds once every outstanding job has given its CPUs back.
        let everything = self.acquire(self.layout.capacity());
        self.layout.release(&everything);

        self.shutdown_link();
        self.state = SchedulerState::Terminated;
        self.summary.elapsed = started.elapsed();
        info!(
            jobs = self.summary.jobs,
            results = self.summary.results(),
            violations = self.summary.protocol_violations.len(),
            elapsed = ?self.summary.elapsed,
            "run finished"
        );
        self.summary.clone()
    }

    fn dispatch(&mut self, job: Arc<Job>) {
        if let Err(e) = job.validate() {
            self.reject(&job, e.to_string());
            return;
        }
        if job.threads > self.layout.capacity() {
            let reason = format!(
                "job needs {} threads, the budget is {}",
                job.threads,
                self.layout.capacity()
            );
            self.reject(&job, reason);
            return;
        }

        let cpus = self.acquire(job.threads);
        match job.dispatch {
            DispatchMode::Embedded => self.dispatch_embedded(job, cpus),
            DispatchMode::Forked => self.dispatch_forked(job, cpus),
        }
    }

    fn dispatch_embedded(&mut self, job: Arc<Job>, cpus: Vec<usize>) {
        debug!(job = %job.name, cpus = ?cpus, "dispatching embedded job");
        let completion = EmbeddedCompletion::new(
            Arc::clone(&job),
            cpus.clone(),
            Arc::clone(&self.sink),
            self.events_tx.clone(),
        );
        self.summary.embedded_dispatched += 1;
        self.embedded.submit(job, cpus, completion);
    }

    fn dispatch_forked(&mut self, job: Arc<Job>, cpus: Vec<usize>) {
        let token = self.next_token();
        match WorkerProcess::new(token.clone(), Arc::clone(&job), cpus.clone(), &self.endpoint, &self.launch) {
            Ok(worker) => {
                // Registered before it starts, so its first pull always finds it.
                let worker = self.workers.entry(token).or_insert(worker);
                worker.start();
                self.summary.forked_dispatched += 1;
            }
            Err(e) => {
                warn!(job = %job.name, token = %token, error = %e, "could not prepare worker");
                self.sink.add(TestResult::failure(
                    job,
                    Status::VmError,
                    [format!("Failed to prepare worker: {e}")],
                ));
                self.summary.synthesized_failures += 1;
                self.layout.release(&cpus);
            }
        }
    }

    /// Block until `n` CPUs are free, harvesting finished work meanwhile.
    pub(super) fn acquire(&mut self, n: usize) -> Vec<usize> {
        loop {
            if let Some(cpus) = self.layout.try_acquire(n) {
                return cpus;
            }
            self.handle_pending_events();
            self.reap_workers();
            if self.layout.available() < n {
                self.wait_for_event();
            }
        }
    }

    fn wait_for_event(&mut self) {
        match self.events.recv_timeout(self.spin_wait_delay) {
            Ok(event) => {
                self.handle_event(event);
                self.handle_pending_events();
            }
            Err(RecvTimeoutError::Timeout) => {}
            // The scheduler holds a sender itself.
            Err(RecvTimeoutError::Disconnected) => {}
        }
    }

    pub(super) fn handle_pending_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::PullJob { token, reply } => {
                let answer = match self.workers.get_mut(&token) {
                    Some(worker) => {
                        let job = worker.job_request();
                        debug!(token = %token, delivered = job.is_some(), "job pulled");
                        Ok(job.map(|job| (*job).clone()))
                    }
                    None => Err(self.unknown_token(&token)),
                };
                if reply.send(answer).is_err() {
                    debug!(token = %token, "pull requester went away");
                }
            }
            SchedulerEvent::PushResult {
                token,
                result,
                reply,
            } => {
                let answer = match self.workers.get_mut(&token) {
                    Some(worker) => match worker.record_result(*result) {
                        Ok(()) => {
                            debug!(token = %token, "result recorded");
                            Ok(())
                        }
                        Err(e) => {
                            self.record_violation(&e);
                            Err(LinkError::Protocol(e.to_string()))
                        }
                    },
                    None => Err(self.unknown_token(&token)),
                };
                if reply.send(answer).is_err() {
                    debug!(token = %token, "push requester went away");
                }
            }
            SchedulerEvent::EmbeddedDone { cpus } => {
                debug!(cpus = ?cpus, "embedded job done");
                self.layout.release(&cpus);
                self.summary.embedded_completed += 1;
            }
            SchedulerEvent::KillWorker { token } => match self.workers.get_mut(&token) {
                Some(worker) => {
                    warn!(token = %token, job = %worker.job().name, "killing worker on request");
                    if let Err(e) = worker.kill() {
                        error!(token = %token, error = %e, "could not kill worker");
                    }
                }
                None => debug!(token = %token, "kill requested for a worker that is not live"),
            },
        }
    }

    /// Poll every live worker and give back the CPUs of finished ones.
    fn reap_workers(&mut self) {
        let mut finished = Vec::new();
        for (token, worker) in self.workers.iter_mut() {
            match worker.check_completed(&*self.sink) {
                Ok(true) => finished.push((token.clone(), None)),
                Ok(false) => {}
                Err(e) => finished.push((token.clone(), Some(e))),
            }
        }

        for (token, violation) in finished {
            let Some(mut worker) = self.workers.remove(&token) else {
                continue;
            };
            match violation {
                Some(e) => {
                    self.record_violation(&e);
                    self.sink.add(worker.violation_result(&e));
                    self.summary.synthesized_failures += 1;
                }
                None if worker.state() == WorkerState::Completed(true) => {
                    self.summary.forked_passed += 1;
                }
                None => self.summary.synthesized_failures += 1,
            }
            self.layout.release(worker.cpus());
            info!(token = %token, job = %worker.job().name, cpus = ?worker.cpus(), "worker harvested");
        }
    }

    fn reject(&mut self, job: &Arc<Job>, reason: String) {
        warn!(job = %job.name, reason = %reason, "rejecting job");
        self.sink.add(TestResult::failure(Arc::clone(job), Status::TestError, [reason]));
        self.summary.rejected += 1;
    }

    fn unknown_token(&mut self, token: &str) -> LinkError {
        self.record_violation(&ExecError::violation(token, "unknown token"));
        LinkError::UnknownToken(token.to_string())
    }

    fn record_violation(&mut self, violation: &ExecError) {
        error!(error = %violation, "protocol violation");
        self.summary.protocol_violations.push(violation.to_string());
    }
}
