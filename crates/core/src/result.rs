use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::job::Job;

/// Outcome class of one job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// The workload ran; grading happens elsewhere.
    Normal,
    /// The workload does not match the API the harness expects.
    ApiMismatch,
    /// The workload itself failed.
    TestError,
    /// The workload's self-check failed.
    CheckTestError,
    /// The workload overran its time budget.
    TimeoutError,
    /// The worker process could not run the job at all.
    VmError,
}

impl Status {
    pub fn is_failure(self) -> bool {
        !matches!(self, Status::Normal | Status::ApiMismatch)
    }
}

/// Snapshot of the host a job ran on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    entries: BTreeMap<String, String>,
}

impl Environment {
    /// Capture the basics every report wants to show.
    pub fn capture() -> Self {
        let mut env = Self::default();
        env.put("os", std::env::consts::OS);
        env.put("arch", std::env::consts::ARCH);
        env.put("pid", std::process::id().to_string());
        env.put(
            "available_parallelism",
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .to_string(),
        );
        env.put("captured_at", Utc::now().to_rfc3339());
        env
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }
}

/// Accumulator for everything one job execution produced.
///
/// Built incrementally by whoever runs the job, then handed by value to a
/// [`ResultSink`](crate::sink::ResultSink), after which it can no longer change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    job: Arc<Job>,
    status: Status,
    states: BTreeMap<String, u64>,
    env: Option<Environment>,
    messages: Vec<String>,
    vm_out: Vec<String>,
    vm_err: Vec<String>,
}

impl TestResult {
    pub fn new(job: Arc<Job>, status: Status) -> Self {
        Self {
            job,
            status,
            states: BTreeMap::new(),
            env: None,
            messages: Vec::new(),
            vm_out: Vec::new(),
            vm_err: Vec::new(),
        }
    }

    /// Failure result carrying diagnostic lines as messages.
    pub fn failure<I, S>(job: Arc<Job>, status: Status, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut result = Self::new(job, status);
        result.add_messages(lines);
        result
    }

    /// Count `count` more observations of `state`.
    pub fn add_state(&mut self, state: impl Into<String>, count: u64) {
        *self.states.entry(state.into()).or_default() += count;
    }

    pub fn add_message(&mut self, msg: impl Into<String>) {
        push_line(&mut self.messages, msg.into());
    }

    pub fn add_messages<I, S>(&mut self, msgs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for m in msgs {
            self.add_message(m);
        }
    }

    pub fn add_vm_outs<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for l in lines {
            push_line(&mut self.vm_out, l.into());
        }
    }

    pub fn add_vm_errs<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for l in lines {
            push_line(&mut self.vm_err, l.into());
        }
    }

    pub fn set_env(&mut self, env: Environment) {
        self.env = Some(env);
    }

    pub fn name(&self) -> &str {
        &self.job.name
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn env(&self) -> Option<&Environment> {
        self.env.as_ref()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn vm_out(&self) -> &[String] {
        &self.vm_out
    }

    pub fn vm_err(&self) -> &[String] {
        &self.vm_err
    }

    /// Total observations across all states.
    pub fn total_count(&self) -> u64 {
        self.states.values().sum()
    }

    pub fn count(&self, state: &str) -> u64 {
        self.states.get(state).copied().unwrap_or(0)
    }

    pub fn state_keys(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn has_samples(&self) -> bool {
        !self.states.is_empty()
    }
}

// Blank lines carry nothing for a report.
fn push_line(into: &mut Vec<String>, line: String) {
    if line.trim().is_empty() {
        return;
    }
    into.push(line);
}
