//! One forked worker process and everything the scheduler tracks about it.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;

use tempfile::TempPath;
use tracing::{debug, info, warn};

use forkstress_core::{Job, ResultSink, Status, TestResult};
use forkstress_link::LinkEndpoint;

use crate::directives::DirectiveSet;
use crate::error::ExecError;
use crate::launch::LaunchSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Started,
    /// Terminal; `true` when the worker's own result reached the sink.
    Completed(bool),
}

/// Single-assignment slot for the result a worker publishes.
#[derive(Debug, Default)]
enum ResultSlot {
    #[default]
    Pending,
    Delivered(Box<TestResult>),
    /// Taken at completion; nothing more may arrive.
    Consumed,
}

impl ResultSlot {
    fn deliver(&mut self, result: TestResult) -> bool {
        match self {
            ResultSlot::Pending => {
                *self = ResultSlot::Delivered(Box::new(result));
                true
            }
            _ => false,
        }
    }

    fn take(&mut self) -> Option<TestResult> {
        match std::mem::replace(self, ResultSlot::Consumed) {
            ResultSlot::Delivered(result) => Some(*result),
            ResultSlot::Pending | ResultSlot::Consumed => None,
        }
    }
}

pub struct WorkerProcess {
    token: String,
    job: Arc<Job>,
    cpus: Vec<usize>,
    command: Vec<String>,
    stdout: TempPath,
    stderr: TempPath,
    _directives: Option<TempPath>,
    child: Option<Child>,
    launch_fault: Option<io::Error>,
    job_taken: bool,
    slot: ResultSlot,
    captured: (Vec<String>, Vec<String>),
    state: WorkerState,
}

impl WorkerProcess {
    /// Allocate scratch files and build the command line. Nothing runs yet.
    pub fn new(
        token: impl Into<String>,
        job: Arc<Job>,
        cpus: Vec<usize>,
        endpoint: &LinkEndpoint,
        launch: &LaunchSettings,
    ) -> Result<Self, ExecError> {
        let token = token.into();
        let stdout = scratch_file(&token, ".stdout")?;
        let stderr = scratch_file(&token, ".stderr")?;

        let directives = match &launch.directives {
            Some(config) => {
                let path = scratch_file(&token, ".directives")?;
                DirectiveSet::for_job(&job, config).write_to(&path)?;
                Some(path)
            }
            None => None,
        };

        let command = launch.command_line(&job, &cpus, directives.as_deref(), endpoint, &token);

        Ok(Self {
            token,
            job,
            cpus,
            command,
            stdout,
            stderr,
            _directives: directives,
            child: None,
            launch_fault: None,
            job_taken: false,
            slot: ResultSlot::Pending,
            captured: (Vec::new(), Vec::new()),
            state: WorkerState::Created,
        })
    }

    /// Spawn the process. A spawn failure is kept and reported by the next
    /// [`check_completed`](Self::check_completed).
    pub fn start(&mut self) {
        if self.state != WorkerState::Created {
            return;
        }
        self.state = WorkerState::Started;
        match self.spawn() {
            Ok(child) => {
                info!(token = %self.token, job = %self.job.name, cpus = ?self.cpus, pid = child.id(), "worker started");
                self.child = Some(child);
            }
            Err(e) => {
                warn!(token = %self.token, job = %self.job.name, error = %e, "worker failed to launch");
                self.launch_fault = Some(e);
            }
        }
    }

    fn spawn(&self) -> io::Result<Child> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(File::create(&self.stdout)?)
            .stderr(File::create(&self.stderr)?)
            .spawn()
    }

    /// The job, on the first call only.
    pub fn job_request(&mut self) -> Option<Arc<Job>> {
        if self.job_taken {
            return None;
        }
        self.job_taken = true;
        Some(Arc::clone(&self.job))
    }

    /// Store the worker's result. Only one is accepted.
    pub fn record_result(&mut self, result: TestResult) -> Result<(), ExecError> {
        if self.slot.deliver(result) {
            Ok(())
        } else {
            Err(ExecError::violation(&self.token, "result published twice"))
        }
    }

    /// Non-blocking completion check.
    ///
    /// Returns `Ok(true)` once the worker is finished and a result for it has
    /// gone to `sink`, `Ok(false)` while it still runs. A clean exit without
    /// a published result is reported as [`ExecError::ProtocolViolation`];
    /// the worker is finished in that case too but nothing was sent, see
    /// [`violation_result`](Self::violation_result).
    pub fn check_completed(&mut self, sink: &dyn ResultSink) -> Result<bool, ExecError> {
        match self.state {
            WorkerState::Completed(_) => return Ok(true),
            WorkerState::Created => return Ok(false),
            WorkerState::Started => {}
        }

        if let Some(fault) = self.launch_fault.take() {
            sink.add(TestResult::failure(
                Arc::clone(&self.job),
                Status::VmError,
                [format!("Failed to launch worker: {fault}")],
            ));
            self.finish(false);
            return Ok(true);
        }

        let Some(child) = self.child.as_mut() else {
            return Ok(false);
        };
        let status = match child.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => return Ok(false),
            Err(e) => {
                sink.add(TestResult::failure(
                    Arc::clone(&self.job),
                    Status::VmError,
                    [format!("Failed to collect worker exit status: {e}")],
                ));
                self.finish(false);
                return Ok(true);
            }
        };

        let out = read_lines(&self.stdout, "stdout");
        let err = read_lines(&self.stderr, "stderr");
        debug!(token = %self.token, status = %status, "worker exited");

        if status.success() {
            match self.slot.take() {
                Some(mut result) => {
                    result.add_vm_outs(out);
                    result.add_vm_errs(err);
                    sink.add(result);
                    self.finish(true);
                    Ok(true)
                }
                None => {
                    self.captured = (out, err);
                    self.finish(false);
                    Err(ExecError::violation(
                        &self.token,
                        "worker exited cleanly without publishing a result",
                    ))
                }
            }
        } else {
            // A partial result from a crashing worker is not trusted.
            self.slot.take();
            let mut result = TestResult::failure(
                Arc::clone(&self.job),
                Status::VmError,
                [exit_description(status)],
            );
            result.add_messages(out);
            result.add_messages(err);
            sink.add(result);
            self.finish(false);
            Ok(true)
        }
    }

    /// Failure result standing in for a worker that broke the protocol,
    /// carrying whatever output it left behind.
    pub fn violation_result(&mut self, violation: &ExecError) -> TestResult {
        let (out, err) = std::mem::take(&mut self.captured);
        let mut result =
            TestResult::failure(Arc::clone(&self.job), Status::VmError, [violation.to_string()]);
        result.add_vm_outs(out);
        result.add_vm_errs(err);
        result
    }

    fn finish(&mut self, passed: bool) {
        self.child = None;
        for path in [&self.stdout, &self.stderr] {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(path = %path.display(), error = %e, "could not remove scratch file");
                }
            }
        }
        self.state = WorkerState::Completed(passed);
    }

    /// Forcibly terminate the process. Completion is still observed through
    /// [`check_completed`](Self::check_completed).
    pub fn kill(&mut self) -> io::Result<()> {
        match self.child.as_mut() {
            Some(child) => child.kill(),
            None => Ok(()),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub fn cpus(&self) -> &[usize] {
        &self.cpus
    }

    pub fn command_line(&self) -> &[String] {
        &self.command
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                warn!(token = %self.token, "dropping live worker, killing it");
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

fn scratch_file(token: &str, suffix: &str) -> io::Result<TempPath> {
    let file = tempfile::Builder::new()
        .prefix(&format!("forkstress-{token}-"))
        .suffix(suffix)
        .tempfile()?;
    Ok(file.into_temp_path())
}

fn read_lines(path: &Path, stream: &str) -> Vec<String> {
    match fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).lines().map(str::to_string).collect(),
        Err(e) => vec![format!("Failed to read {stream}: {e}")],
    }
}

fn exit_description(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("Worker exited with code {code}"),
        None => format!("Worker terminated abnormally ({status})"),
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use forkstress_core::{CollectingSink, DispatchMode, ExecMode};

    use super::*;

    fn job() -> Arc<Job> {
        Arc::new(Job::uniform("t.Shell", "h", &["a"], ExecMode::Tier1, DispatchMode::Forked))
    }

    fn shell(script: &str) -> LaunchSettings {
        LaunchSettings {
            invoke: vec!["sh".into(), "-c".into(), script.into()],
            args: Vec::new(),
            entry_point: "run".into(),
            affinity: false,
            directives: None,
        }
    }

    fn worker(script: &str) -> WorkerProcess {
        WorkerProcess::new(
            "fork-token-1",
            job(),
            vec![0],
            &LinkEndpoint::new("127.0.0.1", 1),
            &shell(script),
        )
        .unwrap()
    }

    fn wait_done(worker: &mut WorkerProcess, sink: &CollectingSink) -> Result<bool, ExecError> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match worker.check_completed(sink) {
                Ok(false) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                other => return other,
            }
        }
    }

    #[test]
    fn job_is_handed_out_once() {
        let mut w = worker("true");
        assert!(w.job_request().is_some());
        assert!(w.job_request().is_none());
    }

    #[test]
    fn second_result_is_a_violation() {
        let mut w = worker("true");
        w.record_result(TestResult::new(job(), Status::Normal)).unwrap();
        let err = w.record_result(TestResult::new(job(), Status::Normal)).unwrap_err();
        assert!(matches!(err, ExecError::ProtocolViolation { .. }));
    }

    #[test]
    fn positional_link_arguments_reach_the_process() {
        let mut w = worker("echo \"$0 $1 $2 $3\"");
        w.record_result(TestResult::new(job(), Status::Normal)).unwrap();
        w.start();
        let sink = CollectingSink::new();
        assert!(wait_done(&mut w, &sink).unwrap());

        let results = sink.drain();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status(), Status::Normal);
        assert_eq!(results[0].vm_out(), ["run 127.0.0.1 1 fork-token-1"]);
        assert_eq!(w.state(), WorkerState::Completed(true));
    }

    #[test]
    fn nonzero_exit_discards_partial_result() {
        let mut w = worker("echo boom >&2; exit 3");
        w.record_result(TestResult::new(job(), Status::Normal)).unwrap();
        w.start();
        let sink = CollectingSink::new();
        assert!(wait_done(&mut w, &sink).unwrap());

        let results = sink.drain();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status(), Status::VmError);
        assert_eq!(results[0].messages(), ["Worker exited with code 3", "boom"]);
        assert!(results[0].vm_err().is_empty());
    }

    #[test]
    fn invalid_utf8_output_keeps_the_readable_lines() {
        let mut w = worker(r"printf 'line one\n\377\nline three\n' >&2; exit 2");
        w.start();
        let sink = CollectingSink::new();
        assert!(wait_done(&mut w, &sink).unwrap());

        let results = sink.drain();
        let messages = results[0].messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], "Worker exited with code 2");
        assert_eq!(messages[1], "line one");
        assert_eq!(messages[2], "\u{FFFD}");
        assert_eq!(messages[3], "line three");
    }

    #[test]
    fn clean_exit_without_result_is_a_violation() {
        let mut w = worker("echo quiet");
        w.start();
        let sink = CollectingSink::new();
        let err = wait_done(&mut w, &sink).unwrap_err();
        assert!(matches!(err, ExecError::ProtocolViolation { .. }));
        assert!(sink.is_empty());

        let stand_in = w.violation_result(&err);
        assert_eq!(stand_in.status(), Status::VmError);
        assert_eq!(stand_in.vm_out(), ["quiet"]);
        assert!(w.check_completed(&sink).unwrap());
    }

    #[test]
    fn killed_worker_yields_one_failure() {
        let mut w = worker("sleep 30");
        w.start();
        let sink = CollectingSink::new();
        assert!(!w.check_completed(&sink).unwrap());

        w.kill().unwrap();
        assert!(wait_done(&mut w, &sink).unwrap());
        assert!(w.check_completed(&sink).unwrap());

        let results = sink.drain();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status(), Status::VmError);
    }

    #[test]
    fn launch_failure_surfaces_on_next_check() {
        let launch = LaunchSettings {
            invoke: vec!["/nonexistent/forkstress-runtime".into()],
            ..shell("")
        };
        let mut w = WorkerProcess::new("fork-token-2", job(), vec![0], &LinkEndpoint::new("127.0.0.1", 1), &launch)
            .unwrap();
        w.start();
        let sink = CollectingSink::new();
        assert!(w.check_completed(&sink).unwrap());
        let results = sink.drain();
        assert_eq!(results.len(), 1);
        assert!(results[0].messages()[0].starts_with("Failed to launch worker"));
    }

    #[test]
    fn scratch_files_are_removed() {
        let mut w = worker("echo hi");
        let out = w.stdout.to_path_buf();
        w.record_result(TestResult::new(job(), Status::Normal)).unwrap();
        w.start();
        let sink = CollectingSink::new();
        wait_done(&mut w, &sink).unwrap();
        assert!(!out.exists());
    }

    #[test]
    fn directive_file_is_written_and_passed() {
        let launch = LaunchSettings {
            directives: Some(forkstress_core::DirectivesConfig {
                enabled: true,
                flag: "--directives=".into(),
                ..Default::default()
            }),
            ..shell("true")
        };
        let w = WorkerProcess::new("fork-token-3", job(), vec![0], &LinkEndpoint::new("127.0.0.1", 1), &launch)
            .unwrap();
        let flag = w
            .command_line()
            .iter()
            .find_map(|a| a.strip_prefix("--directives="))
            .expect("directive flag");
        let text = std::fs::read_to_string(flag).unwrap();
        assert!(text.contains("t.Shell::a"));
    }
}
