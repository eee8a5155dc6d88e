use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How one role's workload method is allowed to execute in the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// Workload method stays in the interpreter.
    Interpreted,
    /// Workload method is compiled by the tier-1 compiler only.
    Tier1,
    /// Workload method is compiled by the tier-2 compiler only.
    Tier2,
}

impl ExecMode {
    pub fn is_interpreted(self) -> bool {
        self == ExecMode::Interpreted
    }

    pub fn is_compiled(self) -> bool {
        !self.is_interpreted()
    }
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecMode::Interpreted => write!(f, "interpreted"),
            ExecMode::Tier1 => write!(f, "tier1"),
            ExecMode::Tier2 => write!(f, "tier2"),
        }
    }
}

/// Where a job executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// In the scheduler's own process.
    Embedded,
    /// In a freshly spawned worker process.
    Forked,
}

/// One schedulable stress-test unit. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Name of the test, also the owner of the per-role workload methods.
    pub name: String,
    /// Number of threads (and therefore CPU slots) the job needs.
    pub threads: usize,
    /// Role name per thread, `roles.len() == threads`.
    pub roles: Vec<String>,
    /// Execution mode per thread, `modes.len() == threads`.
    pub modes: Vec<ExecMode>,
    pub dispatch: DispatchMode,
    /// Extra runtime arguments appended to the configured runtime arguments.
    #[serde(default)]
    pub launch_args: Vec<String>,
    /// Identifier of the generated harness that drives the roles.
    pub harness: String,
}

impl Job {
    /// Build a job where every role runs in the same mode.
    pub fn uniform(
        name: impl Into<String>,
        harness: impl Into<String>,
        roles: &[&str],
        mode: ExecMode,
        dispatch: DispatchMode,
    ) -> Self {
        Self {
            name: name.into(),
            threads: roles.len(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            modes: vec![mode; roles.len()],
            dispatch,
            launch_args: Vec::new(),
            harness: harness.into(),
        }
    }

    pub fn with_modes(mut self, modes: Vec<ExecMode>) -> Self {
        self.modes = modes;
        self
    }

    pub fn with_launch_args(mut self, args: Vec<String>) -> Self {
        self.launch_args = args;
        self
    }

    /// Role name and mode for thread `idx`.
    pub fn role(&self, idx: usize) -> (&str, ExecMode) {
        (&self.roles[idx], self.modes[idx])
    }

    /// Check the per-thread vectors agree with the thread count.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |reason: String| CoreError::InvalidJob {
            name: self.name.clone(),
            reason,
        };
        if self.threads == 0 {
            return Err(invalid("job needs at least one thread".into()));
        }
        if self.roles.len() != self.threads {
            return Err(invalid(format!(
                "{} role names for {} threads",
                self.roles.len(),
                self.threads
            )));
        }
        if self.modes.len() != self.threads {
            return Err(invalid(format!(
                "{} execution modes for {} threads",
                self.modes.len(),
                self.threads
            )));
        }
        if self.harness.is_empty() {
            return Err(invalid("harness identifier is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_job_is_valid() {
        let job = Job::uniform("t.Racy", "t.Racy_Harness", &["actor1", "actor2"], ExecMode::Tier2, DispatchMode::Forked);
        assert_eq!(job.threads, 2);
        assert_eq!(job.role(1), ("actor2", ExecMode::Tier2));
        assert!(job.validate().is_ok());
    }

    #[test]
    fn mismatched_modes_are_rejected() {
        let job = Job::uniform("t.Racy", "h", &["a", "b"], ExecMode::Tier1, DispatchMode::Embedded)
            .with_modes(vec![ExecMode::Interpreted]);
        let err = job.validate().unwrap_err();
        assert!(err.to_string().contains("1 execution modes for 2 threads"));
    }

    #[test]
    fn zero_threads_rejected() {
        let job = Job::uniform("t.Empty", "h", &[], ExecMode::Tier1, DispatchMode::Embedded);
        assert!(matches!(job.validate(), Err(CoreError::InvalidJob { .. })));
    }

    #[test]
    fn exec_mode_serializes_snake_case() {
        let text = toml::to_string(&Job::uniform("n", "h", &["a"], ExecMode::Tier1, DispatchMode::Forked)).unwrap();
        assert!(text.contains("modes = [\"tier1\"]"));
        assert!(text.contains("dispatch = \"forked\""));
    }
}
