//! Job scheduling and execution: CPU budgeting, embedded and forked
//! dispatch, and the worker process lifecycle.

pub mod directives;
pub mod embedded;
pub mod error;
pub mod launch;
pub mod layout;
pub mod scheduler;
pub mod worker;

pub use directives::{Directive, DirectiveSet, Rule, Tier};
pub use embedded::{EmbeddedCompletion, EmbeddedRunner, ThreadedRunner};
pub use error::ExecError;
pub use launch::LaunchSettings;
pub use layout::CpuLayout;
pub use scheduler::{RunSummary, Scheduler, SchedulerHandle, SchedulerState};
pub use worker::{WorkerProcess, WorkerState};
