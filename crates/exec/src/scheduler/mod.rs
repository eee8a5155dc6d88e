//! Job scheduler: CPU budgeting, dispatch and worker harvesting.
//!
//! Split into focused submodules:
//! - `events`: inbound link and embedded-completion events
//! - `handle`: cross-thread control of a running scheduler
//! - `runner`: the scheduler itself
//! - `summary`: per-run counters

mod events;
mod handle;
mod runner;
mod summary;

pub(crate) use self::events::SchedulerEvent;
pub use self::handle::SchedulerHandle;
pub use self::runner::{Scheduler, SchedulerState};
pub use self::summary::RunSummary;
