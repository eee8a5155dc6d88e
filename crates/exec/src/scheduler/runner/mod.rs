//! The scheduler.
//!
//! - `core`: Scheduler struct, constructor and accessors
//! - `execution`: dispatch, the acquisition loop and event handling

mod core;
mod execution;

pub use self::core::{Scheduler, SchedulerState};
