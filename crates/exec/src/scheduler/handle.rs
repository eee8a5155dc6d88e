use std::sync::mpsc::Sender;

use crate::scheduler::events::SchedulerEvent;

/// Cloneable handle for steering a scheduler from other threads while
/// [`run_all`](crate::Scheduler::run_all) is blocked on it.
#[derive(Clone)]
pub struct SchedulerHandle {
    events: Sender<SchedulerEvent>,
}

impl SchedulerHandle {
    pub(crate) fn new(events: Sender<SchedulerEvent>) -> Self {
        Self { events }
    }

    /// Ask the scheduler to kill the forked worker holding `token`.
    ///
    /// The worker is harvested like any crashed one and reports a `VmError`.
    /// Tokens that are unknown or already harvested are ignored. Returns
    /// `false` once the scheduler has been dropped.
    pub fn kill_worker(&self, token: &str) -> bool {
        self.events
            .send(SchedulerEvent::KillWorker {
                token: token.to_string(),
            })
            .is_ok()
    }
}
