use std::sync::mpsc::Sender;

use async_trait::async_trait;
use tokio::sync::oneshot;

use forkstress_core::{Job, TestResult};
use forkstress_link::{LinkError, LinkHandler};

/// Everything that reaches the scheduler thread from elsewhere.
///
/// Link requests carry a one-shot reply, so per-worker state is only ever
/// touched by the scheduler thread.
pub(crate) enum SchedulerEvent {
    PullJob {
        token: String,
        reply: oneshot::Sender<Result<Option<Job>, LinkError>>,
    },
    PushResult {
        token: String,
        result: Box<TestResult>,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    EmbeddedDone {
        cpus: Vec<usize>,
    },
    KillWorker {
        token: String,
    },
}

/// Link handler that forwards every request to the scheduler and waits for
/// its answer.
pub(crate) struct EventForwarder {
    events: Sender<SchedulerEvent>,
}

impl EventForwarder {
    pub(crate) fn new(events: Sender<SchedulerEvent>) -> Self {
        Self { events }
    }

    fn send(&self, event: SchedulerEvent) -> Result<(), LinkError> {
        self.events
            .send(event)
            .map_err(|_| LinkError::Transport("scheduler is no longer running".into()))
    }
}

fn dropped_reply() -> LinkError {
    LinkError::Transport("scheduler dropped the request".into())
}

#[async_trait]
impl LinkHandler for EventForwarder {
    async fn pull_job(&self, token: &str) -> Result<Option<Job>, LinkError> {
        let (reply, answer) = oneshot::channel();
        self.send(SchedulerEvent::PullJob {
            token: token.to_string(),
            reply,
        })?;
        answer.await.map_err(|_| dropped_reply())?
    }

    async fn push_result(&self, token: &str, result: TestResult) -> Result<(), LinkError> {
        let (reply, answer) = oneshot::channel();
        self.send(SchedulerEvent::PushResult {
            token: token.to_string(),
            result: Box::new(result),
            reply,
        })?;
        answer.await.map_err(|_| dropped_reply())?
    }
}
