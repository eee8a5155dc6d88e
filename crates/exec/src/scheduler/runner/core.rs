use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::info;

use forkstress_core::{ExecutorConfig, ResultSink};
use forkstress_link::{LinkEndpoint, LinkServer};

use crate::embedded::EmbeddedRunner;
use crate::error::ExecError;
use crate::launch::LaunchSettings;
use crate::layout::CpuLayout;
use crate::scheduler::events::{EventForwarder, SchedulerEvent};
use crate::scheduler::handle::SchedulerHandle;
use crate::scheduler::summary::RunSummary;
use crate::worker::WorkerProcess;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Init,
    Dispatching,
    Draining,
    Terminated,
}

/// Single-threaded job scheduler.
///
/// Owns the CPU layout, the live forked workers keyed by token, and the link
/// server they report to. All of it is mutated only from the thread calling
/// [`run_all`](Scheduler::run_all); the link server runs on a private tokio
/// runtime and talks to that thread through an event channel.
pub struct Scheduler {
    pub(super) layout: CpuLayout,
    pub(super) spin_wait_delay: Duration,
    pub(super) launch: LaunchSettings,
    pub(super) workers: HashMap<String, WorkerProcess>,
    pub(super) next_token: u64,
    pub(super) events_tx: Sender<SchedulerEvent>,
    pub(super) events: Receiver<SchedulerEvent>,
    pub(super) sink: Arc<dyn ResultSink>,
    pub(super) embedded: Arc<dyn EmbeddedRunner>,
    pub(super) endpoint: LinkEndpoint,
    pub(super) link: Option<LinkServer>,
    pub(super) state: SchedulerState,
    pub(super) summary: RunSummary,
    // Declared last so it outlives the link server on drop.
    pub(super) runtime: Runtime,
}

impl Scheduler {
    /// Start the link server and set up an idle scheduler.
    ///
    /// Must not be called from within an async context. A link server that
    /// cannot start is the only fatal error.
    pub fn new(
        config: &ExecutorConfig,
        sink: Arc<dyn ResultSink>,
        embedded: Arc<dyn EmbeddedRunner>,
    ) -> Result<Self, ExecError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("forkstress-link")
            .enable_all()
            .build()?;

        let (events_tx, events) = mpsc::channel();
        let forwarder = Arc::new(EventForwarder::new(events_tx.clone()));
        let link = runtime
            .block_on(LinkServer::bind(&config.link_host, forwarder))
            .map_err(ExecError::LinkStartup)?;
        let endpoint = link.endpoint().clone();

        let max_threads = config.resolved_max_threads();
        info!(threads = max_threads, endpoint = %endpoint, "scheduler ready");

        Ok(Self {
            layout: CpuLayout::new(max_threads),
            spin_wait_delay: config.spin_wait_delay(),
            launch: LaunchSettings::resolve(&config.runtime),
            workers: HashMap::new(),
            next_token: 0,
            events_tx,
            events,
            sink,
            embedded,
            endpoint,
            link: Some(link),
            state: SchedulerState::Init,
            summary: RunSummary::default(),
            runtime,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Where forked workers reach the link server.
    pub fn endpoint(&self) -> &LinkEndpoint {
        &self.endpoint
    }

    pub fn capacity(&self) -> usize {
        self.layout.capacity()
    }

    pub fn available_cpus(&self) -> usize {
        self.layout.available()
    }

    /// Forked workers not yet harvested.
    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Handle for killing workers from another thread during a run.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle::new(self.events_tx.clone())
    }

    pub(super) fn next_token(&mut self) -> String {
        self.next_token += 1;
        format!("fork-token-{}", self.next_token)
    }

    pub(super) fn shutdown_link(&mut self) {
        if let Some(link) = self.link.take() {
            self.runtime.block_on(link.terminate());
        }
    }
}
