//! forkstress — runs a batch of jobs described in a TOML file.
//!
//! ```toml
//! [[job]]
//! name = "demo.RacyCounter"
//! harness = "builtin.racy_counter"
//! threads = 2
//! roles = ["actor1", "actor2"]
//! modes = ["tier2", "tier2"]
//! dispatch = "forked"
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};

use forkstress_core::config::load_dotenv;
use forkstress_core::{CollectingSink, ExecutorConfig, Job, ResultSink, WorkloadRegistry};
use forkstress_exec::{Scheduler, ThreadedRunner};

// ── CLI ─────────────────────────────────────────────────────────────

/// Run stress-test jobs within a CPU budget.
#[derive(Parser, Debug)]
#[command(name = "forkstress", version, about)]
struct Cli {
    /// Jobs file.
    jobs: PathBuf,

    /// Path to forkstress.toml config file.
    #[arg(long, env = "FORKSTRESS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the CPU budget.
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct JobFile {
    #[serde(default, rename = "job")]
    jobs: Vec<Job>,
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ExecutorConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ExecutorConfig::from_env()?,
    };
    if let Some(threads) = cli.threads {
        config.max_threads = threads;
    }
    config.log_summary();

    let text = std::fs::read_to_string(&cli.jobs)
        .with_context(|| format!("reading {}", cli.jobs.display()))?;
    let JobFile { jobs } = toml::from_str(&text)
        .with_context(|| format!("parsing {}", cli.jobs.display()))?;
    info!(count = jobs.len(), "loaded jobs");

    let sink = Arc::new(CollectingSink::new());
    let runner = Arc::new(ThreadedRunner::new(WorkloadRegistry::with_builtins()));
    let mut scheduler = Scheduler::new(&config, Arc::clone(&sink) as Arc<dyn ResultSink>, runner)?;
    let summary = scheduler.run_all(jobs);

    for result in sink.drain() {
        if result.status().is_failure() {
            warn!(job = %result.name(), status = ?result.status(), messages = ?result.messages(), "job failed");
        } else {
            info!(job = %result.name(), states = result.state_keys().count(), samples = result.total_count(), "job passed");
        }
    }
    info!(
        jobs = summary.jobs,
        forked = summary.forked_dispatched,
        embedded = summary.embedded_dispatched,
        failures = summary.synthesized_failures + summary.rejected,
        violations = summary.protocol_violations.len(),
        elapsed = ?summary.elapsed,
        "done"
    );

    if !summary.protocol_violations.is_empty() {
        anyhow::bail!("{} protocol violations", summary.protocol_violations.len());
    }
    Ok(())
}
