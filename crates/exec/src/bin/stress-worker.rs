//! stress-worker — forked worker entry point.
//!
//! Launched by the scheduler as
//! `stress-worker [--directives=PATH] run <host> <port> <token>`:
//! pulls the job bound to `token`, runs it through the workload registry and
//! pushes the result back. Exits 0 once the result is acknowledged; any
//! infrastructure failure exits nonzero so the scheduler reports a VM error.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use forkstress_core::{Environment, WorkloadRegistry};
use forkstress_link::{LinkClient, LinkEndpoint};

// ── CLI ─────────────────────────────────────────────────────────────

/// Forked stress-test worker.
#[derive(Parser, Debug)]
#[command(name = "stress-worker", version, about)]
struct Cli {
    /// Compiler directive file. Native workloads have no use for it.
    #[arg(long, global = true)]
    directives: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pull one job from the link server, run it and report back.
    Run {
        host: String,
        port: u16,
        token: String,
    },
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // stdout belongs to the workload; the scheduler captures both streams.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Some(path) = &cli.directives {
        debug!(path = %path.display(), "ignoring directive file");
    }

    let Command::Run { host, port, token } = cli.command;
    let endpoint = LinkEndpoint::new(host, port);
    let client = LinkClient::connect(&endpoint).await?;

    let Some(job) = client.pull_job(&token).await? else {
        warn!(token = %token, "no job delivered");
        return Ok(());
    };
    let job = Arc::new(job);
    info!(token = %token, job = %job.name, threads = job.threads, "running job");
    println!("{token}: {} on {} threads", job.name, job.threads);

    let registry = WorkloadRegistry::with_builtins();
    let mut result = tokio::task::spawn_blocking(move || registry.execute(&job)).await?;
    result.set_env(Environment::capture());
    info!(token = %token, status = ?result.status(), samples = result.total_count(), "job finished");

    client.push_result(&token, result).await?;
    Ok(())
}
