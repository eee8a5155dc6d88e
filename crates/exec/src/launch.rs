//! Command lines for forked workers.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use tracing::debug;

use forkstress_core::{AffinityMode, DirectivesConfig, Job, RuntimeConfig};
use forkstress_link::LinkEndpoint;

/// Runtime launch settings with the host-dependent parts resolved.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub invoke: Vec<String>,
    pub args: Vec<String>,
    pub entry_point: String,
    /// Prefix commands with `taskset -c <ids>`.
    pub affinity: bool,
    /// `Some` when the runtime takes a directive file.
    pub directives: Option<DirectivesConfig>,
}

impl LaunchSettings {
    pub fn resolve(runtime: &RuntimeConfig) -> Self {
        let affinity = match runtime.affinity {
            AffinityMode::Auto => taskset_available(),
            AffinityMode::Always => true,
            AffinityMode::Never => false,
        };
        Self {
            invoke: runtime.resolved_invoke(),
            args: runtime.args.clone(),
            entry_point: runtime.entry_point.clone(),
            affinity,
            directives: runtime
                .directives
                .enabled
                .then(|| runtime.directives.clone()),
        }
    }

    /// Full argv for one worker.
    pub fn command_line(
        &self,
        job: &Job,
        cpus: &[usize],
        directive_file: Option<&Path>,
        endpoint: &LinkEndpoint,
        token: &str,
    ) -> Vec<String> {
        let mut argv = Vec::new();
        if self.affinity && !cpus.is_empty() {
            let ids: Vec<String> = cpus.iter().map(|c| c.to_string()).collect();
            argv.push("taskset".to_string());
            argv.push("-c".to_string());
            argv.push(ids.join(","));
        }
        argv.extend(self.invoke.iter().cloned());
        argv.extend(self.args.iter().cloned());
        argv.extend(job.launch_args.iter().cloned());
        if let (Some(config), Some(path)) = (&self.directives, directive_file) {
            argv.push(format!("{}{}", config.flag, path.display()));
        }
        argv.push(self.entry_point.clone());
        argv.push(endpoint.host.clone());
        argv.push(endpoint.port.to_string());
        argv.push(token.to_string());
        argv
    }
}

/// Whether `taskset` can pin a process on this host. Probed once.
pub fn taskset_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        let ok = Command::new("taskset")
            .args(["-c", "0", "true"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        debug!(available = ok, "checked for taskset");
        ok
    })
}
