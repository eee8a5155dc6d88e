use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.parse().ok())
}

// ── Top-level config ──────────────────────────────────────────

/// Executor configuration, typically parsed from `forkstress.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Total CPU budget shared by all jobs. 0 = available parallelism.
    #[serde(default)]
    pub max_threads: usize,
    /// Wait between CPU acquisition attempts, in milliseconds.
    #[serde(default = "default_spin_wait_delay_ms")]
    pub spin_wait_delay_ms: u64,
    /// Interface the link server binds on.
    #[serde(default = "default_link_host")]
    pub link_host: String,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

fn default_spin_wait_delay_ms() -> u64 { 100 }
fn default_link_host() -> String { "127.0.0.1".into() }

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_threads: 0,
            spin_wait_delay_ms: default_spin_wait_delay_ms(),
            link_host: default_link_host(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl ExecutorConfig {
    /// Parse config from a TOML string, then apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, CoreError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus env overrides (call `load_dotenv()` first).
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Resolve the thread budget (0 means use available parallelism).
    pub fn resolved_max_threads(&self) -> usize {
        if self.max_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.max_threads
        }
    }

    pub fn spin_wait_delay(&self) -> Duration {
        Duration::from_millis(self.spin_wait_delay_ms)
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `FORKSTRESS_<KEY>` overrides the matching field:
    /// - `FORKSTRESS_MAX_THREADS` -> `max_threads`
    /// - `FORKSTRESS_SPIN_WAIT_DELAY_MS` -> `spin_wait_delay_ms`
    /// - `FORKSTRESS_LINK_HOST` -> `link_host`
    /// - `FORKSTRESS_AFFINITY` -> `runtime.affinity`
    /// - `FORKSTRESS_DIRECTIVES` -> `runtime.directives.enabled`
    /// - `FORKSTRESS_PRINT_ASSEMBLY` -> `runtime.directives.print_assembly`
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parsed("FORKSTRESS_MAX_THREADS") {
            self.max_threads = v;
        }
        if let Some(v) = env_parsed("FORKSTRESS_SPIN_WAIT_DELAY_MS") {
            self.spin_wait_delay_ms = v;
        }
        if let Some(v) = env_opt("FORKSTRESS_LINK_HOST") {
            self.link_host = v;
        }
        if let Some(v) = env_opt("FORKSTRESS_AFFINITY") {
            match v.as_str() {
                "auto" => self.runtime.affinity = AffinityMode::Auto,
                "always" => self.runtime.affinity = AffinityMode::Always,
                "never" => self.runtime.affinity = AffinityMode::Never,
                other => tracing::warn!(value = other, "ignoring unknown FORKSTRESS_AFFINITY"),
            }
        }
        if let Some(v) = env_parsed("FORKSTRESS_DIRECTIVES") {
            self.runtime.directives.enabled = v;
        }
        if let Some(v) = env_parsed("FORKSTRESS_PRINT_ASSEMBLY") {
            self.runtime.directives.print_assembly = v;
        }
    }

    /// Validate value ranges and required strings.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.spin_wait_delay_ms == 0 {
            return Err(CoreError::Config(
                "spin_wait_delay_ms must be positive".into(),
            ));
        }
        if self.link_host.trim().is_empty() {
            return Err(CoreError::Config("link_host must not be empty".into()));
        }
        if self.runtime.entry_point.trim().is_empty() {
            return Err(CoreError::Config(
                "runtime.entry_point must not be empty".into(),
            ));
        }
        if self.runtime.directives.enabled && self.runtime.directives.flag.is_empty() {
            return Err(CoreError::Config(
                "runtime.directives.flag is required when directives are enabled".into(),
            ));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Executor config:");
        tracing::info!("  threads:     {}", self.resolved_max_threads());
        tracing::info!("  spin wait:   {}ms", self.spin_wait_delay_ms);
        tracing::info!("  link host:   {}", self.link_host);
        tracing::info!("  runtime:     {:?} {}", self.runtime.invoke, self.runtime.entry_point);
        tracing::info!("  affinity:    {:?}", self.runtime.affinity);
        tracing::info!("  directives:  {}", self.runtime.directives.enabled);
    }
}

// ── Runtime ───────────────────────────────────────────────────

/// Whether to prefix worker command lines with a CPU-affinity launcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffinityMode {
    /// Use `taskset` when it is available on this host.
    #[default]
    Auto,
    Always,
    Never,
}

/// How a forked worker is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Runtime invocation argv. Empty = the `stress-worker` binary next to
    /// the current executable.
    #[serde(default)]
    pub invoke: Vec<String>,
    /// Arguments passed to every worker before job-specific ones.
    #[serde(default)]
    pub args: Vec<String>,
    /// Worker entry point, placed right before the link coordinates.
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    #[serde(default)]
    pub affinity: AffinityMode,
    #[serde(default)]
    pub directives: DirectivesConfig,
}

fn default_entry_point() -> String { "run".into() }

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            invoke: Vec::new(),
            args: Vec::new(),
            entry_point: default_entry_point(),
            affinity: AffinityMode::default(),
            directives: DirectivesConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub const WORKER_BINARY: &'static str = "stress-worker";

    /// Runtime invocation argv with the default filled in.
    pub fn resolved_invoke(&self) -> Vec<String> {
        if !self.invoke.is_empty() {
            return self.invoke.clone();
        }
        let sibling = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(Self::WORKER_BINARY)))
            .unwrap_or_else(|| PathBuf::from(Self::WORKER_BINARY));
        vec![sibling.to_string_lossy().into_owned()]
    }
}

/// Execution-control directives handed to the host runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectivesConfig {
    /// Whether the host runtime understands a directive file.
    #[serde(default)]
    pub enabled: bool,
    /// Flag prefix; the file path is appended directly.
    #[serde(default = "default_directives_flag")]
    pub flag: String,
    /// Match pattern owner of the cross-thread synchronization helper.
    #[serde(default = "default_sync_helper")]
    pub sync_helper: String,
    /// Extra patterns force-inlined into the scheduling loop.
    #[serde(default = "default_extra_inline")]
    pub extra_inline: Vec<String>,
    /// Request an assembly listing for compiled roles.
    #[serde(default)]
    pub print_assembly: bool,
}

fn default_directives_flag() -> String { "-XX:CompilerDirectivesFile=".into() }
fn default_sync_helper() -> String { "forkstress.runtime.WorkerSync".into() }
fn default_extra_inline() -> Vec<String> { vec!["java.util.concurrent.atomic.*::*".into()] }

impl Default for DirectivesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            flag: default_directives_flag(),
            sync_helper: default_sync_helper(),
            extra_inline: default_extra_inline(),
            print_assembly: false,
        }
    }
}
