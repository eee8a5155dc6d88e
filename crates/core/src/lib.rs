pub mod config;
pub mod error;
pub mod job;
pub mod result;
pub mod sink;
pub mod workload;

pub use config::{AffinityMode, DirectivesConfig, ExecutorConfig, RuntimeConfig};
pub use error::*;
pub use job::{DispatchMode, ExecMode, Job};
pub use result::{Environment, Status, TestResult};
pub use sink::{CollectingSink, ResultSink};
pub use workload::{RacyCounter, Workload, WorkloadRegistry};
