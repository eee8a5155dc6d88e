use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid job '{name}': {reason}")]
    InvalidJob { name: String, reason: String },

    #[error("Workload for harness '{0}' is already registered")]
    DuplicateHarness(String),

    #[error("No workload registered for harness: {0}")]
    UnknownHarness(String),

    #[error("Workload failed: {0}")]
    Workload(String),
}
