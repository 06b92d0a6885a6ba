use std::path::PathBuf;

use thiserror::Error;

/// The only failure kind that leaves the engine.
///
/// Individual probe failures never show up here, they are absorbed into "unmet" by the
/// evaluator. Everything below aborts the run.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to load settings from {path:?}: {cause}")]
    Settings { path: PathBuf, cause: String },

    #[error("unmet preconditions: {}", .0.join("; "))]
    UnmetPreconditions(Vec<String>),

    #[error("unsupported CPU type, only AMD and Intel CPUs are supported")]
    UnknownCpuVendor,

    #[error("unknown GPU type detected: {0}")]
    UnknownGpuVendor(String),

    #[error("unable to determine bootloader type from efibootmgr output")]
    UnknownBootloader,

    #[error("`{command}` failed: {cause}")]
    Probe { command: String, cause: String },

    #[error("`{command}` failed: {cause} (rolled back {rolled_back} applied action(s))")]
    ActionFailed { command: String, cause: String, rolled_back: usize },
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;
