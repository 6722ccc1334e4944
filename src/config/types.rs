/// Core types for the antiskill sandbox
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Exit statuses returned to the calling pipeline.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const ERROR: i32 = 1;
    pub const FATAL: i32 = 2;
    pub const INTERRUPTED: i32 = 3;
    pub const TIME_LIMIT: i32 = 4;
    pub const MEMORY_LIMIT: i32 = 5;
    pub const RUNTIME_ERROR: i32 = 6;
}

/// Exit status the confined child uses when setup fails before exec.
/// The supervisor reads it as an infrastructure fault, never as a program verdict.
pub const CHILD_SETUP_FAILED: i32 = 3;

/// Default time limit in milliseconds
pub const DEFAULT_TIME_LIMIT_MS: u64 = 1000;

/// Default memory limit in KiB
pub const DEFAULT_MEMORY_LIMIT_KB: u64 = 131072;

/// Default unprivileged identity for the sandboxed program
pub const DEFAULT_SANDBOX_USER: &str = "nobody";

/// Name of the staged input inside the jail
pub const STAGED_INPUT_NAME: &str = ".input";

/// Name of the staged output inside the jail
pub const STAGED_OUTPUT_NAME: &str = ".output";

/// Immutable parameters of one sandboxed run
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Program to run (must be statically linked)
    pub executable: PathBuf,
    /// File fed to the program's stdin
    pub input: Option<PathBuf>,
    /// Destination for the program's stdout
    pub output: Option<PathBuf>,
    /// CPU time limit in milliseconds
    pub time_limit_ms: u64,
    /// Memory limit in KiB
    pub memory_limit_kb: u64,
    /// User the program runs as
    pub sandbox_user: String,
    /// Where to write the JSON run report
    pub report: Option<PathBuf>,
}

impl SandboxConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }

    /// File name the executable gets inside the staging area
    pub fn executable_name(&self) -> Result<String> {
        self.executable
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                SandboxError::Config(format!(
                    "executable path has no usable file name: {}",
                    self.executable.display()
                ))
            })
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::new(),
            input: None,
            output: None,
            time_limit_ms: DEFAULT_TIME_LIMIT_MS,
            memory_limit_kb: DEFAULT_MEMORY_LIMIT_KB,
            sandbox_user: DEFAULT_SANDBOX_USER.to_string(),
            report: None,
        }
    }
}

/// Unprivileged identity resolved before fork
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxIdentity {
    pub uid: u32,
    pub gid: u32,
}

/// Accounting sample taken once the child has terminated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// User + system CPU time
    pub time_ms: u64,
    /// Minor page faults times page size. Approximates the memory footprint;
    /// shared and swapped pages make it over- or under-count.
    pub memory_kb: u64,
    /// Peak resident set size as reported by the kernel
    pub peak_rss_kb: u64,
}

/// How the child left the running state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    Exited { code: i32 },
    Signaled { signal: i32 },
    Stopped { signal: i32 },
}

/// Everything the supervisor learned about one run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvidence {
    pub termination: Termination,
    pub usage: ResourceUsage,
    /// The deadline handler fired and killed the process group
    pub deadline_fired: bool,
}

/// Outcome classes; exactly one per run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "OK")]
    Success,
    #[serde(rename = "RE")]
    RuntimeError,
    #[serde(rename = "TLE")]
    TimeLimitExceeded,
    #[serde(rename = "MLE")]
    MemoryLimitExceeded,
    #[serde(rename = "KILLED")]
    Killed,
    #[serde(rename = "FATAL")]
    Fatal,
}

/// Error types for the sandbox
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Resource limit error: {0}")]
    Limiter(String),

    #[error("Confinement error: {0}")]
    Confinement(String),

    #[error("Privilege error: {0}")]
    Privilege(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Supervision interrupted")]
    Interrupted,
}

impl SandboxError {
    /// Exit status reported to the caller when this error ends the run
    pub fn exit_status(&self) -> i32 {
        match self {
            Self::Config(_) => exit_code::ERROR,
            Self::Interrupted => exit_code::INTERRUPTED,
            Self::Io(_)
            | Self::Staging(_)
            | Self::Identity(_)
            | Self::Limiter(_)
            | Self::Confinement(_)
            | Self::Privilege(_)
            | Self::Process(_) => exit_code::FATAL,
        }
    }

    /// Whether the caller should still see the `fatal` verdict line
    pub fn is_infrastructure(&self) -> bool {
        self.exit_status() == exit_code::FATAL
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
