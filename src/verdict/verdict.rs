/// Verdict classification and reporting
///
/// Classification is a pure function over the evidence the supervisor
/// collected; reporting maps the verdict to the output line and exit status.
use crate::config::types::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Limits a run is judged against
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSnapshot {
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
}

impl From<&SandboxConfig> for LimitSnapshot {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            time_limit_ms: config.time_limit_ms,
            memory_limit_kb: config.memory_limit_kb,
        }
    }
}

/// Verdict classifier - pure function over evidence
pub struct VerdictClassifier;

impl VerdictClassifier {
    /// Priority order: infrastructure failure first, then time, then memory,
    /// then how the program ended. A fired deadline always means TLE, even if
    /// the reaped status raced with the kill.
    pub fn classify(evidence: &RunEvidence, limits: &LimitSnapshot) -> Verdict {
        if let Termination::Exited { code } = evidence.termination {
            if code == CHILD_SETUP_FAILED {
                return Verdict::Fatal;
            }
        }

        if evidence.usage.time_ms > limits.time_limit_ms || evidence.deadline_fired {
            return Verdict::TimeLimitExceeded;
        }

        if evidence.usage.memory_kb > limits.memory_limit_kb {
            return Verdict::MemoryLimitExceeded;
        }

        match evidence.termination {
            Termination::Exited { code: 0 } => Verdict::Success,
            Termination::Exited { .. } => Verdict::RuntimeError,
            Termination::Signaled { .. } | Termination::Stopped { .. } => Verdict::Killed,
        }
    }
}

impl Verdict {
    /// Process exit status for the calling pipeline
    pub fn exit_status(self) -> i32 {
        match self {
            Self::Success => exit_code::SUCCESS,
            Self::Fatal => exit_code::FATAL,
            Self::TimeLimitExceeded => exit_code::TIME_LIMIT,
            Self::MemoryLimitExceeded => exit_code::MEMORY_LIMIT,
            Self::RuntimeError | Self::Killed => exit_code::RUNTIME_ERROR,
        }
    }
}

/// Complete outcome of one run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub verdict: Verdict,
    /// Absent when no child was started
    pub evidence: Option<RunEvidence>,
    pub limits: LimitSnapshot,
}

impl RunReport {
    pub fn from_evidence(evidence: RunEvidence, limits: LimitSnapshot) -> Self {
        Self {
            verdict: VerdictClassifier::classify(&evidence, &limits),
            evidence: Some(evidence),
            limits,
        }
    }

    /// Report for a run that failed before the child could be judged
    pub fn fatal(limits: LimitSnapshot) -> Self {
        Self {
            verdict: Verdict::Fatal,
            evidence: None,
            limits,
        }
    }

    pub fn exit_status(&self) -> i32 {
        self.verdict.exit_status()
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &std::path::Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SandboxError::Io(std::io::Error::other(e)))?;
        std::fs::write(path, json + "\n")?;
        Ok(())
    }
}

/// The single stdout line for this run
impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.verdict, self.evidence) {
            (
                Verdict::Success | Verdict::RuntimeError,
                Some(RunEvidence {
                    termination: Termination::Exited { code },
                    usage,
                    ..
                }),
            ) => write!(f, "{} {} {}", code, usage.time_ms, usage.memory_kb),
            (Verdict::TimeLimitExceeded, _) => f.write_str("Time Limit Exceeded"),
            (Verdict::MemoryLimitExceeded, _) => f.write_str("Memory Limit Exceeded"),
            (Verdict::Killed, _) => f.write_str("Program Killed"),
            _ => f.write_str("fatal"),
        }
    }
}
