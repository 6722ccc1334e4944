//! Resource ceilings applied to the confined child before exec.
//!
//! | Limit | Value |
//! |-------|-------|
//! | `RLIMIT_AS` | memory limit + 10 MiB slack |
//! | `RLIMIT_CPU` | whole seconds of the time limit, plus one |
//! | `RLIMIT_NOFILE` | 10 |
//! | `RLIMIT_NPROC` | 20 |
//!
//! Soft and hard values are always equal so the program cannot raise them.

use crate::config::types::{Result, SandboxConfig, SandboxError};
use nix::sys::resource::{setrlimit, Resource};

/// Address-space slack so the loader and libc start-up are not what trips the limit
pub const ADDRESS_SPACE_SLACK_KB: u64 = 10240;

/// Descriptor cap: standard streams plus a few
pub const MAX_OPEN_FILES: u64 = 10;

/// Process/thread cap bounding fork bombs
pub const MAX_PROCESSES: u64 = 20;

/// Concrete ceilings derived from a config
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceLimits {
    pub address_space_bytes: u64,
    pub cpu_seconds: u64,
    pub open_files: u64,
    pub processes: u64,
}

impl ResourceLimits {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            address_space_bytes: (config.memory_limit_kb + ADDRESS_SPACE_SLACK_KB) * 1024,
            // RLIMIT_CPU is second-granular and must stay strictly above the
            // millisecond limit, or a spinner dies by SIGXCPU/SIGKILL before
            // its recorded time exceeds the limit.
            cpu_seconds: config.time_limit_ms / 1000 + 1,
            open_files: MAX_OPEN_FILES,
            processes: MAX_PROCESSES,
        }
    }

    /// Apply every ceiling to the calling process, stopping at the first failure.
    pub fn apply(&self) -> Result<()> {
        set_limit("RLIMIT_AS", Resource::RLIMIT_AS, self.address_space_bytes)?;
        set_limit("RLIMIT_CPU", Resource::RLIMIT_CPU, self.cpu_seconds)?;
        set_limit("RLIMIT_NOFILE", Resource::RLIMIT_NOFILE, self.open_files)?;
        set_limit("RLIMIT_NPROC", Resource::RLIMIT_NPROC, self.processes)?;
        Ok(())
    }
}

fn set_limit(name: &str, resource: Resource, value: u64) -> Result<()> {
    setrlimit(resource, value as libc::rlim_t, value as libc::rlim_t).map_err(|e| {
        SandboxError::Limiter(format!("Failed to apply {}={}: {}", name, value, e))
    })?;
    log::debug!("{} set to {}", name, value);
    Ok(())
}
