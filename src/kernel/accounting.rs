//! Waiting for the child and turning its rusage into a `ResourceUsage` sample.

use crate::config::types::{ResourceUsage, Result, SandboxError, Termination};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

/// Block until `pid` exits, is killed or stops, and collect its rusage.
/// EINTR from a handled signal is retried.
pub fn wait_with_usage(pid: Pid) -> Result<(Termination, libc::rusage)> {
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: rusage is plain old data and fully written by a successful wait4.
        let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::wait4(pid.as_raw(), &mut status, libc::WUNTRACED, &mut rusage) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(SandboxError::Process(format!("wait4({}) failed: {}", pid, err)));
        }

        let termination = match WaitStatus::from_raw(pid, status) {
            Ok(WaitStatus::Exited(_, code)) => Termination::Exited { code },
            Ok(WaitStatus::Signaled(_, sig, _)) => Termination::Signaled { signal: sig as i32 },
            Ok(WaitStatus::Stopped(_, sig)) => Termination::Stopped { signal: sig as i32 },
            Ok(other) => {
                log::debug!("Ignoring wait status {:?}", other);
                continue;
            }
            Err(e) => {
                return Err(SandboxError::Process(format!(
                    "undecodable wait status {:#x}: {}",
                    status, e
                )))
            }
        };
        return Ok((termination, rusage));
    }
}

/// Page size in KiB, used to turn minor faults into a memory estimate
pub fn page_size_kb() -> u64 {
    use nix::unistd::{sysconf, SysconfVar};

    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(bytes)) if bytes > 0 => (bytes as u64) >> 10,
        _ => 4,
    }
}

fn timeval_ms(tv: &libc::timeval) -> u64 {
    (tv.tv_sec as u64) * 1000 + (tv.tv_usec as u64) / 1000
}

/// Convert raw rusage into the sample the classifier reads.
pub fn usage_from_rusage(rusage: &libc::rusage, page_kb: u64) -> ResourceUsage {
    ResourceUsage {
        time_ms: timeval_ms(&rusage.ru_utime) + timeval_ms(&rusage.ru_stime),
        memory_kb: (rusage.ru_minflt.max(0) as u64) * page_kb,
        // Linux reports ru_maxrss in KiB.
        peak_rss_kb: rusage.ru_maxrss.max(0) as u64,
    }
}
