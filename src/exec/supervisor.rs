use crate::config::types::{
    Result, RunEvidence, SandboxConfig, SandboxError, SandboxIdentity, Termination,
};
use crate::exec::preexec::{confine_and_exec, LaunchPlan};
use crate::kernel::accounting::{page_size_kb, usage_from_rusage, wait_with_usage};
use crate::kernel::rlimit::ResourceLimits;
use crate::kernel::signal::{DeadlineGuard, SupervisorState};
use crate::safety::staging::StagingArea;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{fork, setpgid, ForkResult, Pid};
use std::time::Duration;

/// Slack on top of the time limit before the wall-clock deadline kills the group
pub const DEADLINE_GRACE: Duration = Duration::from_millis(1000);

fn to_process_error(prefix: &str, err: impl std::fmt::Display) -> SandboxError {
    SandboxError::Process(format!("{prefix}: {err}"))
}

/// Wall-clock deadline for a run
pub fn deadline_for(config: &SandboxConfig) -> Duration {
    config.time_limit() + DEADLINE_GRACE
}

/// Build the child's launch plan from the prepared staging area.
pub fn launch_plan(
    config: &SandboxConfig,
    area: &StagingArea,
    identity: SandboxIdentity,
) -> LaunchPlan {
    LaunchPlan {
        jail_root: area.root().to_path_buf(),
        executable_name: area.executable_name().to_string(),
        redirect_input: area.has_input(),
        redirect_output: config.output.is_some(),
        limits: ResourceLimits::from_config(config),
        identity,
    }
}

/// Fork, confine the child, and supervise it until it is gone.
///
/// `state` is the instance the signal handlers act on; pass
/// [`SupervisorState::global`].
pub fn supervise(
    plan: &LaunchPlan,
    deadline: Duration,
    state: &'static SupervisorState,
) -> Result<RunEvidence> {
    debug_assert!(std::ptr::eq(state, SupervisorState::global()));

    // SAFETY: the process is single-threaded here; the child only runs the
    // pre-exec chain and then execs or _exits.
    let child = match unsafe { fork() }.map_err(|e| to_process_error("fork", e))? {
        ForkResult::Child => confine_and_exec(plan),
        ForkResult::Parent { child } => child,
    };

    // Also set the group from this side so it exists before the deadline can
    // fire. The child may already have exec'd (EACCES) or exited (ESRCH).
    match setpgid(child, child) {
        Ok(()) | Err(Errno::EACCES) | Err(Errno::ESRCH) => {}
        Err(e) => log::warn!("setpgid({}) from supervisor failed: {}", child, e),
    }

    state.track(child.as_raw());
    // An interrupt that landed between setup and tracking had nothing to kill.
    if state.interrupted() {
        kill_group(child);
    }
    log::info!("Supervising child {} with deadline {} ms", child, deadline.as_millis());

    let waited = arm_and_wait(child, deadline);
    state.untrack();
    // Descendants outlive a leader that exits on its own; none may survive the run.
    sweep_group(child);
    let (termination, rusage) = waited?;

    if let Termination::Stopped { signal } = termination {
        log::warn!("Child {} stopped by signal {}; its group was killed", child, signal);
        reap_stopped(child);
    }

    let usage = usage_from_rusage(&rusage, page_size_kb());
    let evidence = RunEvidence {
        termination,
        usage,
        deadline_fired: state.timed_out(),
    };
    log::info!("Child {} finished: {:?}", child, evidence);

    if state.interrupted() {
        return Err(SandboxError::Interrupted);
    }
    Ok(evidence)
}

fn arm_and_wait(child: Pid, deadline: Duration) -> Result<(Termination, libc::rusage)> {
    let guard = match DeadlineGuard::arm(deadline) {
        Ok(guard) => guard,
        Err(e) => {
            kill_group(child);
            let _ = wait_with_usage(child);
            return Err(e);
        }
    };

    let waited = wait_with_usage(child);
    // Disarm before anything else can observe the flags.
    drop(guard);

    if waited.is_err() {
        kill_group(child);
    }
    waited
}

fn kill_group(child: Pid) {
    if killpg(child, Signal::SIGKILL).is_err() {
        let _ = nix::sys::signal::kill(child, Signal::SIGKILL);
    }
}

/// SIGKILL whatever is left in the child's process group. An empty group
/// (ESRCH) is the normal case.
pub fn sweep_group(child: Pid) {
    match killpg(child, Signal::SIGKILL) {
        Ok(()) => log::debug!("Killed leftover processes in group {}", child),
        Err(Errno::ESRCH) => {}
        Err(e) => log::warn!("killpg({}) after run failed: {}", child, e),
    }
}

/// A stopped child would linger forever; make sure it is dead and collect it.
fn reap_stopped(child: Pid) {
    kill_group(child);
    if let Err(e) = nix::sys::wait::waitpid(child, None) {
        log::warn!("Reaping stopped child {} failed: {}", child, e);
    }
}
