use crate::config::types::{
    Result, SandboxError, SandboxIdentity, CHILD_SETUP_FAILED, STAGED_INPUT_NAME,
    STAGED_OUTPUT_NAME,
};
use crate::kernel::credentials::transition_to_unprivileged;
use crate::kernel::rlimit::ResourceLimits;
/// Pre-Exec Ordering Enforcement
///
/// The confinement sequence is FIXED:
/// 1. chroot into the staging area, chdir to the new root
/// 2. become leader of a new process group
/// 3. redirect the staged input onto stdin (if configured)
/// 4. create the staged output and redirect stdout onto it (if configured)
/// 5. apply resource limits
/// 6. drop to the unprivileged identity (setgroups, setresgid, setresuid)
/// 7. exec the target with no arguments beyond its own path
///
/// Each step consumes the previous state, so a step cannot be skipped or
/// reordered. Only `Sandbox<ExecReady>` can exec.
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{chdir, chroot, close, dup2, execve, setpgid, Pid};
use std::convert::Infallible;
use std::ffi::CString;
use std::marker::PhantomData;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

/// Everything the child needs, computed by the parent before fork
#[derive(Clone, Debug)]
pub struct LaunchPlan {
    /// Staging directory that becomes `/`
    pub jail_root: PathBuf,
    /// Executable file name inside the jail
    pub executable_name: String,
    pub redirect_input: bool,
    pub redirect_output: bool,
    pub limits: ResourceLimits,
    pub identity: SandboxIdentity,
}

/// Type-state marker: fresh child, nothing set up yet
pub struct FreshChild;

/// Type-state marker: filesystem view restricted to the staging area
pub struct Jailed;

/// Type-state marker: leader of its own process group
pub struct GroupLeader;

/// Type-state marker: stdin/stdout wired to staged files
pub struct StreamsWired;

/// Type-state marker: resource ceilings in force
pub struct Limited;

/// Type-state marker: running as the unprivileged identity
pub struct ExecReady;

/// Child process with type-state tracking
pub struct Sandbox<S> {
    /// Step reached, for diagnostics
    pub step: &'static str,
    _state: PhantomData<S>,
}

impl<S> Sandbox<S> {
    fn advance<T>(self, step: &'static str) -> Sandbox<T> {
        log::debug!("pre-exec step complete: {}", step);
        Sandbox {
            step,
            _state: PhantomData,
        }
    }
}

impl Sandbox<FreshChild> {
    pub fn new() -> Self {
        Self {
            step: "fork",
            _state: PhantomData,
        }
    }

    /// Step 1: restrict the filesystem view to the staging area.
    pub fn enter_jail(self, root: &Path) -> Result<Sandbox<Jailed>> {
        chroot(root).map_err(|e| {
            SandboxError::Confinement(format!("chroot({}) failed: {}", root.display(), e))
        })?;
        chdir("/").map_err(|e| SandboxError::Confinement(format!("chdir(/) failed: {}", e)))?;
        Ok(self.advance("jail"))
    }
}

impl Default for Sandbox<FreshChild> {
    fn default() -> Self {
        Self::new()
    }
}

impl Sandbox<Jailed> {
    /// Step 2: lead a new process group so the supervisor can kill all descendants.
    pub fn lead_process_group(self) -> Result<Sandbox<GroupLeader>> {
        setpgid(Pid::from_raw(0), Pid::from_raw(0))
            .map_err(|e| SandboxError::Confinement(format!("setpgid failed: {}", e)))?;
        Ok(self.advance("process_group"))
    }
}

impl Sandbox<GroupLeader> {
    /// Steps 3 and 4: staged input onto stdin, staged output from stdout.
    pub fn wire_streams(self, input: bool, output: bool) -> Result<Sandbox<StreamsWired>> {
        if input {
            let fd = open_in_jail(STAGED_INPUT_NAME, OFlag::O_RDONLY, Mode::empty())?;
            redirect(fd, libc::STDIN_FILENO)?;
        }

        if output {
            let fd = open_in_jail(
                STAGED_OUTPUT_NAME,
                OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
                Mode::from_bits_truncate(0o644),
            )?;
            redirect(fd, libc::STDOUT_FILENO)?;
        }

        Ok(self.advance("streams"))
    }
}

fn open_in_jail(name: &str, flags: OFlag, mode: Mode) -> Result<RawFd> {
    let path = Path::new("/").join(name);
    open(&path, flags | OFlag::O_NOFOLLOW, mode).map_err(|e| {
        SandboxError::Confinement(format!("open({}) failed: {}", path.display(), e))
    })
}

fn redirect(fd: RawFd, target: RawFd) -> Result<()> {
    dup2(fd, target)
        .map_err(|e| SandboxError::Confinement(format!("dup2({} -> {}) failed: {}", fd, target, e)))?;
    if fd != target {
        close(fd).map_err(|e| SandboxError::Confinement(format!("close({}) failed: {}", fd, e)))?;
    }
    Ok(())
}

impl Sandbox<StreamsWired> {
    /// Step 5: every ceiling or none; a partial set is a failure.
    pub fn apply_limits(self, limits: &ResourceLimits) -> Result<Sandbox<Limited>> {
        limits.apply()?;
        Ok(self.advance("limits"))
    }
}

impl Sandbox<Limited> {
    /// Step 6: never run untrusted code as the identity that performed the chroot.
    pub fn drop_credentials(self, identity: SandboxIdentity) -> Result<Sandbox<ExecReady>> {
        transition_to_unprivileged(identity)?;
        Ok(self.advance("credentials"))
    }
}

impl Sandbox<ExecReady> {
    /// Step 7: replace the process image. Only returns on failure.
    pub fn exec_target(self, executable_name: &str) -> Result<Infallible> {
        let path = CString::new(format!("/{}", executable_name))
            .map_err(|_| SandboxError::Confinement("executable name contains NUL byte".to_string()))?;
        let argv = [path.as_c_str()];
        let envp: [&std::ffi::CStr; 0] = [];

        execve(path.as_c_str(), &argv[..], &envp[..]).map_err(|e| {
            SandboxError::Confinement(format!(
                "execve({:?}) failed: {} (is the program statically linked?)",
                path, e
            ))
        })
    }
}

/// Run the whole chain in the forked child.
fn confine(plan: &LaunchPlan) -> Result<Infallible> {
    Sandbox::new()
        .enter_jail(&plan.jail_root)?
        .lead_process_group()?
        .wire_streams(plan.redirect_input, plan.redirect_output)?
        .apply_limits(&plan.limits)?
        .drop_credentials(plan.identity)?
        .exec_target(&plan.executable_name)
}

/// Child entry point after fork. Never returns: either the target replaces
/// this process or the child exits with the reserved setup-failure status.
pub fn confine_and_exec(plan: &LaunchPlan) -> ! {
    let err = match confine(plan) {
        Ok(never) => match never {},
        Err(e) => e,
    };

    // stderr is never redirected, so the reason reaches the operator.
    eprintln!("antiskill: sandbox setup failed: {}", err);
    // SAFETY: _exit skips destructors and atexit handlers, so the parent's
    // staging area and buffered stdout are left alone.
    unsafe { libc::_exit(CHILD_SETUP_FAILED) }
}
