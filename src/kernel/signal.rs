use crate::config::types::{Result, SandboxError};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
/// Async-safe deadline and interrupt handling for the supervisor
///
/// Handlers only touch atomics and send SIGKILL. Everything else (classifying,
/// printing, cleanup) happens after the supervisor's wait returns.
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

/// State shared between the supervisor and its signal handlers
pub struct SupervisorState {
    /// Child pid (also its process group id), 0 when nothing is tracked
    child: AtomicI32,
    /// Deadline handler killed the child group
    timed_out: AtomicBool,
    /// SIGINT/SIGTERM asked the supervisor to stop
    interrupted: AtomicBool,
}

/// The one state instance signal handlers can reach.
/// Handlers take no context argument, so this static is unavoidable.
static ACTIVE: SupervisorState = SupervisorState::new();

impl SupervisorState {
    pub const fn new() -> Self {
        Self {
            child: AtomicI32::new(0),
            timed_out: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
        }
    }

    /// State wired to the installed handlers
    pub fn global() -> &'static SupervisorState {
        &ACTIVE
    }

    /// Start tracking a freshly forked child and clear the timeout from any
    /// prior run. An interrupt that arrived during setup stays visible.
    pub fn track(&self, pid: i32) {
        self.timed_out.store(false, Ordering::SeqCst);
        self.child.store(pid, Ordering::SeqCst);
    }

    /// Stop tracking; later signals no longer kill anything.
    pub fn untrack(&self) {
        self.child.store(0, Ordering::SeqCst);
    }

    pub fn tracked(&self) -> Option<i32> {
        match self.child.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Deadline expiry. Async-signal-safe.
    pub fn on_deadline(&self) {
        self.kill_tracked();
        self.timed_out.store(true, Ordering::SeqCst);
    }

    /// Supervisor asked to stop. Async-signal-safe.
    pub fn on_interrupt(&self) {
        self.kill_tracked();
        self.interrupted.store(true, Ordering::SeqCst);
    }

    fn kill_tracked(&self) {
        let pid = self.child.load(Ordering::SeqCst);
        if pid > 0 {
            // SAFETY: kill(2) is async-signal-safe. Fall back to the bare pid
            // if the group does not exist yet.
            let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
            if rc != 0 {
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                }
            }
        }
    }
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self::new()
    }
}

extern "C" fn deadline_handler(_signal: libc::c_int) {
    ACTIVE.on_deadline();
}

extern "C" fn interrupt_handler(_signal: libc::c_int) {
    ACTIVE.on_interrupt();
}

/// Handlers installed by a guard, restored in reverse order on drop
#[derive(Default)]
struct InstalledHandlers {
    previous: Vec<(Signal, SigAction)>,
}

impl InstalledHandlers {
    fn install(&mut self, sig: Signal, handler: extern "C" fn(libc::c_int)) -> Result<()> {
        // SA_RESTART lets wait4 resume after the handler killed the group.
        let action = SigAction::new(SigHandler::Handler(handler), SaFlags::SA_RESTART, SigSet::empty());
        // SAFETY: the handlers only use atomics and kill(2).
        let previous = unsafe { signal::sigaction(sig, &action) }
            .map_err(|e| SandboxError::Process(format!("Failed to install {} handler: {}", sig, e)))?;
        self.previous.push((sig, previous));
        Ok(())
    }
}

impl Drop for InstalledHandlers {
    fn drop(&mut self) {
        for (sig, action) in self.previous.drain(..).rev() {
            // SAFETY: restoring the disposition that was in place before install.
            let _ = unsafe { signal::sigaction(sig, &action) };
        }
    }
}

/// SIGINT/SIGTERM handlers for the whole run, from before staging until
/// teardown. An interrupt with no child tracked only sets the flag, so the
/// caller can tear the staging area down and stop.
pub struct InterruptGuard {
    _handlers: InstalledHandlers,
}

impl InterruptGuard {
    /// Clear any stale interrupt and install the handlers.
    pub fn install() -> Result<Self> {
        ACTIVE.interrupted.store(false, Ordering::SeqCst);

        let mut handlers = InstalledHandlers::default();
        handlers.install(Signal::SIGINT, interrupt_handler)?;
        handlers.install(Signal::SIGTERM, interrupt_handler)?;
        Ok(Self {
            _handlers: handlers,
        })
    }
}

/// Installed handlers plus an armed one-shot deadline.
/// Dropping it disarms the timer and restores the previous dispositions.
pub struct DeadlineGuard {
    handlers: InstalledHandlers,
}

impl DeadlineGuard {
    /// Install SIGALRM/SIGINT/SIGTERM handlers and arm ITIMER_REAL for `after`.
    pub fn arm(after: Duration) -> Result<Self> {
        let mut guard = Self {
            handlers: InstalledHandlers::default(),
        };

        guard.handlers.install(Signal::SIGALRM, deadline_handler)?;
        guard.handlers.install(Signal::SIGINT, interrupt_handler)?;
        guard.handlers.install(Signal::SIGTERM, interrupt_handler)?;

        set_real_timer(after).map_err(|e| {
            SandboxError::Process(format!("Failed to arm deadline timer: {}", e))
        })?;

        log::debug!("Deadline armed for {} ms", after.as_millis());
        Ok(guard)
    }
}

impl Drop for DeadlineGuard {
    // The handler set drops after this body, so the timer is disarmed first.
    fn drop(&mut self) {
        let _ = set_real_timer(Duration::ZERO);
    }
}

/// One-shot ITIMER_REAL; a zero duration disarms it.
/// With a zero interval the timer disarms itself when it fires.
fn set_real_timer(after: Duration) -> std::io::Result<()> {
    let timer = libc::itimerval {
        it_interval: libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        it_value: libc::timeval {
            tv_sec: after.as_secs() as libc::time_t,
            tv_usec: after.subsec_micros() as libc::suseconds_t,
        },
    };
    // SAFETY: timer is a valid itimerval; the old value is not requested.
    let rc = unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
