use crate::AttachError;
use lazy_static::lazy_static;
use nix::{
    errno::Errno,
    sys::{
        ptrace,
        signal::Signal,
        wait::{waitpid, WaitPidFlag},
    },
    unistd::Pid,
};
use std::fmt;
use tracing::{debug, warn};

const YAMA_PTRACE_SCOPE: &str = "/proc/sys/kernel/yama/ptrace_scope";

/// The ptrace request that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    Attach,
    Detach,
}

impl fmt::Display for TraceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TraceOp::Attach => "PTRACE_ATTACH",
            TraceOp::Detach => "PTRACE_DETACH",
        })
    }
}

/// Debugger-style process control used to freeze a target during a dump.
pub trait Tracer {
    /// Attaches to `pid`, suspending it.
    fn attach(&self, pid: Pid) -> Result<(), AttachError>;

    /// Detaches from `pid`, resuming it.
    fn detach(&self, pid: Pid) -> Result<(), AttachError>;
}

lazy_static! {
    static ref PTRACE: Ptrace = Ptrace::probe();
}

/// Handle to the kernel's ptrace facility. There is one per process, see [`Ptrace::global`].
#[derive(Debug)]
pub struct Ptrace {
    ptrace_scope: Option<u8>,
}

impl Ptrace {
    /// Returns the process-wide handle, probing the system on first use.
    pub fn global() -> &'static Ptrace {
        &PTRACE
    }

    fn probe() -> Self {
        let ptrace_scope = std::fs::read_to_string(YAMA_PTRACE_SCOPE)
            .ok()
            .and_then(|scope| scope.trim().parse().ok());
        debug!(?ptrace_scope, "probed ptrace configuration");
        Ptrace { ptrace_scope }
    }
}

impl Tracer for Ptrace {
    fn attach(&self, pid: Pid) -> Result<(), AttachError> {
        ptrace::attach(pid).map_err(|errno| {
            if errno == Errno::EPERM {
                if let Some(scope) = self.ptrace_scope.filter(|&scope| scope > 0) {
                    warn!(
                        ptrace_scope = scope,
                        "attaching to non-child processes is restricted by Yama; \
                         try running as root or with CAP_SYS_PTRACE"
                    );
                }
            }
            AttachError::new(TraceOp::Attach, pid, errno)
        })?;

        // The tracee is only guaranteed to be stopped once the attach stop has been reported.
        match waitpid(pid, Some(WaitPidFlag::__WALL)) {
            Ok(status) => debug!(%pid, ?status, "tracee stopped"),
            Err(errno) => warn!(%pid, %errno, "failed to wait for the tracee to stop"),
        }
        Ok(())
    }

    fn detach(&self, pid: Pid) -> Result<(), AttachError> {
        ptrace::detach(pid, None::<Signal>)
            .map_err(|errno| AttachError::new(TraceOp::Detach, pid, errno))
    }
}

/// Keeps a target attached for as long as the guard lives.
///
/// Construction attaches when requested. The matching detach runs exactly once, either through
/// [`AttachGuard::release`] or when the guard is dropped on any other path. A failed detach on
/// drop is logged and otherwise ignored.
pub struct AttachGuard<'t, T: Tracer + ?Sized> {
    tracer: &'t T,
    pid: Pid,
    attached: bool,
}

impl<'t, T: Tracer + ?Sized> AttachGuard<'t, T> {
    pub fn acquire(tracer: &'t T, pid: Pid, enabled: bool) -> Result<Self, AttachError> {
        if enabled {
            tracer.attach(pid)?;
            debug!(%pid, "attached to target");
        }

        Ok(AttachGuard {
            tracer,
            pid,
            attached: enabled,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Detaches now and reports the outcome.
    pub fn release(mut self) -> Result<(), AttachError> {
        self.detach()
    }

    fn detach(&mut self) -> Result<(), AttachError> {
        if !self.attached {
            return Ok(());
        }
        self.attached = false;
        self.tracer.detach(self.pid)?;
        debug!(pid = %self.pid, "detached from target");
        Ok(())
    }
}

impl<T: Tracer + ?Sized> Drop for AttachGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(err) = self.detach() {
            warn!(%err, "failed to detach from target");
        }
    }
}
