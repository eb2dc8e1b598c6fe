//! The tracee process and its lifecycle. Spawn follows the
//! `PTRACE_TRACEME` + `pre_exec` convention common to ptrace-based
//! debuggers, plus `PR_SET_PDEATHSIG(SIGKILL)` so the child dies with the
//! tracer.

use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus as NixWaitStatus};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};

use crate::error::SetupError;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Lifecycle {
    NotStarted,
    Stopped,
    Running,
    Exited(i32),
}

pub struct Tracee {
    child: Option<Child>,
    pid: Pid,
    state: Lifecycle,
}

/// Raised in the child, inside `pre_exec`: mark this process traceable
/// and ask the kernel to kill it if the tracer dies first.
fn child_pre_exec() -> std::io::Result<()> {
    ptrace::traceme().map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::Other, "PTRACE_TRACEME failed")
    })?;
    // SAFETY: prctl(PR_SET_PDEATHSIG) with no further arguments is async-signal-safe.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

impl Tracee {
    /// Spawn `path` under ptrace. The child stops itself (SIGTRAP from
    /// the post-TRACEME exec) before running any of its own code; the
    /// caller must `waitpid` once to observe that initial stop, which
    /// this constructor does for them, leaving the tracee `Stopped`.
    pub fn spawn(path: &str, args: &[String]) -> Result<Tracee, SetupError> {
        let mut cmd = Command::new(path);
        cmd.args(args);
        unsafe {
            cmd.pre_exec(child_pre_exec);
        }
        let child = cmd.spawn()?;
        let pid = Pid::from_raw(child.id() as i32);

        let mut tracee = Tracee {
            child: Some(child),
            pid,
            state: Lifecycle::NotStarted,
        };
        match waitpid(pid, None) {
            Ok(NixWaitStatus::Stopped(_, Signal::SIGTRAP)) => {
                tracee.state = Lifecycle::Stopped;
                Ok(tracee)
            }
            Ok(other) => Err(SetupError::FormatSpecific {
                format: "ptrace",
                detail: format!("unexpected initial wait status: {:?}", other),
            }),
            Err(e) => Err(SetupError::FormatSpecific {
                format: "ptrace",
                detail: format!("waitpid failed: {}", e),
            }),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn set_state(&mut self, state: Lifecycle) {
        self.state = state;
    }

    pub fn wait(&mut self, flags: Option<WaitPidFlag>) -> nix::Result<NixWaitStatus> {
        let status = waitpid(self.pid, flags)?;
        match status {
            NixWaitStatus::Exited(_, code) => self.state = Lifecycle::Exited(code),
            NixWaitStatus::Signaled(..) => self.state = Lifecycle::Exited(-1),
            NixWaitStatus::Stopped(..) | NixWaitStatus::PtraceEvent(..) => {
                self.state = Lifecycle::Stopped
            }
            _ => {}
        }
        Ok(status)
    }

    /// Best-effort kill of a prior tracee, for the dispatcher's `Run`
    /// semantics ("kill any prior tracee" before spawning a fresh one).
    pub fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.state = Lifecycle::Exited(-1);
    }
}
