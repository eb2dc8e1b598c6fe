//! The tracer engine: a single dedicated OS thread that owns every ptrace
//! call, because the kernel restricts ptrace to the thread that attached.
//! Concurrent callers hand work to that thread through an unbuffered
//! request channel and block on a fresh one-shot reply channel per call,
//! so a reply can never be mistaken for a different caller's.
//!
//! This is channel-based RPC to a pinned worker thread: the thread
//! receives boxed closures instead of messages, runs each one to
//! completion, and sends the result back down that call's own reply
//! channel before picking up the next request.

use nix::sys::ptrace;
use nix::sys::wait::{WaitPidFlag, WaitStatus as NixWaitStatus};
use nix::unistd::Pid;
use std::any::Any;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::JoinHandle;

use crate::error::{PtraceError, SetupError};
use crate::log::LogLevel::LogDebug;
use crate::registers::Registers;
use crate::remote::Address;
use crate::log;
use crate::tracee::{Lifecycle, Tracee};

/// Result of a `Wait`, reduced to what the breakpoint manager and
/// dispatcher need: the stop reason plus the tracee's registers, if it's
/// still alive enough to have any.
#[derive(Debug, Clone)]
pub enum StopReason {
    Trap,
    Stop(i32),
    CloneEvent,
    Exited(i32),
    Signaled(i32),
}

struct EngineState {
    tracee: Option<Tracee>,
}

type Job = Box<dyn FnOnce(&mut EngineState) -> Box<dyn Any + Send> + Send>;
type ReplySender = mpsc::Sender<Box<dyn Any + Send>>;

pub struct TracerEngine {
    request_tx: SyncSender<(Job, ReplySender)>,
    _worker: JoinHandle<()>,
}

impl TracerEngine {
    pub fn new() -> TracerEngine {
        // capacity 0: a send only completes once the worker thread is
        // ready to receive it, pairing each call with the worker's next
        // iteration rather than letting requests queue up invisibly.
        let (request_tx, request_rx): (SyncSender<(Job, ReplySender)>, Receiver<_>) =
            mpsc::sync_channel(0);
        let worker = std::thread::Builder::new()
            .name("tracehound-tracer".into())
            .spawn(move || Self::worker_loop(request_rx))
            .expect("failed to spawn tracer thread");
        TracerEngine {
            request_tx,
            _worker: worker,
        }
    }

    fn worker_loop(request_rx: Receiver<(Job, ReplySender)>) {
        let mut state = EngineState { tracee: None };
        while let Ok((job, reply_tx)) = request_rx.recv() {
            let result = job(&mut state);
            // The caller may have given up (e.g. timed out elsewhere);
            // a dropped receiver is not this thread's problem.
            let _ = reply_tx.send(result);
        }
    }

    /// Enqueue `f` onto the tracer thread and block for its result. This
    /// is the only way any ptrace-touching call reaches the tracee.
    fn call<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&mut EngineState) -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel::<Box<dyn Any + Send>>();
        let job: Job = Box::new(move |state| Box::new(f(state)));
        self.request_tx
            .send((job, reply_tx))
            .expect("tracer thread terminated unexpectedly");
        let boxed = reply_rx
            .recv()
            .expect("tracer thread dropped reply without panicking");
        *boxed
            .downcast::<T>()
            .expect("tracer reply type mismatch (programmer error)")
    }

    /// `StartProcess`: kill any existing tracee, then spawn and stop at
    /// entry.
    pub fn start_process(
        &self,
        path: String,
        args: Vec<String>,
    ) -> Result<Pid, SetupError> {
        self.call(move |state| {
            if let Some(t) = state.tracee.as_mut() {
                t.kill();
            }
            let tracee = Tracee::spawn(&path, &args)?;
            let pid = tracee.pid();
            state.tracee = Some(tracee);
            Ok(pid)
        })
    }

    pub fn pid(&self) -> Option<Pid> {
        self.call(|state| state.tracee.as_ref().map(|t| t.pid()))
    }

    pub fn lifecycle(&self) -> Option<Lifecycle> {
        self.call(|state| state.tracee.as_ref().map(|t| t.state()))
    }

    /// `PtraceGetRegs`.
    pub fn get_regs(&self) -> Result<Registers, PtraceError> {
        self.call(|state| {
            let pid = state.tracee.as_ref().ok_or(PtraceError::Exited)?.pid();
            Registers::get(pid)
        })
    }

    /// `PtraceSetRegs`.
    pub fn set_regs(&self, regs: Registers) -> Result<(), PtraceError> {
        self.call(move |state| {
            let pid = state.tracee.as_ref().ok_or(PtraceError::Exited)?.pid();
            Registers::set(pid, &regs)
        })
    }

    /// `PtracePeekText`.
    pub fn peek(&self, addr: Address, len: usize) -> Result<Vec<u8>, PtraceError> {
        self.call(move |state| {
            let pid = state.tracee.as_ref().ok_or(PtraceError::Exited)?.pid();
            let mut buf = vec![0u8; len];
            crate::memory::peek_bytes(pid, addr, &mut buf)?;
            Ok(buf)
        })
    }

    /// `PtracePokeText`.
    pub fn poke(&self, addr: Address, bytes: Vec<u8>) -> Result<(), PtraceError> {
        self.call(move |state| {
            let pid = state.tracee.as_ref().ok_or(PtraceError::Exited)?.pid();
            crate::memory::poke_bytes(pid, addr, &bytes)
        })
    }

    /// `PtraceSingleStep`, followed by a blocking `Wait`.
    pub fn single_step(&self) -> Result<StopReason, PtraceError> {
        self.call(|state| {
            let t = state.tracee.as_mut().ok_or(PtraceError::Exited)?;
            ptrace::step(t.pid(), None)?;
            Self::wait_inner(t)
        })
    }

    /// `PtraceCont` then blocking `Wait`. On return, a trap, a cooperative
    /// stop, or a (currently unmanaged) clone event are all expected.
    pub fn cont_and_wait(&self) -> Result<StopReason, PtraceError> {
        self.call(|state| {
            let t = state.tracee.as_mut().ok_or(PtraceError::Exited)?;
            ptrace::cont(t.pid(), None)?;
            log!(LogDebug, "PTRACE_CONT issued to pid {}", t.pid());
            Self::wait_inner(t)
        })
    }

    fn wait_inner(t: &mut Tracee) -> Result<StopReason, PtraceError> {
        let status = t.wait(Some(WaitPidFlag::empty())).map_err(PtraceError::from)?;
        let reason = match status {
            NixWaitStatus::Exited(_, code) => StopReason::Exited(code),
            NixWaitStatus::Signaled(_, sig, _) => StopReason::Signaled(sig as i32),
            NixWaitStatus::Stopped(_, nix::sys::signal::Signal::SIGTRAP) => StopReason::Trap,
            NixWaitStatus::Stopped(_, sig) => StopReason::Stop(sig as i32),
            NixWaitStatus::PtraceEvent(_, _, _) => StopReason::CloneEvent,
            other => {
                return Err(PtraceError::UnexpectedStatus(format!("{:?}", other)));
            }
        };
        log!(LogDebug, "wait() -> {:?}", reason);
        Ok(reason)
    }

    pub fn kill_tracee(&self) {
        self.call(|state| {
            if let Some(t) = state.tracee.as_mut() {
                t.kill();
            }
        })
    }
}

impl Default for TracerEngine {
    fn default() -> Self {
        Self::new()
    }
}
