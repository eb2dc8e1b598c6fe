//! Breakpoint manager, in the same style as the `install_breakpoint`/
//! `cont()` step-over dance found in small ptrace-based debuggers: patch a single
//! `INT3` byte in over the original instruction, and on hitting it, rewind
//! the PC by the trap width, restore the original byte, single-step past
//! it, then re-arm the trap before resuming — so a breakpoint never stops
//! the same instruction from running once it's been stepped over.
//!
//! The manager holds an `Arc<TracerEngine>` rather than its own lock: the
//! engine's internal worker-thread rendezvous already serializes every
//! ptrace call, so a second lock here would only add contention without
//! adding safety.

use std::collections::HashMap;
use std::sync::Arc;

use crate::arch::Architecture;
use crate::error::PtraceError;
use crate::remote::Address;
use crate::tracer::{StopReason, TracerEngine};

struct Installed {
    original_bytes: Vec<u8>,
}

/// Tracks every address currently patched with a trap instruction, and
/// knows how to step a stopped tracee off of one transparently.
pub struct BreakpointManager {
    engine: Arc<TracerEngine>,
    arch: &'static Architecture,
    installed: HashMap<Address, Installed>,
}

impl BreakpointManager {
    pub fn new(engine: Arc<TracerEngine>, arch: &'static Architecture) -> BreakpointManager {
        BreakpointManager {
            engine,
            arch,
            installed: HashMap::new(),
        }
    }

    /// `Set(addr)`: read back and save the bytes currently at `addr`, then
    /// patch in the architecture's breakpoint instruction. Idempotent —
    /// setting an address that's already trapped is a no-op, so callers
    /// don't need to track what they've already asked for.
    pub fn set(&mut self, addr: Address) -> Result<(), PtraceError> {
        if self.installed.contains_key(&addr) {
            return Ok(());
        }
        let len = self.arch.breakpoint_size();
        let original = self.engine.peek(addr, len)?;
        self.engine.poke(addr, self.arch.breakpoint_insn.to_vec())?;
        self.installed.insert(
            addr,
            Installed {
                original_bytes: original,
            },
        );
        Ok(())
    }

    /// `Clear(addr)`: restore the original bytes. A no-op if nothing is
    /// installed there.
    pub fn clear(&mut self, addr: Address) -> Result<(), PtraceError> {
        if let Some(installed) = self.installed.remove(&addr) {
            self.engine.poke(addr, installed.original_bytes)?;
        }
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<(), PtraceError> {
        let addrs: Vec<Address> = self.installed.keys().copied().collect();
        for addr in addrs {
            self.clear(addr)?;
        }
        Ok(())
    }

    pub fn is_set(&self, addr: Address) -> bool {
        self.installed.contains_key(&addr)
    }

    /// Drop every tracked breakpoint without touching the tracee's memory,
    /// for a fresh `Run`'s "kill any prior tracee" step: the old process
    /// (and its patched bytes) is already gone, so there is nothing left
    /// to restore, only bookkeeping to discard.
    pub fn reset(&mut self) {
        self.installed.clear();
    }

    /// Step a stopped tracee off a breakpoint sitting exactly at its
    /// current PC, without the `on_trap` rewind (the PC is already at
    /// `addr`, not `addr + breakpoint_size`). Used by `Resume` before
    /// re-continuing: resuming from a live breakpoint address would
    /// otherwise just retrap on the same instruction forever.
    pub fn step_over_if_set(&mut self, addr: Address) -> Result<(), PtraceError> {
        if self.installed.contains_key(&addr) {
            self.step_over(addr)?;
        }
        Ok(())
    }

    /// `OnTrap`: called right after a `Wait` reports `StopReason::Trap`.
    /// If the PC (minus the trap width) lands on a known breakpoint, this
    /// performs the full rewind/restore/step/rearm dance and reports the
    /// breakpoint's original address; otherwise the trap wasn't one of
    /// ours (e.g. a plain `SIGTRAP` from single-stepping) and `None` is
    /// returned so the caller treats it as an ordinary stop.
    pub fn on_trap(&mut self) -> Result<Option<Address>, PtraceError> {
        let regs = self.engine.get_regs()?;
        let trap_width = self.arch.breakpoint_size() as u64;
        let candidate = Address(regs.pc().0 - trap_width);
        if !self.installed.contains_key(&candidate) {
            return Ok(None);
        }

        let mut regs = regs;
        regs.set_pc(candidate);
        self.engine.set_regs(regs)?;

        self.step_over(candidate)?;
        Ok(Some(candidate))
    }

    /// Temporarily restore the original instruction at `addr`, single-step
    /// the tracee across it, then re-patch the trap byte back in. Leaves
    /// the breakpoint installed (in `self.installed`) throughout, so a
    /// concurrent `Clear` racing this call would be a caller bug, not
    /// something this method needs to guard against — the engine already
    /// serializes calls onto one thread.
    fn step_over(&mut self, addr: Address) -> Result<(), PtraceError> {
        let original_bytes = self.installed.get(&addr).unwrap().original_bytes.clone();
        self.engine.poke(addr, original_bytes)?;

        let reason = self.engine.single_step()?;
        match reason {
            StopReason::Exited(_) | StopReason::Signaled(_) => {
                // The tracee is gone; nothing left to re-arm.
                self.installed.remove(&addr);
                Ok(())
            }
            _ => self.engine.poke(addr, self.arch.breakpoint_insn.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{ArchKind, Architecture};

    fn amd64() -> &'static Architecture {
        Architecture::for_kind(ArchKind::Amd64)
    }

    #[test]
    fn set_is_idempotent_without_a_live_tracee() {
        // With no tracee attached, `set` will fail on the first `peek`
        // (Exited), which is exactly the behavior callers rely on to
        // detect "no process to set a breakpoint in" rather than silently
        // doing nothing.
        let engine = Arc::new(TracerEngine::new());
        let mut mgr = BreakpointManager::new(engine, amd64());
        let result = mgr.set(Address(0x1000));
        assert!(result.is_err());
        assert!(!mgr.is_set(Address(0x1000)));
    }

    #[test]
    fn clear_unset_address_is_a_no_op() {
        let engine = Arc::new(TracerEngine::new());
        let mut mgr = BreakpointManager::new(engine, amd64());
        assert!(mgr.clear(Address(0x2000)).is_ok());
    }
}
