//! Register access: `get()`/`set()` over `PTRACE_GETREGS`/`PTRACE_SETREGS`,
//! narrowed to amd64 since this crate's scope is Linux/amd64 only — a
//! single `libc::user_regs_struct` plus named accessors is enough, no
//! multi-architecture register union needed.

use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::error::PtraceError;
use crate::remote::Address;

#[derive(Copy, Clone, Debug)]
pub struct Registers {
    raw: libc::user_regs_struct,
}

impl Registers {
    pub fn get(pid: Pid) -> Result<Registers, PtraceError> {
        let raw = ptrace::getregs(pid)?;
        Ok(Registers { raw })
    }

    pub fn set(pid: Pid, regs: &Registers) -> Result<(), PtraceError> {
        ptrace::setregs(pid, regs.raw)?;
        Ok(())
    }

    pub fn pc(&self) -> Address {
        Address(self.raw.rip)
    }

    pub fn set_pc(&mut self, addr: Address) {
        self.raw.rip = addr.0;
    }

    pub fn sp(&self) -> Address {
        Address(self.raw.rsp)
    }

    pub fn bp(&self) -> Address {
        Address(self.raw.rbp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pc_set_get_round_trips() {
        let mut regs = Registers {
            raw: unsafe { std::mem::zeroed() },
        };
        regs.set_pc(Address(0x4000_1122));
        assert_eq!(regs.pc(), Address(0x4000_1122));
    }
}
