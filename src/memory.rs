//! Thin wrappers over `PTRACE_PEEKTEXT`/`PTRACE_POKETEXT`, built on the
//! word-at-a-time read/modify/write pattern common to ptrace-based
//! debuggers, on top of `nix`'s own `ptrace::read`/`ptrace::write`.

use nix::sys::ptrace;
use nix::unistd::Pid;
use std::mem::size_of;

use crate::error::PtraceError;
use crate::remote::Address;

// This crate's scope is Linux/amd64; PEEKTEXT/POKETEXT both
// transfer one machine word, so the word-at-a-time dance below only makes
// sense if `usize` actually is that 8-byte word.
static_assertions::const_assert_eq!(size_of::<usize>(), 8);

const WORD_SIZE: usize = size_of::<usize>();

fn align_down(addr: u64) -> u64 {
    addr & !(WORD_SIZE as u64 - 1)
}

/// Read `buf.len()` bytes from the tracee at `addr`, word-at-a-time via
/// `PTRACE_PEEKTEXT`. Returns the number of bytes actually read on a
/// partial failure instead of erroring immediately, so callers can decide
/// whether a short read is fatal.
pub fn peek_bytes(pid: Pid, addr: Address, buf: &mut [u8]) -> Result<(), PtraceError> {
    let mut read = 0usize;
    while read < buf.len() {
        let cur = addr.0 + read as u64;
        let word_addr = align_down(cur);
        let offset = (cur - word_addr) as usize;

        let word = ptrace::read(pid, word_addr as ptrace::AddressType).map_err(|_| {
            PtraceError::ShortRead {
                addr,
                wanted: buf.len(),
                got: read,
            }
        })? as u64;
        let word_bytes = word.to_le_bytes();

        let take = (WORD_SIZE - offset).min(buf.len() - read);
        buf[read..read + take].copy_from_slice(&word_bytes[offset..offset + take]);
        read += take;
    }
    Ok(())
}

/// Write `buf` to the tracee at `addr`, preserving the bytes of each
/// boundary word outside `buf`'s range via read-modify-write — needed to
/// patch in a single breakpoint byte without clobbering its neighbors.
pub fn poke_bytes(pid: Pid, addr: Address, buf: &[u8]) -> Result<(), PtraceError> {
    let mut written = 0usize;
    while written < buf.len() {
        let cur = addr.0 + written as u64;
        let word_addr = align_down(cur);
        let offset = (cur - word_addr) as usize;

        let orig = ptrace::read(pid, word_addr as ptrace::AddressType).map_err(|_| {
            PtraceError::ShortWrite {
                addr,
                wanted: buf.len(),
                wrote: written,
            }
        })? as u64;
        let mut word_bytes = orig.to_le_bytes();

        let take = (WORD_SIZE - offset).min(buf.len() - written);
        word_bytes[offset..offset + take].copy_from_slice(&buf[written..written + take]);

        let new_word = u64::from_le_bytes(word_bytes);
        ptrace::write(
            pid,
            word_addr as ptrace::AddressType,
            new_word as *mut std::ffi::c_void,
        )
        .map_err(|_| PtraceError::ShortWrite {
            addr,
            wanted: buf.len(),
            wrote: written,
        })?;

        written += take;
    }
    Ok(())
}
