//! Error taxonomy, one enum per failure category. Programmer errors (a
//! wrong-width integer decode) are not represented here: those are a
//! `panic!`, not a `Result`.

use std::path::PathBuf;
use thiserror::Error;

use crate::remote::Address;

/// Category 1: binary/DWARF setup failures. Terminal for the session that
/// produced them.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("binary not found: {0}")]
    BinaryNotFound(PathBuf),
    #[error("unrecognized binary format")]
    UnrecognizedFormat,
    #[error("error reading {format} sections: {detail}")]
    FormatSpecific { format: &'static str, detail: String },
    #[error("failed to load DWARF sections: {0}")]
    DwarfLoad(String),
    #[error("failed to start process: {0}")]
    StartProcess(#[from] std::io::Error),
}

/// Category 2: malformed per-request input. The session continues.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("bad open mode: {0:?}")]
    BadMode(String),
    #[error("bad file descriptor: {0}")]
    BadFd(i32),
    #[error("malformed address expression: {0:?}")]
    MalformedAddress(String),
    #[error("file I/O error: {0}")]
    Io(String),
}

/// Category 3: ptrace-level failures. May leave the tracee in an
/// inconsistent state; callers should expect subsequent operations to
/// also fail.
#[derive(Debug, Error)]
pub enum PtraceError {
    #[error("ptrace error: {0}")]
    Errno(#[from] nix::Error),
    #[error("short read at {addr}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        addr: Address,
        wanted: usize,
        got: usize,
    },
    #[error("short write at {addr}: wanted {wanted} bytes, wrote {wrote}")]
    ShortWrite {
        addr: Address,
        wanted: usize,
        wrote: usize,
    },
    #[error("unexpected wait status: {0}")]
    UnexpectedStatus(String),
    #[error("tracee is not stopped")]
    NotStopped,
    #[error("tracee has exited")]
    Exited,
}

/// Category 4: lookup failures. Benign — the session continues.
#[derive(Debug, Error)]
pub enum NotFoundError {
    #[error("symbol {0} not found")]
    SymbolNotFound(String),
    #[error("{0} has no LowPC attribute")]
    NoLowPc(String),
    #[error("{0} has non-integer LowPC attribute")]
    NonIntegerLowPc(String),
    #[error("PC {0} not found")]
    PcNotFound(Address),
}

/// Category 5: the printer's sticky error. The partial output accumulated
/// before this error was hit is still meaningful and is always returned
/// alongside it.
#[derive(Debug, Error, Clone)]
pub enum PrintError {
    #[error("unimplemented location type")]
    UnimplementedLocationType,
    #[error("unimplemented type: {0}")]
    UnimplementedType(String),
    #[error("unsupported aggregate kind: {0}")]
    UnsupportedAggregateKind(String),
    #[error("unknown size")]
    UnknownSize,
    #[error("peek failed at {0}")]
    Peek(Address),
    #[error("{0}")]
    NotFound(String),
}

/// The error the dispatcher actually hands back to callers: a union of
/// every category above so request handlers can use `?` uniformly.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Ptrace(#[from] PtraceError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Print(#[from] PrintError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl From<nix::Error> for DispatchError {
    fn from(e: nix::Error) -> Self {
        DispatchError::Ptrace(PtraceError::Errno(e))
    }
}
