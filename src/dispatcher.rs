//! The request dispatcher: the single point where an external `Request`
//! becomes calls into the tracer engine, the breakpoint manager, the
//! symbol table, the file-descriptor table, and the value printer.
//! `Engine` is the `Mutex`-wrapped public entry point; `Dispatcher` is the
//! state it guards — one plain `Mutex<T>` around a single "current
//! session" struct rather than a lock per field.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::arch::{ArchKind, Architecture};
use crate::binary;
use crate::breakpoint::BreakpointManager;
use crate::dwarf::symbol::SymbolTable;
use crate::dwarf::DwarfInfo;
use crate::error::{DispatchError, PrintError, SetupError};
use crate::fd_table::{FdTable, OpenMode};
use crate::printer;
use crate::remote::Address;
use crate::tracer::{StopReason, TracerEngine};

/// Every request this crate understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Open { name: String, mode: String },
    ReadAt { fd: i32, len: usize, offset: u64 },
    Close { fd: i32 },
    Run { start: bool },
    Resume,
    Breakpoint { address: String },
    DeleteBreakpoints { pcs: Vec<u64> },
    Eval { expr: String },
    Frames { depth: u32 },
}

/// The reply counterpart to every `Request` variant. `Evaluated` carries
/// both the printer's accumulated output and its sticky error (if any):
/// partial output must survive an error rather than being discarded by a
/// `Result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Opened { fd: i32 },
    Data { bytes: Vec<u8> },
    Closed,
    Started,
    Stopped { pc: u64, sp: u64 },
    Exited { code: i32 },
    BreakpointSet { pcs: Vec<u64> },
    BreakpointsDeleted,
    Evaluated { result: String, error: Option<String> },
    Frames { frames: Vec<Frame> },
    Error { message: String },
}

/// A stub stack frame. Kept as a named type, rather than `()`, so a future
/// frame unwinder has somewhere to put real fields without breaking the
/// wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub pc: u64,
}

/// Parse an `Eval`/`Breakpoint` address expression: a bare `0x...` hex
/// literal, or a symbol name to resolve through the symbol table.
fn resolve_address(symbols: &SymbolTable, expr: &str) -> Result<Address, DispatchError> {
    if let Some(addr) = Address::from_hex(expr) {
        return Ok(addr);
    }
    Ok(symbols.lookup_exact(expr)?)
}

/// All per-binary state a dispatched `Request` might touch. Not `Sync` on
/// its own merits — every field below expects a single caller at a time —
/// which is exactly what wrapping it in a `Mutex` (see `Engine`) provides.
pub struct Dispatcher {
    path: PathBuf,
    arch: &'static Architecture,
    dwarf: DwarfInfo,
    symbols: SymbolTable,
    engine: Arc<TracerEngine>,
    breakpoints: BreakpointManager,
    fds: FdTable,
}

impl Dispatcher {
    /// Load `path`'s DWARF and symbol table up front; the tracee itself is
    /// not spawned until the first `Run` request — starting the executable
    /// under ptrace is `Run`'s job, not the dispatcher constructor's.
    pub fn new(path: PathBuf) -> Result<Dispatcher, SetupError> {
        let loaded = binary::load(&path)?;
        let arch = Architecture::for_kind(ArchKind::Amd64);
        let symbols = SymbolTable::build(&loaded.dwarf)?;
        let engine = Arc::new(TracerEngine::new());
        let breakpoints = BreakpointManager::new(Arc::clone(&engine), arch);
        Ok(Dispatcher {
            path,
            arch,
            dwarf: loaded.dwarf,
            symbols,
            engine,
            breakpoints,
            fds: FdTable::new(),
        })
    }

    /// Handle one `Request`, converting any error into `Response::Error`
    /// rather than propagating it — the dispatcher's caller (a long-lived
    /// session loop) should never have to unwind on a single bad request.
    pub fn dispatch(&mut self, request: Request) -> Response {
        match self.handle(request) {
            Ok(response) => response,
            Err(e) => Response::Error {
                message: e.to_string(),
            },
        }
    }

    fn handle(&mut self, request: Request) -> Result<Response, DispatchError> {
        match request {
            Request::Open { name, mode } => {
                let mode = OpenMode::parse(&mode)?;
                let fd = self.fds.open(std::path::Path::new(&name), mode)?;
                Ok(Response::Opened { fd })
            }
            Request::ReadAt { fd, len, offset } => {
                let bytes = self.fds.read_at(fd, len, offset)?;
                Ok(Response::Data { bytes })
            }
            Request::Close { fd } => {
                self.fds.close(fd)?;
                Ok(Response::Closed)
            }
            Request::Run { start } => self.run(start),
            Request::Resume => self.resume(),
            Request::Breakpoint { address } => self.set_breakpoint(&address),
            Request::DeleteBreakpoints { pcs } => self.delete_breakpoints(&pcs),
            Request::Eval { expr } => self.eval(&expr),
            Request::Frames { depth: _ } => Ok(Response::Frames { frames: Vec::new() }),
        }
    }

    /// `Run{start}`: kill any prior tracee and spawn a fresh one. Old
    /// breakpoint bookkeeping is dropped (not cleared via ptrace — the
    /// process it was patched into is already gone) since it would
    /// otherwise point at addresses in a process that no longer exists.
    /// `start=false` leaves the tracee stopped at its post-exec entry
    /// trap; `start=true` additionally continues it once before replying.
    fn run(&mut self, start: bool) -> Result<Response, DispatchError> {
        self.breakpoints.reset();
        let path = self.path.to_string_lossy().into_owned();
        self.engine.start_process(path, Vec::new())?;
        if !start {
            return Ok(Response::Started);
        }
        self.continue_and_report()
    }

    /// `Resume`: step past a breakpoint sitting at the current PC (so
    /// continuing doesn't just retrap on the same instruction), then
    /// `PTRACE_CONT` and wait.
    fn resume(&mut self) -> Result<Response, DispatchError> {
        let regs = self.engine.get_regs()?;
        self.breakpoints.step_over_if_set(regs.pc())?;
        self.continue_and_report()
    }

    fn continue_and_report(&mut self) -> Result<Response, DispatchError> {
        let reason = self.engine.cont_and_wait()?;
        match reason {
            StopReason::Trap => {
                if let Some(bp_addr) = self.breakpoints.on_trap()? {
                    // `on_trap` has already stepped the tracee past the
                    // breakpoint and re-armed it; report the breakpoint's
                    // own address, not the tracee's real (now further
                    // along) PC.
                    let regs = self.engine.get_regs()?;
                    Ok(Response::Stopped {
                        pc: bp_addr.0,
                        sp: regs.sp().0,
                    })
                } else {
                    let regs = self.engine.get_regs()?;
                    Ok(Response::Stopped {
                        pc: regs.pc().0,
                        sp: regs.sp().0,
                    })
                }
            }
            StopReason::Stop(_) | StopReason::CloneEvent => {
                let regs = self.engine.get_regs()?;
                Ok(Response::Stopped {
                    pc: regs.pc().0,
                    sp: regs.sp().0,
                })
            }
            StopReason::Exited(code) => Ok(Response::Exited { code }),
            StopReason::Signaled(sig) => Ok(Response::Exited { code: -sig }),
        }
    }

    /// `Breakpoint{address}`: evaluate `address` (a symbol name or `0x...`
    /// literal), install a trap there, and report the resolved PC back.
    fn set_breakpoint(&mut self, address: &str) -> Result<Response, DispatchError> {
        let addr = resolve_address(&self.symbols, address)?;
        self.breakpoints.set(addr)?;
        Ok(Response::BreakpointSet { pcs: vec![addr.0] })
    }

    fn delete_breakpoints(&mut self, pcs: &[u64]) -> Result<Response, DispatchError> {
        for &pc in pcs {
            self.breakpoints.clear(Address(pc))?;
        }
        Ok(Response::BreakpointsDeleted)
    }

    /// `Eval{expr}`: three
    /// grammars in one string — `val:<name>` prints a global's value via
    /// the printer; a bare `0x...` literal resolves to the function
    /// containing that PC; anything else is looked up as a symbol name and
    /// reported back as its address.
    fn eval(&mut self, expr: &str) -> Result<Response, DispatchError> {
        if let Some(name) = expr.strip_prefix("val:") {
            let (result, err) = self.sprint(name);
            return Ok(Response::Evaluated {
                result,
                error: err.map(|e: PrintError| e.to_string()),
            });
        }
        if let Some(addr) = Address::from_hex(expr) {
            let name = self.symbols.lookup_pc(addr)?;
            return Ok(Response::Evaluated {
                result: name.to_string(),
                error: None,
            });
        }
        let addr = self.symbols.lookup_exact(expr)?;
        Ok(Response::Evaluated {
            result: format!("{}", addr),
            error: None,
        })
    }

    /// Drive `printer::sprint` with a peek closure that forwards to the
    /// tracer engine's own request channel.
    fn sprint(&self, name: &str) -> (String, Option<PrintError>) {
        let engine = Arc::clone(&self.engine);
        printer::sprint(&self.dwarf, self.arch, name, move |addr, buf| {
            match engine.peek(addr, buf.len()) {
                Ok(bytes) if bytes.len() == buf.len() => {
                    buf.copy_from_slice(&bytes);
                    true
                }
                _ => false,
            }
        })
    }
}

/// The `Mutex`-guarded public entry point. A thin wrapper rather than
/// folding the lock into `Dispatcher` itself, so `Dispatcher`'s own methods
/// stay testable without going through a lock at all.
pub struct Engine {
    inner: Mutex<Dispatcher>,
}

impl Engine {
    pub fn new(path: PathBuf) -> Result<Engine, SetupError> {
        Ok(Engine {
            inner: Mutex::new(Dispatcher::new(path)?),
        })
    }

    pub fn handle(&self, request: Request) -> Response {
        let mut dispatcher = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        dispatcher.dispatch(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_address_prefers_hex_literal() {
        let symbols = SymbolTable::build(&DwarfInfo::load(&Default::default(), gimli::RunTimeEndian::Little).unwrap())
            .unwrap();
        let addr = resolve_address(&symbols, "0x1000").unwrap();
        assert_eq!(addr, Address(0x1000));
    }

    #[test]
    fn resolve_address_falls_back_to_symbol_lookup() {
        let symbols = SymbolTable::build(&DwarfInfo::load(&Default::default(), gimli::RunTimeEndian::Little).unwrap())
            .unwrap();
        let err = resolve_address(&symbols, "main.missing").unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }
}
