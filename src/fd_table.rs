//! File-descriptor table. A growable slot vector indexed by small integers
//! that get reused once closed, a "lowest free slot" allocation discipline
//! rather than ever growing unboundedly under repeated open/close churn.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::ProtocolError;

/// `Open{name, mode}`'s three accepted modes.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    pub fn parse(s: &str) -> Result<OpenMode, ProtocolError> {
        match s {
            "r" => Ok(OpenMode::Read),
            "w" => Ok(OpenMode::Write),
            "rw" => Ok(OpenMode::ReadWrite),
            other => Err(ProtocolError::BadMode(other.to_string())),
        }
    }

    fn open_options(self) -> OpenOptions {
        let mut opts = OpenOptions::new();
        match self {
            OpenMode::Read => {
                opts.read(true);
            }
            OpenMode::Write => {
                opts.write(true).create(true);
            }
            OpenMode::ReadWrite => {
                opts.read(true).write(true).create(true);
            }
        }
        opts
    }
}

/// A growable table of open host files, indexed by small integers that are
/// reused once freed. Slots are `None` once closed so the
/// vector itself never shrinks, keeping indices stable for everything
/// still open.
#[derive(Default)]
pub struct FdTable {
    slots: Vec<Option<File>>,
}

impl FdTable {
    pub fn new() -> FdTable {
        FdTable { slots: Vec::new() }
    }

    /// `Open{name, mode}`: open `path` under `mode` and return the lowest
    /// free descriptor index, reusing a closed slot before growing the
    /// table.
    pub fn open(&mut self, path: &Path, mode: OpenMode) -> Result<i32, ProtocolError> {
        let file = mode
            .open_options()
            .open(path)
            .map_err(|e| ProtocolError::Io(e.to_string()))?;
        if let Some(idx) = self.slots.iter().position(|s| s.is_none()) {
            self.slots[idx] = Some(file);
            return Ok(idx as i32);
        }
        self.slots.push(Some(file));
        Ok((self.slots.len() - 1) as i32)
    }

    /// `ReadAt{fd, len, offset}`: seek then read.
    pub fn read_at(&mut self, fd: i32, len: usize, offset: u64) -> Result<Vec<u8>, ProtocolError> {
        let file = self.get_mut(fd)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| ProtocolError::Io(e.to_string()))?;
        let mut buf = vec![0u8; len];
        let n = file
            .read(&mut buf)
            .map_err(|e| ProtocolError::Io(e.to_string()))?;
        buf.truncate(n);
        Ok(buf)
    }

    /// `Close{fd}`: free the slot so a later `Open` can reuse its index.
    pub fn close(&mut self, fd: i32) -> Result<(), ProtocolError> {
        let slot = self
            .slots
            .get_mut(fd as usize)
            .ok_or(ProtocolError::BadFd(fd))?;
        if slot.take().is_none() {
            return Err(ProtocolError::BadFd(fd));
        }
        Ok(())
    }

    fn get_mut(&mut self, fd: i32) -> Result<&mut File, ProtocolError> {
        self.slots
            .get_mut(fd as usize)
            .and_then(|s| s.as_mut())
            .ok_or(ProtocolError::BadFd(fd))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_file(contents: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "tracehound-fdtable-test-{:?}",
            std::thread::current().id()
        ));
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn open_read_close_round_trip() {
        let path = scratch_file(b"hello world");
        let mut table = FdTable::new();
        let fd = table.open(&path, OpenMode::Read).unwrap();
        let data = table.read_at(fd, 5, 0).unwrap();
        assert_eq!(data, b"hello");
        let data = table.read_at(fd, 5, 6).unwrap();
        assert_eq!(data, b"world");
        table.close(fd).unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn reads_on_closed_fd_fail() {
        let mut table = FdTable::new();
        assert!(matches!(table.close(0), Err(ProtocolError::BadFd(0))));
    }

    #[test]
    fn closed_slot_is_reused() {
        let path = scratch_file(b"x");
        let mut table = FdTable::new();
        let fd1 = table.open(&path, OpenMode::Read).unwrap();
        table.close(fd1).unwrap();
        let fd2 = table.open(&path, OpenMode::Read).unwrap();
        assert_eq!(fd1, fd2);
        table.close(fd2).unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn bad_mode_string_is_rejected() {
        assert!(matches!(OpenMode::parse("x"), Err(ProtocolError::BadMode(_))));
    }
}
