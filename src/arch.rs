//! Architecture description table. A fixed, static table of byte order,
//! width, and breakpoint-instruction facts per target, in the same shape
//! as a kernel ABI table: no I/O, no runtime failure except an assertion
//! on a caller passing the wrong-width buffer (a programmer error, not a
//! recoverable one).

use std::fmt;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ArchKind {
    Amd64,
    X86,
    Arm,
}

impl fmt::Display for ArchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArchKind::Amd64 => "amd64",
            ArchKind::X86 => "x86",
            ArchKind::Arm => "arm",
        };
        write!(f, "{}", s)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Immutable per-target facts.
#[derive(Copy, Clone, Debug)]
pub struct Architecture {
    pub kind: ArchKind,
    /// INT3 on amd64/x86 is one byte; arm's entry is a placeholder four-byte
    /// sequence since the real trap encoding (`udf #0` vs. the Thumb `bkpt`
    /// form) isn't pinned down for this target yet.
    pub breakpoint_insn: &'static [u8],
    pub int_width: usize,
    pub ptr_width: usize,
    pub byte_order: ByteOrder,
}

impl Architecture {
    /// Size, in bytes, of the breakpoint instruction for this arch. Used
    /// by the breakpoint manager's PC-adjustment rule.
    pub fn breakpoint_size(&self) -> usize {
        self.breakpoint_insn.len()
    }

    pub fn for_kind(kind: ArchKind) -> &'static Architecture {
        match kind {
            ArchKind::Amd64 => &AMD64,
            ArchKind::X86 => &X86,
            ArchKind::Arm => &ARM,
        }
    }

    /// Decode `buf` as an unsigned integer of `self.int_width` bytes under
    /// this architecture's byte order. Panics if `buf.len() != self.int_width`:
    /// callers are expected to slice exactly `int_width` bytes first.
    pub fn decode_uint(&self, buf: &[u8]) -> u64 {
        self.decode_width(buf, self.int_width)
    }

    pub fn decode_int(&self, buf: &[u8]) -> i64 {
        sign_extend(self.decode_uint(buf), buf.len())
    }

    /// Decode `buf` as an unsigned pointer-width value.
    pub fn decode_ptr(&self, buf: &[u8]) -> u64 {
        self.decode_width(buf, self.ptr_width)
    }

    fn decode_width(&self, buf: &[u8], width: usize) -> u64 {
        assert_eq!(
            buf.len(),
            width,
            "decode called with a buffer of the wrong width for {}",
            self.kind
        );
        let mut bytes = [0u8; 8];
        match self.byte_order {
            ByteOrder::Little => bytes[..width].copy_from_slice(buf),
            ByteOrder::Big => bytes[8 - width..].copy_from_slice(buf),
        }
        match self.byte_order {
            ByteOrder::Little => u64::from_le_bytes(bytes),
            ByteOrder::Big => u64::from_be_bytes(bytes),
        }
    }

    /// Decode a value of arbitrary declared `width` (1, 2, 4 or 8 bytes),
    /// used by the printer for sized Int/Uint DWARF types which need not
    /// match the architecture's native int width.
    pub fn decode_sized_uint(&self, buf: &[u8]) -> u64 {
        self.decode_width(buf, buf.len())
    }

    /// Signed counterpart of `decode_sized_uint`, for DWARF `Int` values
    /// whose byte size need not match this architecture's native
    /// `int_width` (the printer sees 1/2/4/8-byte signed fields).
    pub fn decode_sized_int(&self, buf: &[u8]) -> i64 {
        sign_extend(self.decode_sized_uint(buf), buf.len())
    }

    pub fn encode_uint(&self, val: u64, width: usize) -> Vec<u8> {
        let full = match self.byte_order {
            ByteOrder::Little => val.to_le_bytes(),
            ByteOrder::Big => val.to_be_bytes(),
        };
        match self.byte_order {
            ByteOrder::Little => full[..width].to_vec(),
            ByteOrder::Big => full[8 - width..].to_vec(),
        }
    }
}

fn sign_extend(val: u64, width: usize) -> i64 {
    if width >= 8 {
        return val as i64;
    }
    let shift = 64 - width * 8;
    ((val << shift) as i64) >> shift
}

lazy_static::lazy_static! {
    static ref AMD64: Architecture = Architecture {
        kind: ArchKind::Amd64,
        breakpoint_insn: &[0xCC],
        int_width: 8,
        ptr_width: 8,
        byte_order: ByteOrder::Little,
    };
    static ref X86: Architecture = Architecture {
        kind: ArchKind::X86,
        breakpoint_insn: &[0xCC],
        int_width: 4,
        ptr_width: 4,
        byte_order: ByteOrder::Little,
    };
    static ref ARM: Architecture = Architecture {
        kind: ArchKind::Arm,
        // Placeholder: arm's real trap encoding (udf #0 vs. the Thumb
        // bkpt form) is a known open item.
        breakpoint_insn: &[0x00, 0x00, 0x00, 0xE7],
        int_width: 4,
        ptr_width: 4,
        byte_order: ByteOrder::Little,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amd64_round_trip() {
        let arch = Architecture::for_kind(ArchKind::Amd64);
        for x in [0u64, 1, 255, 256, u64::MAX, 0x1122_3344_5566_7788] {
            let enc = arch.encode_uint(x, 8);
            assert_eq!(arch.decode_uint(&enc), x);
        }
    }

    #[test]
    fn signed_decode() {
        let arch = Architecture::for_kind(ArchKind::Amd64);
        let enc = arch.encode_uint((-1i64) as u64, 4);
        assert_eq!(arch.decode_sized_uint(&enc) as i32 as i64, -1);
    }

    #[test]
    #[should_panic]
    fn wrong_width_panics() {
        let arch = Architecture::for_kind(ArchKind::Amd64);
        arch.decode_uint(&[0u8; 4]);
    }

    #[test]
    fn breakpoint_bytes_present_for_every_kind() {
        for kind in [ArchKind::Amd64, ArchKind::X86, ArchKind::Arm] {
            let arch = Architecture::for_kind(kind);
            assert!(arch.breakpoint_size() >= 1);
            assert!(arch.breakpoint_size() <= 4);
        }
    }
}
