//! Binary loader. Tries container formats in order — ELF, Mach-O, PE —
//! handing whichever one recognizes the file its raw section bytes, both
//! the Go-runtime symbol/line tables and the standard DWARF sections
//! `gimli` expects.
//!
//! Grounded on `goblin::Object::parse`'s dispatch-by-magic-bytes pattern,
//! the same one every `goblin`-based loader in the ecosystem uses.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use gimli::RunTimeEndian;
use goblin::Object;

use crate::dwarf::DwarfInfo;
use crate::error::SetupError;
use crate::remote::Address;

const DWARF_SECTION_NAMES: &[&str] = &[
    "debug_info",
    "debug_abbrev",
    "debug_str",
    "debug_line",
    "debug_ranges",
    "debug_line_str",
    "debug_str_offsets",
    "debug_addr",
    "debug_rnglists",
];

/// Everything the rest of the crate needs out of an on-disk executable:
/// where its code starts, its (possibly empty) Go runtime tables, and a
/// DWARF reader over whatever debug sections it carries.
pub struct LoadedBinary {
    pub text_start: Address,
    pub symbols: Vec<u8>,
    pub line_table: Vec<u8>,
    pub dwarf: DwarfInfo,
}

struct RawSections {
    text_start: u64,
    endian: RunTimeEndian,
    /// Keyed by the *canonical* (ELF-style, no container prefix) name:
    /// "text", "gosymtab", "gopclntab", and each DWARF section without
    /// its leading dot.
    by_name: HashMap<String, Vec<u8>>,
}

/// Load and parse `path`, trying ELF, then Mach-O, then PE — the first
/// format that recognizes the file's magic bytes wins
/// Missing optional sections (Go symbol/line tables, any DWARF section)
/// are empty tables rather than errors; a wholly unrecognized container
/// is the one failure case this function reports directly.
pub fn load(path: &Path) -> Result<LoadedBinary, SetupError> {
    if !path.exists() {
        return Err(SetupError::BinaryNotFound(path.to_path_buf()));
    }
    let buffer = fs::read(path)?;
    let object = Object::parse(&buffer).map_err(|e| SetupError::FormatSpecific {
        format: "container",
        detail: e.to_string(),
    })?;

    let raw = match object {
        Object::Elf(elf) => load_elf(&elf, &buffer)?,
        Object::Mach(goblin::mach::Mach::Binary(macho)) => load_macho(&macho, &buffer)?,
        Object::Mach(goblin::mach::Mach::Fat(fat)) => {
            let arch = fat
                .get(0)
                .map_err(|e| SetupError::FormatSpecific {
                    format: "mach-o (fat)",
                    detail: e.to_string(),
                })?;
            match arch {
                goblin::mach::SingleArch::MachO(macho) => load_macho(&macho, &buffer)?,
                goblin::mach::SingleArch::Archive(_) => {
                    return Err(SetupError::FormatSpecific {
                        format: "mach-o (fat)",
                        detail: "fat archive member, not a Mach-O image".into(),
                    })
                }
            }
        }
        Object::PE(pe) => load_pe(&pe, &buffer)?,
        _ => return Err(SetupError::UnrecognizedFormat),
    };

    let dwarf = DwarfInfo::load(&raw.by_name, raw.endian)?;
    let symbols = raw.by_name.get("gosymtab").cloned().unwrap_or_default();
    let line_table = raw.by_name.get("gopclntab").cloned().unwrap_or_default();

    Ok(LoadedBinary {
        text_start: Address(raw.text_start),
        symbols,
        line_table,
        dwarf,
    })
}

fn section_bytes(buffer: &[u8], offset: usize, size: usize) -> Vec<u8> {
    let end = (offset + size).min(buffer.len());
    let start = offset.min(end);
    buffer[start..end].to_vec()
}

fn load_elf(elf: &goblin::elf::Elf, buffer: &[u8]) -> Result<RawSections, SetupError> {
    let endian = if elf.little_endian {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };
    let mut by_name = HashMap::new();
    let mut text_start = 0u64;

    for sh in &elf.section_headers {
        let raw_name = elf
            .shdr_strtab
            .get_at(sh.sh_name)
            .unwrap_or("")
            .to_string();
        let bytes = section_bytes(buffer, sh.sh_offset as usize, sh.sh_size as usize);
        match raw_name.as_str() {
            ".text" => {
                text_start = sh.sh_addr;
                by_name.insert("text".to_string(), bytes);
            }
            ".gosymtab" => {
                by_name.insert("gosymtab".to_string(), bytes);
            }
            ".gopclntab" => {
                by_name.insert("gopclntab".to_string(), bytes);
            }
            other if other.starts_with(".debug_") => {
                by_name.insert(other.trim_start_matches('.').to_string(), bytes);
            }
            _ => {}
        }
    }
    Ok(RawSections {
        text_start,
        endian,
        by_name,
    })
}

fn load_macho(macho: &goblin::mach::MachO, buffer: &[u8]) -> Result<RawSections, SetupError> {
    let endian = if macho.little_endian {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };
    let mut by_name = HashMap::new();
    let mut text_start = 0u64;

    for segment in &macho.segments {
        let sections = segment.sections().map_err(|e| SetupError::FormatSpecific {
            format: "mach-o",
            detail: e.to_string(),
        })?;
        for (section, _) in sections {
            let name = section.name().unwrap_or("").to_string();
            let bytes = section_bytes(buffer, section.offset as usize, section.size as usize);
            match name.as_str() {
                "__text" => {
                    text_start = section.addr;
                    by_name.insert("text".to_string(), bytes);
                }
                "__gosymtab" => {
                    by_name.insert("gosymtab".to_string(), bytes);
                }
                "__gopclntab" => {
                    by_name.insert("gopclntab".to_string(), bytes);
                }
                other if other.starts_with("__debug_") => {
                    by_name.insert(other.trim_start_matches("__").to_string(), bytes);
                }
                _ => {}
            }
        }
    }
    Ok(RawSections {
        text_start,
        endian,
        by_name,
    })
}

fn load_pe(pe: &goblin::pe::PE, buffer: &[u8]) -> Result<RawSections, SetupError> {
    // PE has no native endianness field here: every Windows target this
    // crate could plausibly meet (x86/amd64/arm) is little-endian, and
    // this crate's scope is Linux/amd64 regardless, so this exists only to
    // let PE binaries load without erroring, not to be run against.
    let endian = RunTimeEndian::Little;
    let mut by_name = HashMap::new();
    let mut text_start = 0u64;
    let image_base = pe.image_base as u64;

    for section in &pe.sections {
        let name = section.name().unwrap_or("").to_string();
        let offset = section.pointer_to_raw_data as usize;
        let size = section.size_of_raw_data as usize;
        let bytes = section_bytes(buffer, offset, size);
        let addr = image_base + section.virtual_address as u64;
        match name.as_str() {
            ".text" => {
                text_start = addr;
                by_name.insert("text".to_string(), bytes);
            }
            ".gosymtab" => {
                by_name.insert("gosymtab".to_string(), bytes);
            }
            ".gopclntab" => {
                by_name.insert("gopclntab".to_string(), bytes);
            }
            other if other.starts_with(".debug_") => {
                by_name.insert(other.trim_start_matches('.').to_string(), bytes);
            }
            _ => {}
        }
    }
    Ok(RawSections {
        text_start,
        endian,
        by_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reports_binary_not_found() {
        let result = load(Path::new("/nonexistent/path/to/nothing"));
        assert!(matches!(result, Err(SetupError::BinaryNotFound(_))));
    }

    #[test]
    fn unrecognized_bytes_report_unrecognized_format() {
        // A file that exists but isn't any known container magic.
        let dir = std::env::temp_dir().join("tracehound-loader-test-not-a-binary");
        fs::write(&dir, b"not an executable").unwrap();
        let result = load(&dir);
        let _ = fs::remove_file(&dir);
        assert!(matches!(
            result,
            Err(SetupError::UnrecognizedFormat) | Err(SetupError::FormatSpecific { .. })
        ));
    }
}
