//! Symbol lookup: three operations over DWARF `Subprogram` entries —
//! exact name, regular expression, and PC-to-name. `lookup_regex` reaches
//! for the `regex` crate, the standard way a Rust debugger matches symbol
//! names against a user-supplied pattern.

use regex::Regex;

use crate::dwarf::DwarfInfo;
use crate::error::NotFoundError;
use crate::remote::Address;

/// One `DW_TAG_subprogram` entry's relevant attributes, cached once per
/// binary load so repeated lookups don't re-walk the DWARF unit tree.
#[derive(Clone, Debug)]
pub struct SubprogramEntry {
    pub name: String,
    pub low_pc: Option<Address>,
    /// Set when `DW_AT_low_pc` is present but in a form other than
    /// `Addr` (e.g. a constant-index form), distinct from the attribute
    /// being absent entirely.
    pub low_pc_non_integer: bool,
    pub high_pc: Option<Address>,
}

pub struct SymbolTable {
    entries: Vec<SubprogramEntry>,
}

impl SymbolTable {
    /// Walk every compilation unit's top-level DIEs, collecting
    /// `DW_TAG_subprogram` entries. Entries without a usable name are
    /// skipped outright (nothing can look them up); entries with a name
    /// but no usable `LowPC` are kept so `lookup_exact` can still surface
    /// a precise "no LowPC attribute" error instead of reporting the
    /// symbol as missing entirely.
    pub fn build(dwarf: &DwarfInfo) -> Result<SymbolTable, crate::error::SetupError> {
        let view = dwarf.borrowed();
        let mut entries = Vec::new();
        for header in dwarf.units()? {
            let unit = match view.unit(header) {
                Ok(u) => u,
                Err(_) => continue,
            };
            let mut cursor = unit.entries();
            while let Ok(Some((_, die))) = cursor.next_dfs() {
                if die.tag() != gimli::DW_TAG_subprogram {
                    continue;
                }
                let name = match crate::dwarf::types::name(&view, &unit, die) {
                    Some(n) => n,
                    None => continue,
                };
                let low_pc_attr = die.attr_value(gimli::DW_AT_low_pc).ok().flatten();
                let low_pc = low_pc_attr.as_ref().and_then(|v| match v {
                    gimli::AttributeValue::Addr(a) => Some(Address(*a)),
                    _ => None,
                });
                let low_pc_non_integer = low_pc.is_none() && low_pc_attr.is_some();
                let high_pc = die
                    .attr_value(gimli::DW_AT_high_pc)
                    .ok()
                    .flatten()
                    .and_then(|v| match v {
                        gimli::AttributeValue::Addr(a) => Some(Address(a)),
                        gimli::AttributeValue::Udata(offset) => {
                            low_pc.map(|lo| Address(lo.0 + offset))
                        }
                        _ => None,
                    });
                entries.push(SubprogramEntry {
                    name,
                    low_pc,
                    low_pc_non_integer,
                    high_pc,
                });
            }
        }
        Ok(SymbolTable { entries })
    }

    /// Exact-name lookup, returning the resolved `LowPC` address.
    pub fn lookup_exact(&self, name: &str) -> Result<Address, NotFoundError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| NotFoundError::SymbolNotFound(name.to_string()))?;
        entry.low_pc.ok_or_else(|| {
            if entry.low_pc_non_integer {
                NotFoundError::NonIntegerLowPc(name.to_string())
            } else {
                NotFoundError::NoLowPc(name.to_string())
            }
        })
    }

    /// Regular-expression lookup: every entry whose name matches `pattern`.
    pub fn lookup_regex(&self, pattern: &str) -> Result<Vec<String>, NotFoundError> {
        let re = Regex::new(pattern)
            .map_err(|e| NotFoundError::SymbolNotFound(format!("{} ({})", pattern, e)))?;
        Ok(self
            .entries
            .iter()
            .filter(|e| re.is_match(&e.name))
            .map(|e| e.name.clone())
            .collect())
    }

    /// PC-to-name lookup: the entry whose `[LowPC, HighPC)` range
    /// contains `pc` — the upper bound is exclusive, since `HighPC` marks
    /// the address one past the function's last instruction.
    pub fn lookup_pc(&self, pc: Address) -> Result<&str, NotFoundError> {
        self.entries
            .iter()
            .find(|e| match (e.low_pc, e.high_pc) {
                (Some(lo), Some(hi)) => lo.0 <= pc.0 && pc.0 < hi.0,
                _ => false,
            })
            .map(|e| e.name.as_str())
            .ok_or(NotFoundError::PcNotFound(pc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: Vec<SubprogramEntry>) -> SymbolTable {
        SymbolTable { entries }
    }

    fn entry(name: &str, lo: u64, hi: u64) -> SubprogramEntry {
        SubprogramEntry {
            name: name.to_string(),
            low_pc: Some(Address(lo)),
            low_pc_non_integer: false,
            high_pc: Some(Address(hi)),
        }
    }

    #[test]
    fn exact_lookup_finds_low_pc() {
        let t = table(vec![entry("main.foo", 0x1000, 0x1010)]);
        assert_eq!(t.lookup_exact("main.foo").unwrap(), Address(0x1000));
    }

    #[test]
    fn exact_lookup_missing_symbol_errors() {
        let t = table(vec![]);
        assert!(matches!(
            t.lookup_exact("main.bar"),
            Err(NotFoundError::SymbolNotFound(_))
        ));
    }

    #[test]
    fn missing_low_pc_is_reported_distinctly() {
        let t = table(vec![SubprogramEntry {
            name: "main.baz".to_string(),
            low_pc: None,
            low_pc_non_integer: false,
            high_pc: None,
        }]);
        assert!(matches!(
            t.lookup_exact("main.baz"),
            Err(NotFoundError::NoLowPc(_))
        ));
    }

    #[test]
    fn non_integer_low_pc_is_reported_distinctly() {
        let t = table(vec![SubprogramEntry {
            name: "main.qux".to_string(),
            low_pc: None,
            low_pc_non_integer: true,
            high_pc: None,
        }]);
        assert!(matches!(
            t.lookup_exact("main.qux"),
            Err(NotFoundError::NonIntegerLowPc(_))
        ));
    }

    #[test]
    fn regex_lookup_matches_multiple() {
        let t = table(vec![
            entry("main.foo", 0x1000, 0x1010),
            entry("main.foobar", 0x2000, 0x2010),
            entry("main.baz", 0x3000, 0x3010),
        ]);
        let mut names = t.lookup_regex("^main.foo").unwrap();
        names.sort();
        assert_eq!(names, vec!["main.foo", "main.foobar"]);
    }

    #[test]
    fn pc_lookup_respects_half_open_range() {
        let t = table(vec![entry("main.foo", 0x1000, 0x1010)]);
        assert_eq!(t.lookup_pc(Address(0x1000)).unwrap(), "main.foo");
        assert_eq!(t.lookup_pc(Address(0x100f)).unwrap(), "main.foo");
        assert!(t.lookup_pc(Address(0x1010)).is_err());
    }
}
