//! Type-shape resolution. `gimli` hands back untyped DIEs; this module
//! walks one DIE plus its `DW_AT_type` chain into a tagged shape the
//! printer can dispatch on field-by-field, before the printer ever sees
//! a value.
//!
//! Go's compiler does not emit distinct DWARF tags for slice/string/map/
//! chan/interface; they are ordinary `DW_TAG_structure_type` DIEs with a
//! recognizable field layout and name convention (`[]T`, `map[K]V`,
//! `chan T`, `string`, `runtime.iface`). Recognizing them is therefore a
//! name-pattern classification over the generic Struct case, applied
//! after the generic struct fields have already been read.

use gimli::{DebuggingInformationEntry, Unit};

use crate::arch::Architecture;
use crate::dwarf::Reader;
use crate::error::PrintError;

#[derive(Clone, Debug, PartialEq)]
pub enum StructKind {
    Struct,
    Class,
    Union,
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: String,
    pub offset: u64,
    pub type_offset: gimli::UnitOffset,
}

#[derive(Clone, Debug)]
pub enum TypeShape {
    Bool {
        size: u64,
    },
    Int {
        size: u64,
    },
    Uint {
        size: u64,
    },
    Float {
        size: u64,
    },
    Complex {
        size: u64,
    },
    Pointer {
        elem: Option<gimli::UnitOffset>,
    },
    Array {
        // DWARF array DIEs are usually named by the Go compiler with the
        // full composite type string (e.g. "[5]int32"); `None` only for
        // the rare anonymous case, in which the printer synthesizes one.
        name: Option<String>,
        elem: gimli::UnitOffset,
        count: u64,
        stride: u64,
    },
    Struct {
        name: String,
        fields: Vec<Field>,
        kind: StructKind,
    },
    Slice {
        name: String,
        elem: gimli::UnitOffset,
        // offsets of the {data, len, cap} fields within the slice header
        data_offset: u64,
        len_offset: u64,
    },
    // "header-fields": {data pointer, length}.
    GoString {
        data_offset: u64,
        len_offset: u64,
    },
    Map {
        name: String,
        pointer_to_struct: gimli::UnitOffset,
    },
    Typedef {
        name: String,
        underlying: gimli::UnitOffset,
    },
    Func,
    Chan,
    Interface,
}

impl TypeShape {
    /// Sizeof helper : the DWARF byte size when known,
    /// otherwise the architecture's pointer width for pointer-shaped
    /// types, otherwise "unknown" — recorded by the printer as a sticky
    /// error rather than guessed at.
    pub fn sizeof(&self, arch: &Architecture, explicit_size: Option<u64>) -> Result<u64, PrintError> {
        if let Some(size) = explicit_size {
            return Ok(size);
        }
        match self {
            TypeShape::Pointer { .. } | TypeShape::Map { .. } => Ok(arch.ptr_width as u64),
            _ => Err(PrintError::UnknownSize),
        }
    }
}

/// Read `DW_AT_byte_size` off a DIE, if present and an integer form.
pub fn byte_size<'a>(die: &DebuggingInformationEntry<'a, '_, Reader<'a>>) -> Option<u64> {
    die.attr_value(gimli::DW_AT_byte_size)
        .ok()
        .flatten()
        .and_then(|v| v.udata_value())
}

/// Read `DW_AT_name` as an owned `String`, resolving both inline strings
/// and `.debug_str`/`.debug_line_str` references via the full `Dwarf`
/// handle (`gimli::Dwarf::attr_string` needs it; a bare `Unit` can't
/// resolve an offset on its own). DWARF names are ASCII in practice for
/// Go binaries; a non-UTF8 name degrades to a lossy conversion rather
/// than failing the whole type walk over one symbol.
pub fn name<'a>(
    dwarf: &gimli::Dwarf<Reader<'a>>,
    unit: &Unit<Reader<'a>>,
    die: &DebuggingInformationEntry<'_, '_, Reader<'a>>,
) -> Option<String> {
    let attr = die.attr_value(gimli::DW_AT_name).ok().flatten()?;
    let reader = dwarf.attr_string(unit, attr).ok()?;
    reader.to_string().ok().map(|s| s.into_owned())
}

/// Classify a struct DIE's *already-resolved* name and fields into one of
/// the recognized Go-runtime shapes (slice, string, map), or leave it as a
/// plain aggregate. Applied after generic struct-field resolution so the
/// classifier only has to pattern-match, never re-walk DWARF itself.
pub fn classify_struct(type_name: &str, fields: &[Field]) -> Option<TypeShape> {
    if type_name.starts_with("[]") {
        let data = fields.iter().find(|f| f.name == "array" || f.name == "data")?;
        let len = fields.iter().find(|f| f.name == "len")?;
        return Some(TypeShape::Slice {
            name: type_name.to_string(),
            elem: data.type_offset,
            data_offset: data.offset,
            len_offset: len.offset,
        });
    }
    if type_name == "string" {
        let data = fields.iter().find(|f| f.name == "str" || f.name == "data")?;
        let len = fields.iter().find(|f| f.name == "len")?;
        return Some(TypeShape::GoString {
            data_offset: data.offset,
            len_offset: len.offset,
        });
    }
    if type_name.starts_with("map[") {
        let inner = fields.iter().find(|f| f.name.is_empty() || f.name == "hmap")?;
        return Some(TypeShape::Map {
            name: type_name.to_string(),
            pointer_to_struct: inner.type_offset,
        });
    }
    if type_name.starts_with("chan ") || type_name == "chan" {
        return Some(TypeShape::Chan);
    }
    if type_name.starts_with("runtime.iface") || type_name.starts_with("interface {") {
        return Some(TypeShape::Interface);
    }
    None
}

/// `DW_AT_encoding` dispatch for `DW_TAG_base_type`
/// Bool/Int/Uint/Float/Complex variants.
pub fn base_type_shape(encoding: gimli::DwAte, size: u64) -> Option<TypeShape> {
    use gimli::constants::*;
    match encoding {
        DW_ATE_boolean => Some(TypeShape::Bool { size }),
        DW_ATE_signed | DW_ATE_signed_char => Some(TypeShape::Int { size }),
        DW_ATE_unsigned | DW_ATE_unsigned_char => Some(TypeShape::Uint { size }),
        DW_ATE_float => Some(TypeShape::Float { size }),
        DW_ATE_complex_float => Some(TypeShape::Complex { size }),
        _ => None,
    }
}

/// Follow a DIE's `DW_AT_type` attribute to the `UnitOffset` it refers to.
/// `None` covers both "no such attribute" (e.g. `void` pointers) and forms
/// this crate doesn't resolve cross-unit (`DW_FORM_ref_addr`), which is a
/// known limitation: every type this crate walks is assumed to live in the
/// same compilation unit as its user, true for every Go-compiler-emitted
/// binary this crate targets.
pub fn type_attr_offset<'a>(
    die: &DebuggingInformationEntry<'a, '_, Reader<'a>>,
) -> Option<gimli::UnitOffset> {
    match die.attr_value(gimli::DW_AT_type).ok().flatten()? {
        gimli::AttributeValue::UnitRef(offset) => Some(offset),
        _ => None,
    }
}

/// Walk the `DW_TAG_member` children of a struct/class/union DIE into our
/// owned `Field` list. Field order follows DWARF emission order
/// (declaration order), which the struct printer iterates in directly.
fn collect_members<'a>(
    dwarf: &gimli::Dwarf<Reader<'a>>,
    unit: &Unit<Reader<'a>>,
    offset: gimli::UnitOffset,
) -> Result<Vec<Field>, PrintError> {
    let mut tree = unit
        .entries_tree(Some(offset))
        .map_err(|e| PrintError::UnimplementedType(e.to_string()))?;
    let root = tree
        .root()
        .map_err(|e| PrintError::UnimplementedType(e.to_string()))?;
    let mut fields = Vec::new();
    let mut children = root.children();
    while let Some(child) = children
        .next()
        .map_err(|e| PrintError::UnimplementedType(e.to_string()))?
    {
        let die = child.entry();
        if die.tag() != gimli::DW_TAG_member {
            continue;
        }
        let field_name = name(dwarf, unit, die).unwrap_or_default();
        let field_offset = die
            .attr_value(gimli::DW_AT_data_member_location)
            .ok()
            .flatten()
            .and_then(|v| v.udata_value())
            .unwrap_or(0);
        let type_offset = match type_attr_offset(die) {
            Some(o) => o,
            None => continue,
        };
        fields.push(Field {
            name: field_name,
            offset: field_offset,
            type_offset,
        });
    }
    Ok(fields)
}

/// Read an array DIE's `DW_TAG_subrange_type` child for its element count.
/// Prefers `DW_AT_count` (a direct element count) over `DW_AT_upper_bound`
/// (an inclusive bound, so `count = upper_bound + 1`); an array DIE with
/// neither (an unbounded/incomplete array type) has count 0.
fn array_count<'a>(
    unit: &Unit<Reader<'a>>,
    offset: gimli::UnitOffset,
) -> Result<u64, PrintError> {
    let mut tree = unit
        .entries_tree(Some(offset))
        .map_err(|e| PrintError::UnimplementedType(e.to_string()))?;
    let root = tree
        .root()
        .map_err(|e| PrintError::UnimplementedType(e.to_string()))?;
    let mut children = root.children();
    while let Some(child) = children
        .next()
        .map_err(|e| PrintError::UnimplementedType(e.to_string()))?
    {
        let die = child.entry();
        if die.tag() != gimli::DW_TAG_subrange_type {
            continue;
        }
        if let Some(count) = die
            .attr_value(gimli::DW_AT_count)
            .ok()
            .flatten()
            .and_then(|v| v.udata_value())
        {
            return Ok(count);
        }
        if let Some(upper) = die
            .attr_value(gimli::DW_AT_upper_bound)
            .ok()
            .flatten()
            .and_then(|v| v.udata_value())
        {
            return Ok(upper + 1);
        }
    }
    Ok(0)
}

/// Resolve the DIE at `offset` into a `TypeShape`, the entry point the
/// printer calls for every `DW_AT_type` chain it walks. Go emits
/// slice/string/map/chan/interface as ordinary `DW_TAG_structure_type`
/// DIEs (see module docs); `classify_struct` is tried for both structure
/// DIEs directly and for typedefs whose own name matches one of those
/// patterns, since Go commonly wraps the anonymous runtime struct
/// (`runtime.hchan`, `internal/abi.SwissMapType`, ...) in a named typedef
/// rather than naming the struct itself. When a typedef's underlying DIE
/// is *not* a plain struct (e.g. `chan T`, which the compiler may emit as
/// a bare pointer typedef), the typedef's own name is still enough to
/// classify it as `Chan`/`Interface` without needing to resolve the
/// underlying shape at all.
pub fn resolve_type<'a>(
    dwarf: &gimli::Dwarf<Reader<'a>>,
    unit: &Unit<Reader<'a>>,
    offset: gimli::UnitOffset,
) -> Result<TypeShape, PrintError> {
    let mut tree = unit
        .entries_tree(Some(offset))
        .map_err(|e| PrintError::UnimplementedType(e.to_string()))?;
    let root = tree
        .root()
        .map_err(|e| PrintError::UnimplementedType(e.to_string()))?;
    let die = root.entry();

    match die.tag() {
        gimli::DW_TAG_base_type => {
            let size = byte_size(die).ok_or(PrintError::UnknownSize)?;
            let encoding = die
                .attr_value(gimli::DW_AT_encoding)
                .ok()
                .flatten()
                .and_then(|v| match v {
                    gimli::AttributeValue::Encoding(e) => Some(e),
                    _ => None,
                })
                .ok_or(PrintError::UnknownSize)?;
            base_type_shape(encoding, size)
                .ok_or_else(|| PrintError::UnimplementedType(format!("DW_ATE {:?}", encoding)))
        }
        gimli::DW_TAG_pointer_type => Ok(TypeShape::Pointer {
            elem: type_attr_offset(die),
        }),
        gimli::DW_TAG_array_type => {
            let elem = type_attr_offset(die).ok_or(PrintError::UnknownSize)?;
            let count = array_count(unit, offset)?;
            let stride = die
                .attr_value(gimli::DW_AT_byte_stride)
                .ok()
                .flatten()
                .and_then(|v| v.udata_value())
                .unwrap_or(0);
            Ok(TypeShape::Array {
                name: name(dwarf, unit, die),
                elem,
                count,
                stride,
            })
        }
        tag @ (gimli::DW_TAG_structure_type | gimli::DW_TAG_class_type | gimli::DW_TAG_union_type) => {
            let kind = match tag {
                gimli::DW_TAG_structure_type => StructKind::Struct,
                gimli::DW_TAG_class_type => StructKind::Class,
                _ => StructKind::Union,
            };
            let type_name = name(dwarf, unit, die).unwrap_or_default();
            let fields = collect_members(dwarf, unit, offset)?;
            if let Some(shape) = classify_struct(&type_name, &fields) {
                return Ok(shape);
            }
            Ok(TypeShape::Struct {
                name: type_name,
                fields,
                kind,
            })
        }
        gimli::DW_TAG_typedef => {
            let type_name = name(dwarf, unit, die).unwrap_or_default();
            let underlying = type_attr_offset(die).ok_or(PrintError::UnknownSize)?;
            if type_name.starts_with("chan ") || type_name == "chan" {
                return Ok(TypeShape::Chan);
            }
            if type_name.starts_with("runtime.iface") || type_name.starts_with("interface {") {
                return Ok(TypeShape::Interface);
            }
            if type_name.starts_with("map[") {
                // The typedef's underlying type is the pointer-to-hmap shape
                // itself; classify_struct expects a field list, which a
                // typedef doesn't have, so we hand it a synthetic single
                // field pointing straight at `underlying`.
                return Ok(TypeShape::Map {
                    name: type_name,
                    pointer_to_struct: underlying,
                });
            }
            Ok(TypeShape::Typedef {
                name: type_name,
                underlying,
            })
        }
        gimli::DW_TAG_subroutine_type => Ok(TypeShape::Func),
        gimli::DW_TAG_const_type | gimli::DW_TAG_volatile_type => {
            type_attr_offset(die)
                .map(|inner| resolve_type(dwarf, unit, inner))
                .unwrap_or(Ok(TypeShape::Typedef {
                    name: "void".to_string(),
                    underlying: offset,
                }))
        }
        other => Err(PrintError::UnimplementedType(format!("{}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, offset: u64) -> Field {
        Field {
            name: name.to_string(),
            offset,
            type_offset: gimli::UnitOffset(0),
        }
    }

    #[test]
    fn classifies_slice_by_name_and_fields() {
        let fields = vec![field("array", 0), field("len", 8), field("cap", 16)];
        match classify_struct("[]uint8", &fields) {
            Some(TypeShape::Slice { data_offset, len_offset, .. }) => {
                assert_eq!(data_offset, 0);
                assert_eq!(len_offset, 8);
            }
            other => panic!("expected Slice, got {:?}", other),
        }
    }

    #[test]
    fn classifies_go_string() {
        let fields = vec![field("str", 0), field("len", 8)];
        match classify_struct("string", &fields) {
            Some(TypeShape::GoString { data_offset, len_offset }) => {
                assert_eq!(data_offset, 0);
                assert_eq!(len_offset, 8);
            }
            other => panic!("expected GoString, got {:?}", other),
        }
    }

    #[test]
    fn plain_struct_is_not_classified() {
        let fields = vec![field("a", 0), field("b", 8)];
        assert!(classify_struct("main.FooStruct", &fields).is_none());
    }

    #[test]
    fn sizeof_prefers_explicit_size() {
        let shape = TypeShape::Int { size: 8 };
        let arch = Architecture::for_kind(crate::arch::ArchKind::Amd64);
        assert_eq!(shape.sizeof(arch, Some(8)).unwrap(), 8);
    }

    #[test]
    fn sizeof_pointer_falls_back_to_arch_width() {
        let shape = TypeShape::Pointer { elem: None };
        let arch = Architecture::for_kind(crate::arch::ArchKind::Amd64);
        assert_eq!(shape.sizeof(arch, None).unwrap(), 8);
    }
}
