//! Hand-rolled walkers for the directory tables `pe-parser` stops short
//! of iterating: base relocations, imports, and exports.
//!
//! `pe-parser` 0.7 parses the COFF header, the PE32+ optional header
//! (including the raw `DataDirectories`) and the section table, but does
//! not itself follow those directories' RVAs into structured entries.
//! `original_source/windows_library.cpp` leans on `pe-parse`'s
//! `IterRelocs`/`IterImpVAString`/`IterExpVA` for exactly this; here we
//! read the same on-disk layouts that `th0rex-pe_load::structs` models
//! (`ImageBaseRelocation`, `ImportDescriptor`, `ThunkData`) directly out
//! of the file buffer.

use pe_parser::section::section_header;

use crate::error::ParseError;

const IMAGE_REL_BASED_ABSOLUTE: u16 = 0;
/// A 32-bit VA relocation; valid in PE32 images, never expected in a
/// PE32+ image. Classified distinctly from [`Relocation::Unsupported`]
/// so callers can report a more specific reason, but still fatal: see
/// `loader::apply_relocation`.
pub const IMAGE_REL_BASED_HIGHLOW: u16 = 3;
const IMAGE_REL_BASED_DIR64: u16 = 10;

const IMAGE_ORDINAL_FLAG64: u64 = 0x8000_0000_0000_0000;

/// A single base relocation entry, already split into type + target RVA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relocation {
    /// Padding entry; no bytes to patch.
    Absolute { rva: u32 },
    /// Add the load delta's low 32 bits to the 32-bit value at `rva`.
    HighLow { rva: u32 },
    /// Add the full load delta to the 64-bit value at `rva`.
    Dir64 { rva: u32 },
    /// A relocation type this loader does not implement.
    Unsupported { rva: u32, kind: u16 },
}

impl Relocation {
    /// RVA of the memory location this relocation patches.
    pub fn rva(&self) -> u32 {
        match *self {
            Relocation::Absolute { rva }
            | Relocation::HighLow { rva }
            | Relocation::Dir64 { rva }
            | Relocation::Unsupported { rva, .. } => rva,
        }
    }
}

/// Which symbol an import thunk names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSymbol {
    /// Imported by name (the common case).
    Name(String),
    /// Imported by ordinal only; the shim registry is still consulted by
    /// `(module, ordinal-as-string)` but this loader does not attempt to
    /// recover a real name for it.
    Ordinal(u16),
}

/// A single import slot: the RVA of the IAT entry to overwrite, and the
/// module/symbol it should resolve to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Name of the DLL this import is satisfied from.
    pub module: String,
    /// Symbol within that module.
    pub symbol: ImportSymbol,
    /// RVA of the IAT slot (inside `FirstThunk`) to overwrite at bind time.
    pub slot_rva: u32,
}

/// A single exported symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    /// Exported name.
    pub name: String,
    /// RVA of the exported function.
    pub rva: u32,
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    buf.get(offset..offset + 2)
        .map(|s| u16::from_le_bytes(s.try_into().unwrap()))
}

fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset + 4)
        .map(|s| u32::from_le_bytes(s.try_into().unwrap()))
}

fn read_u64(buf: &[u8], offset: usize) -> Option<u64> {
    buf.get(offset..offset + 8)
        .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
}

fn read_cstr(buf: &[u8], offset: usize) -> Option<String> {
    let slice = buf.get(offset..)?;
    let end = slice.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&slice[..end]).into_owned())
}

/// Translate an RVA to a file offset using the section table, the same
/// lookup `th0rex-pe_load::rva::RVA::resolve` performs against a mapped
/// image, here performed against the on-disk buffer instead.
pub fn rva_to_file_offset(rva: u32, sections: &[section_header]) -> Option<usize> {
    for section in sections {
        let span = section.virtual_size.max(section.size_of_raw_data);
        if rva >= section.virtual_address && rva < section.virtual_address + span {
            let delta = rva - section.virtual_address;
            return Some(section.pointer_to_raw_data as usize + delta as usize);
        }
    }
    None
}

/// Walk the base relocation directory.
pub fn iter_relocations(
    buffer: &[u8],
    sections: &[section_header],
    directory_rva: u32,
    directory_size: u32,
) -> Result<Vec<Relocation>, ParseError> {
    if directory_rva == 0 || directory_size == 0 {
        return Ok(Vec::new());
    }

    let mut start = rva_to_file_offset(directory_rva, sections)
        .ok_or(ParseError::DirectoryOutOfRange("base relocation table"))?;
    let end = start + directory_size as usize;

    let mut out = Vec::new();
    while start < end {
        let page_rva =
            read_u32(buffer, start).ok_or(ParseError::DirectoryOutOfRange("relocation block"))?;
        let block_size = read_u32(buffer, start + 4)
            .ok_or(ParseError::DirectoryOutOfRange("relocation block"))?;

        if block_size < 8 {
            break;
        }

        let entry_count = (block_size as usize - 8) / 2;
        for i in 0..entry_count {
            let entry = read_u16(buffer, start + 8 + i * 2)
                .ok_or(ParseError::DirectoryOutOfRange("relocation entry"))?;
            let kind = entry >> 12;
            let offset = entry & 0x0FFF;
            let rva = page_rva + offset as u32;

            out.push(match kind {
                IMAGE_REL_BASED_ABSOLUTE => Relocation::Absolute { rva },
                IMAGE_REL_BASED_HIGHLOW => Relocation::HighLow { rva },
                IMAGE_REL_BASED_DIR64 => Relocation::Dir64 { rva },
                other => Relocation::Unsupported { rva, kind: other },
            });
        }

        start += block_size as usize;
    }

    Ok(out)
}

/// Walk the import descriptor table and every thunk beneath it.
pub fn iter_imports(
    buffer: &[u8],
    sections: &[section_header],
    directory_rva: u32,
    directory_size: u32,
) -> Result<Vec<Import>, ParseError> {
    if directory_rva == 0 || directory_size == 0 {
        return Ok(Vec::new());
    }

    let mut descriptor_offset = rva_to_file_offset(directory_rva, sections)
        .ok_or(ParseError::DirectoryOutOfRange("import descriptor table"))?;

    let mut out = Vec::new();
    const DESCRIPTOR_SIZE: usize = 20;

    loop {
        let original_first_thunk = read_u32(buffer, descriptor_offset)
            .ok_or(ParseError::DirectoryOutOfRange("import descriptor"))?;
        let name_rva = read_u32(buffer, descriptor_offset + 12)
            .ok_or(ParseError::DirectoryOutOfRange("import descriptor"))?;
        let first_thunk = read_u32(buffer, descriptor_offset + 16)
            .ok_or(ParseError::DirectoryOutOfRange("import descriptor"))?;

        if original_first_thunk == 0 && name_rva == 0 && first_thunk == 0 {
            break;
        }

        let module = rva_to_file_offset(name_rva, sections)
            .and_then(|off| read_cstr(buffer, off))
            .ok_or(ParseError::DirectoryOutOfRange("import module name"))?;

        // Prefer the Import Lookup Table for naming (pristine), but fall
        // back to the IAT if no ILT is present; the IAT is always what
        // gets overwritten at bind time.
        let lookup_rva = if original_first_thunk != 0 {
            original_first_thunk
        } else {
            first_thunk
        };

        let mut lookup_offset = rva_to_file_offset(lookup_rva, sections)
            .ok_or(ParseError::DirectoryOutOfRange("import lookup table"))?;

        let mut slot_rva = first_thunk;
        loop {
            let thunk = read_u64(buffer, lookup_offset)
                .ok_or(ParseError::DirectoryOutOfRange("import thunk"))?;
            if thunk == 0 {
                break;
            }

            let symbol = if thunk & IMAGE_ORDINAL_FLAG64 != 0 {
                ImportSymbol::Ordinal((thunk & 0xFFFF) as u16)
            } else {
                let hint_name_rva = (thunk & 0xFFFF_FFFF) as u32;
                // IMAGE_IMPORT_BY_NAME: u16 hint, then a NUL-terminated name.
                let name = rva_to_file_offset(hint_name_rva, sections)
                    .and_then(|off| read_cstr(buffer, off + 2))
                    .ok_or(ParseError::DirectoryOutOfRange("import by name"))?;
                ImportSymbol::Name(name)
            };

            out.push(Import {
                module: module.clone(),
                symbol,
                slot_rva,
            });

            lookup_offset += 8;
            slot_rva += 8;
        }

        descriptor_offset += DESCRIPTOR_SIZE;
    }

    Ok(out)
}

/// Walk the export directory, skipping ordinal-only and forwarded
/// exports (both are out of scope: see `DESIGN.md`'s Open Question
/// decisions).
pub fn iter_exports(
    buffer: &[u8],
    sections: &[section_header],
    directory_rva: u32,
    directory_size: u32,
) -> Result<Vec<Export>, ParseError> {
    if directory_rva == 0 || directory_size == 0 {
        return Ok(Vec::new());
    }

    let dir_offset = rva_to_file_offset(directory_rva, sections)
        .ok_or(ParseError::DirectoryOutOfRange("export directory"))?;

    let number_of_names = read_u32(buffer, dir_offset + 24)
        .ok_or(ParseError::DirectoryOutOfRange("export directory"))?;
    let address_of_functions = read_u32(buffer, dir_offset + 28)
        .ok_or(ParseError::DirectoryOutOfRange("export directory"))?;
    let address_of_names = read_u32(buffer, dir_offset + 32)
        .ok_or(ParseError::DirectoryOutOfRange("export directory"))?;
    let address_of_name_ordinals = read_u32(buffer, dir_offset + 36)
        .ok_or(ParseError::DirectoryOutOfRange("export directory"))?;

    let names_offset = rva_to_file_offset(address_of_names, sections)
        .ok_or(ParseError::DirectoryOutOfRange("export name table"))?;
    let ordinals_offset = rva_to_file_offset(address_of_name_ordinals, sections)
        .ok_or(ParseError::DirectoryOutOfRange("export ordinal table"))?;
    let functions_offset = rva_to_file_offset(address_of_functions, sections)
        .ok_or(ParseError::DirectoryOutOfRange("export function table"))?;

    let mut out = Vec::with_capacity(number_of_names as usize);
    for i in 0..number_of_names as usize {
        let name_rva = read_u32(buffer, names_offset + i * 4)
            .ok_or(ParseError::DirectoryOutOfRange("export name entry"))?;
        let name = rva_to_file_offset(name_rva, sections)
            .and_then(|off| read_cstr(buffer, off))
            .ok_or(ParseError::DirectoryOutOfRange("export name"))?;

        let ordinal_index = read_u16(buffer, ordinals_offset + i * 2)
            .ok_or(ParseError::DirectoryOutOfRange("export ordinal entry"))?;
        let func_rva = read_u32(buffer, functions_offset + ordinal_index as usize * 4)
            .ok_or(ParseError::DirectoryOutOfRange("export function entry"))?;

        // A forwarded export's RVA points back inside the export
        // directory itself; forwarded exports are a documented non-goal.
        if func_rva >= directory_rva && func_rva < directory_rva + directory_size {
            continue;
        }

        out.push(Export {
            name,
            rva: func_rva,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(virtual_address: u32, size: u32, pointer_to_raw_data: u32) -> section_header {
        let mut s = section_header::default();
        s.virtual_address = virtual_address;
        s.virtual_size = size;
        s.size_of_raw_data = size;
        s.pointer_to_raw_data = pointer_to_raw_data;
        s
    }

    #[test]
    fn rva_to_file_offset_finds_containing_section() {
        let sections = vec![section(0x1000, 0x200, 0x400)];
        assert_eq!(rva_to_file_offset(0x1010, &sections), Some(0x410));
        assert_eq!(rva_to_file_offset(0x2000, &sections), None);
    }

    #[test]
    fn relocation_block_splits_type_and_offset() {
        let mut buf = vec![0u8; 16];
        buf[0..4].copy_from_slice(&0x1000u32.to_le_bytes()); // page rva
        buf[4..8].copy_from_slice(&12u32.to_le_bytes()); // block size = 8 + 2 entries
        // DIR64 at offset 0x008
        buf[8..10].copy_from_slice(&((IMAGE_REL_BASED_DIR64 << 12) | 0x008).to_le_bytes());
        // ABSOLUTE padding entry
        buf[10..12].copy_from_slice(&0u16.to_le_bytes());

        let sections = vec![section(0x1000, 0x1000, 0)];
        let relocs = iter_relocations(&buf, &sections, 0x1000, 12).unwrap();
        assert_eq!(relocs.len(), 2);
        assert_eq!(relocs[0], Relocation::Dir64 { rva: 0x1008 });
        assert_eq!(relocs[1], Relocation::Absolute { rva: 0x1000 });
    }

    #[test]
    fn empty_directory_yields_no_entries() {
        let sections = vec![section(0x1000, 0x1000, 0)];
        assert_eq!(iter_relocations(&[], &sections, 0, 0).unwrap(), vec![]);
        assert_eq!(iter_imports(&[], &sections, 0, 0).unwrap(), vec![]);
        assert_eq!(iter_exports(&[], &sections, 0, 0).unwrap(), vec![]);
    }
}
