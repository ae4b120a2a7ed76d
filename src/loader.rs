//! The ten-phase load pipeline.
//!
//! Grounded on `th0rex-pe_load::Loader::load` for the phase shape
//! (`map_module` → `relocate` → `resolve_imports` → `mem_protect` →
//! `tls_callbacks`) and `original_source/windows_library.cpp::
//! WindowsLibrary::Load` for the cross-platform specifics: sizing the
//! mapping from `SizeOfImage` rather than computed section maxima, and
//! calling `SetupCall` immediately before the entry point runs.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fs;
use std::path::Path;

use log::{debug, warn};

use crate::error::LoadError;
use crate::loaded_library::{DllEntryPoint, LoadedLibrary, DLL_PROCESS_ATTACH};
use crate::mapped_memory::MappedMemory;
use crate::pe::directories::{Import, ImportSymbol, Relocation};
use crate::pe::{ParsedImage, IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE, IMAGE_FILE_MACHINE_AMD64};
use crate::search;
use crate::shim;
use crate::tib;

const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;
const IMAGE_SCN_MEM_READ: u32 = 0x4000_0000;
const IMAGE_SCN_MEM_WRITE: u32 = 0x8000_0000;

/// Stateless entry point: `Loader::load` is the only public operation.
pub struct Loader;

impl Loader {
    /// Run the full ten-phase pipeline against `path`, resolving it
    /// through the search cascade first.
    pub fn load(path: impl AsRef<Path>) -> Result<LoadedLibrary, LoadError> {
        let name = path.as_ref().to_string_lossy().into_owned();

        // Phase 1: locate.
        let resolved = search::find_library_checked(&name)?;
        debug!("resolved {:?} to {:?}", name, resolved);

        // Phase 2: parse.
        let file_buffer = fs::read(&resolved).map_err(|source| crate::error::ParseError::Io {
            path: resolved.clone(),
            source,
        })?;
        let image = ParsedImage::parse(&file_buffer)?;

        if image.machine() != IMAGE_FILE_MACHINE_AMD64 {
            return Err(LoadError::UnsupportedImage("not an AMD64 image"));
        }
        let optional = image
            .optional_header_64()
            .ok_or(LoadError::UnsupportedImage("not a PE32+ image"))?;

        let size_of_image = optional.size_of_image as usize;
        let size_of_headers = optional.size_of_headers as usize;
        let preferred_base = optional.image_base;
        let dynamic_base = optional.dll_characteristics & IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE != 0;
        let entry_point_rva = optional.address_of_entry_point;

        // Phase 3: reserve.
        let mut builder = LoadBuilder::new(MappedMemory::reserve(size_of_image)?);

        // Phase 4: copy headers.
        if size_of_headers > builder.mapping.len() {
            return Err(LoadError::LayoutError("SizeOfHeaders exceeds reserved region"));
        }
        builder.mapping.as_mut_slice()[..size_of_headers].copy_from_slice(&file_buffer[..size_of_headers]);
        builder.mapping.protect(0, size_of_headers, libc::PROT_READ)?;

        // Phase 5: copy sections.
        for section in image.sections() {
            let dest_start = section.virtual_address as usize;
            let raw_len = section.size_of_raw_data as usize;
            if raw_len == 0 {
                continue;
            }
            if section.virtual_size != 0 && raw_len as u32 > section.virtual_size {
                warn!(
                    "section {:?} has RawDataSize {} > VirtualSize {}, truncating copy",
                    section.get_name(),
                    raw_len,
                    section.virtual_size
                );
            }
            let copy_len = if section.virtual_size != 0 {
                raw_len.min(section.virtual_size as usize)
            } else {
                raw_len
            };

            let src_start = section.pointer_to_raw_data as usize;
            let src = file_buffer
                .get(src_start..src_start + copy_len)
                .ok_or(LoadError::LayoutError("section raw data out of file bounds"))?;
            let dst = builder
                .mapping
                .as_mut_slice()
                .get_mut(dest_start..dest_start + copy_len)
                .ok_or(LoadError::LayoutError("section virtual address out of image bounds"))?;
            dst.copy_from_slice(src);
        }

        let mapped_base = builder.mapping.as_ptr() as u64;

        // Phase 6: relocate.
        let delta = mapped_base.wrapping_sub(preferred_base);
        if delta != 0 {
            if !dynamic_base {
                return Err(LoadError::UnsupportedImage(
                    "image is not relocatable (missing DYNAMIC_BASE) but was not mapped at its preferred base",
                ));
            }
            for relocation in image.relocations()? {
                apply_relocation(&mut builder.mapping, relocation, delta)?;
            }
        }

        // Phase 7: bind imports.
        for import in image.imports()? {
            bind_import(&mut builder.mapping, &import);
        }

        // Phase 8: lock permissions.
        for section in image.sections() {
            let mut prot = 0;
            if section.characteristics & IMAGE_SCN_MEM_EXECUTE != 0 {
                prot |= libc::PROT_EXEC;
            }
            if section.characteristics & IMAGE_SCN_MEM_READ != 0 {
                prot |= libc::PROT_READ;
            }
            if section.characteristics & IMAGE_SCN_MEM_WRITE != 0 {
                prot |= libc::PROT_WRITE;
            }
            let len = section.virtual_size as usize;
            if len == 0 {
                continue;
            }
            builder
                .mapping
                .protect(section.virtual_address as usize, len, prot)?;
        }

        // Phase 9: collect exports.
        for export in image.exports()? {
            builder
                .exports
                .insert(export.name, mapped_base as usize + export.rva as usize);
        }

        // Phase 10: run entry point.
        let entry_point: Option<DllEntryPoint> = if entry_point_rva != 0 {
            let address = mapped_base + entry_point_rva as u64;
            Some(unsafe { std::mem::transmute::<u64, DllEntryPoint>(address) })
        } else {
            None
        };

        if let Some(entry_point) = entry_point {
            tib::setup_call();
            let base_ptr = mapped_base as *mut c_void;
            debug!("calling entry point at {:p} with DLL_PROCESS_ATTACH", base_ptr);
            let result = unsafe { entry_point(base_ptr, DLL_PROCESS_ATTACH, std::ptr::null_mut()) };
            if result == 0 {
                return Err(LoadError::InitFailed);
            }
        }

        Ok(builder.finish(entry_point))
    }
}

/// Owns in-progress load state so a `?` anywhere above releases the
/// mapping automatically: `finish` is the only way to escape with the
/// resources intact, mirroring the "builder that holds resources" the
/// spec's ownership design note calls for.
struct LoadBuilder {
    mapping: MappedMemory,
    exports: HashMap<String, usize>,
}

impl LoadBuilder {
    fn new(mapping: MappedMemory) -> Self {
        Self {
            mapping,
            exports: HashMap::new(),
        }
    }

    fn finish(self, entry_point: Option<DllEntryPoint>) -> LoadedLibrary {
        LoadedLibrary::new(self.mapping, self.exports, entry_point)
    }
}

fn apply_relocation(mapping: &mut MappedMemory, relocation: Relocation, delta: u64) -> Result<(), LoadError> {
    match relocation {
        Relocation::Absolute { .. } => Ok(()),
        Relocation::Dir64 { rva } => {
            let slot = read_slot::<u64>(mapping, rva)?;
            unsafe {
                *slot = (*slot).wrapping_add(delta);
            }
            Ok(())
        }
        // HIGHLOW patches a 32-bit VA field, which a PE32+ image has no
        // business relying on; spec.md treats every relocation type
        // besides ABSOLUTE/DIR64 as fatal.
        Relocation::HighLow { .. } => Err(LoadError::UnsupportedRelocationType(
            crate::pe::directories::IMAGE_REL_BASED_HIGHLOW,
        )),
        Relocation::Unsupported { kind, .. } => Err(LoadError::UnsupportedRelocationType(kind)),
    }
}

fn read_slot<T>(mapping: &mut MappedMemory, rva: u32) -> Result<*mut T, LoadError> {
    let offset = rva as usize;
    if offset + std::mem::size_of::<T>() > mapping.len() {
        return Err(LoadError::LayoutError("relocation target out of mapped image bounds"));
    }
    Ok(unsafe { mapping.as_mut_ptr().add(offset) as *mut T })
}

fn bind_import(mapping: &mut MappedMemory, import: &Import) {
    let symbol_name = match &import.symbol {
        ImportSymbol::Name(name) => name.as_str(),
        ImportSymbol::Ordinal(ordinal) => {
            debug!(
                "import from {:?} by ordinal {} has no recoverable name, skipping",
                import.module, ordinal
            );
            return;
        }
    };

    let Some(address) = shim::get_function(&import.module, symbol_name) else {
        debug!("no shim registered for {}!{}, leaving slot unresolved", import.module, symbol_name);
        return;
    };

    let offset = import.slot_rva as usize;
    if offset + std::mem::size_of::<usize>() > mapping.len() {
        warn!("import slot for {}!{} is out of mapped image bounds", import.module, symbol_name);
        return;
    }
    unsafe {
        let slot = mapping.as_mut_ptr().add(offset) as *mut usize;
        *slot = address;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::directories::IMAGE_REL_BASED_HIGHLOW;

    #[test]
    fn dir64_relocation_adds_the_full_delta() {
        let mut mapping = MappedMemory::reserve(4096).unwrap();
        unsafe {
            let slot = mapping.as_mut_ptr() as *mut u64;
            *slot = 0x1000;
        }
        apply_relocation(&mut mapping, Relocation::Dir64 { rva: 0 }, 0x42).unwrap();
        unsafe {
            assert_eq!(*(mapping.as_ptr() as *const u64), 0x1042);
        }
    }

    #[test]
    fn absolute_relocation_is_a_no_op() {
        let mut mapping = MappedMemory::reserve(4096).unwrap();
        unsafe {
            let slot = mapping.as_mut_ptr() as *mut u64;
            *slot = 0xdead_beef;
        }
        apply_relocation(&mut mapping, Relocation::Absolute { rva: 0 }, 0x42).unwrap();
        unsafe {
            assert_eq!(*(mapping.as_ptr() as *const u64), 0xdead_beef);
        }
    }

    #[test]
    fn highlow_relocation_is_fatal_not_silently_applied() {
        let mut mapping = MappedMemory::reserve(4096).unwrap();
        let err = apply_relocation(&mut mapping, Relocation::HighLow { rva: 0 }, 0x42).unwrap_err();
        assert!(matches!(
            err,
            LoadError::UnsupportedRelocationType(k) if k == IMAGE_REL_BASED_HIGHLOW
        ));
    }

    #[test]
    fn relocation_target_out_of_bounds_is_a_layout_error() {
        let mut mapping = MappedMemory::reserve(4096).unwrap();
        let err = apply_relocation(&mut mapping, Relocation::Dir64 { rva: 4090 }, 0x42).unwrap_err();
        assert!(matches!(err, LoadError::LayoutError(_)));
    }
}
