//! Thin façade over the `pe-parser` crate, extended with the directory
//! walkers `pe-parser` itself does not provide.
//!
//! `pe-parser` gives us the COFF header, the PE32+ optional header (with
//! its raw `DataDirectories`), and the section table. Everything this
//! loader needs beyond that, base relocations, imports, exports, is
//! implemented in [`directories`] against the same on-disk byte ranges.

pub mod directories;

use pe_parser::optional::{DataDirectory, OptionalHeader64};
use pe_parser::pe::{parse_portable_executable, PortableExecutable};
pub use pe_parser::section::section_header as SectionHeader;

use crate::error::ParseError;

/// PE machine type for 64-bit x86 (AMD64/x64).
pub const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;

/// `IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE`: the image may be relocated.
pub const IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE: u16 = 0x0040;

/// A parsed PE32+ image, borrowing the byte buffer it was read from.
///
/// Short-lived by design (spec: "discarded once the image is mapped and
/// bound"); nothing here outlives the `Vec<u8>` the loader read the
/// file into.
pub struct ParsedImage<'a> {
    buffer: &'a [u8],
    inner: PortableExecutable,
}

impl<'a> ParsedImage<'a> {
    /// Parse `buffer` as a PE image. Fails with [`ParseError`] for
    /// anything that is not a recognizable PE file; does not itself
    /// check machine type or bitness (callers check via [`Self::machine`]
    /// and [`Self::optional_header_64`]).
    pub fn parse(buffer: &'a [u8]) -> Result<Self, ParseError> {
        let inner = parse_portable_executable(buffer)?;
        Ok(Self { buffer, inner })
    }

    /// COFF machine type (`IMAGE_FILE_MACHINE_*`).
    pub fn machine(&self) -> u16 {
        self.inner.coff.machine
    }

    /// The PE32+ optional header, or `None` for a 32-bit (PE32) image.
    pub fn optional_header_64(&self) -> Option<&OptionalHeader64> {
        self.inner.optional_header_64.as_ref()
    }

    /// Section headers in file order.
    pub fn sections(&self) -> &[SectionHeader] {
        &self.inner.section_table
    }

    /// Base relocations, if the image has a populated base relocation
    /// directory.
    pub fn relocations(&self) -> Result<Vec<directories::Relocation>, ParseError> {
        let dir = self.directory(|d| d.base_relocation_table)?;
        directories::iter_relocations(self.buffer, self.sections(), dir.virtual_address, dir.size)
    }

    /// Imports: every thunk in every import descriptor.
    pub fn imports(&self) -> Result<Vec<directories::Import>, ParseError> {
        let dir = self.directory(|d| d.import_table)?;
        directories::iter_imports(self.buffer, self.sections(), dir.virtual_address, dir.size)
    }

    /// Exports by name (ordinal-only and forwarded exports are skipped;
    /// see `DESIGN.md`).
    pub fn exports(&self) -> Result<Vec<directories::Export>, ParseError> {
        let dir = self.directory(|d| d.export_table)?;
        directories::iter_exports(self.buffer, self.sections(), dir.virtual_address, dir.size)
    }

    fn directory(
        &self,
        select: impl Fn(&pe_parser::optional::DataDirectories) -> DataDirectory,
    ) -> Result<DataDirectory, ParseError> {
        let optional = self
            .optional_header_64()
            .ok_or(ParseError::DirectoryOutOfRange("optional header is not PE32+"))?;
        Ok(select(&optional.data_directories))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pe_buffers() {
        let garbage = vec![0u8; 128];
        assert!(ParsedImage::parse(&garbage).is_err());
    }
}
