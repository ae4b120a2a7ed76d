//! Error kinds for every fallible operation in the loader.

use std::path::PathBuf;

use thiserror::Error;

/// Failure parsing a PE/COFF image.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The underlying `pe-parser` crate rejected the image.
    #[error("failed to parse PE image: {0}")]
    Malformed(#[from] pe_parser::Error),

    /// The image parsed, but a directory (imports/exports/relocations)
    /// pointed outside the file buffer.
    #[error("directory table out of range: {0}")]
    DirectoryOutOfRange(&'static str),

    /// The file on disk could not be read at all.
    #[error("failed to read file {path:?}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Failure locating a library by name.
#[derive(Debug, Error)]
pub enum SearchError {
    /// No directory in the search path contains the named file, and the
    /// raw name does not exist relative to the current directory either.
    #[error("could not locate library {0:?} in any search path entry")]
    NotFound(String),
}

/// Failure during [`crate::loader::Loader::load`].
#[derive(Debug, Error)]
pub enum LoadError {
    /// The library file could not be located on disk.
    #[error("library not found: {0}")]
    NotFound(#[from] SearchError),

    /// The file is not a recognizable PE32+ image.
    #[error("failed to parse PE image: {0}")]
    Parse(#[from] ParseError),

    /// The image is not something this loader can run.
    #[error("unsupported image: {0}")]
    UnsupportedImage(&'static str),

    /// A relocation entry used a type this loader does not implement.
    #[error("unsupported relocation type {0}")]
    UnsupportedRelocationType(u16),

    /// A host VM operation (mmap/mprotect) failed.
    #[error("virtual memory operation failed: {0}")]
    AllocError(#[from] std::io::Error),

    /// The image's header/section layout is internally inconsistent.
    #[error("invalid image layout: {0}")]
    LayoutError(&'static str),

    /// The DLL's entry point returned `FALSE` for `DLL_PROCESS_ATTACH`.
    #[error("entry point returned FALSE on DLL_PROCESS_ATTACH")]
    InitFailed,
}
