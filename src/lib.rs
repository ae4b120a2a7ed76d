//! A userspace loader that makes a 64-bit Windows DLL callable from a
//! non-Windows host.
//!
//! `linoodle` parses a PE32+ AMD64 image, maps it into anonymous memory,
//! applies base relocations, binds the imports it knows how to satisfy
//! against a small host-backed Win32 shim, locks section permissions
//! down, and runs the DLL's entry point, all without ever needing a
//! real Windows process to host it in. See [`loader::Loader::load`] for
//! the full phase-by-phase pipeline.
//!
//! Typical use goes through the process-wide singleton in [`global`]:
//!
//! ```no_run
//! linoodle::global::instance().ensure_loaded("oo2core_6_win64.dll").unwrap();
//! linoodle::global::instance().with(|lib| {
//!     let names: Vec<_> = lib.export_names().collect();
//!     println!("{names:?}");
//! });
//! ```
//!
//! Each host thread that will call into the loaded DLL should install
//! its own emulated TIB once, via [`tib::setup_call`], before the first
//! call; [`loader::Loader::load`] already does this for the thread that
//! runs the entry point.

pub mod error;
pub mod global;
pub mod loaded_library;
pub mod loader;
pub mod mapped_memory;
pub mod pe;
pub mod search;
pub mod shim;
pub mod tib;

pub use error::{LoadError, ParseError, SearchError};
pub use loaded_library::LoadedLibrary;
pub use loader::Loader;
