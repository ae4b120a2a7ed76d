//! The long-lived handle to a mapped, relocated, import-bound DLL.

use std::collections::HashMap;
use std::ffi::c_void;

use log::debug;

use crate::mapped_memory::MappedMemory;

/// `extern "win64"` signature of `DllMain`, called with
/// `DLL_PROCESS_ATTACH`/`DLL_PROCESS_DETACH` and never with thread
/// attach/detach reasons (spec: thread notifications are a non-goal).
pub type DllEntryPoint = unsafe extern "win64" fn(base: *mut c_void, reason: u32, reserved: *mut c_void) -> i32;

/// `reason` value for `DllMain` on load.
pub const DLL_PROCESS_ATTACH: u32 = 1;
/// `reason` value for `DllMain` on unload.
pub const DLL_PROCESS_DETACH: u32 = 0;

/// A fully loaded DLL: its owned mapping, its name-keyed export table,
/// and the entry point to notify on teardown.
///
/// Mirrors `WindowsLibrary` in
/// `original_source/windows_library.cpp`: constructed only by
/// [`crate::loader::Loader::load`] on full success, so by the time one
/// exists relocation and import binding have already happened.
pub struct LoadedLibrary {
    mapping: MappedMemory,
    exports: HashMap<String, usize>,
    entry_point: Option<DllEntryPoint>,
}

impl LoadedLibrary {
    pub(crate) fn new(
        mapping: MappedMemory,
        exports: HashMap<String, usize>,
        entry_point: Option<DllEntryPoint>,
    ) -> Self {
        Self {
            mapping,
            exports,
            entry_point,
        }
    }

    /// Base address of the mapped image.
    pub fn base_address(&self) -> *const u8 {
        self.mapping.as_ptr()
    }

    /// Look up `name` in the export table and reinterpret it as `F`.
    ///
    /// # Safety
    /// The caller must know `F` is the correct `extern "win64"` function
    /// signature for the named export; this loader has no way to check
    /// it for you.
    pub unsafe fn get_export<F: Copy>(&self, name: &str) -> Option<F> {
        let address = *self.exports.get(name)?;
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
        let slot = &address as *const usize as *const F;
        Some(*slot)
    }

    /// Every exported name this library makes available.
    pub fn export_names(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }

    /// Install the TIB on the calling thread and invoke the named export
    /// as a zero-argument `extern "win64"` function. Generalizes
    /// `wrapped_dll_main` from `th0rex-pe_load` (which hardcoded the
    /// `DllMain` shape) to any no-argument export, for callers who only
    /// need a single trampoline call rather than a typed function
    /// pointer to hold onto.
    ///
    /// # Safety
    /// The caller must know `name` really takes no arguments and
    /// returns `R` under the Microsoft x64 convention.
    pub unsafe fn call<R>(&self, name: &str) -> Option<R> {
        let export: unsafe extern "win64" fn() -> R = self.get_export(name)?;
        crate::tib::setup_call();
        Some(export())
    }
}

impl Drop for LoadedLibrary {
    fn drop(&mut self) {
        if let Some(entry_point) = self.entry_point {
            let base = self.mapping.as_mut_ptr() as *mut c_void;
            debug!("delivering DLL_PROCESS_DETACH to entry point at {:p}", base);
            crate::tib::setup_call();
            unsafe {
                entry_point(base, DLL_PROCESS_DETACH, std::ptr::null_mut());
            }
        }
    }
}
