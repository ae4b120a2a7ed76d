//! Process-wide singleton loaded library.
//!
//! A single `LoadedLibrary` for the target DLL, constructed idempotently
//! on first use and torn down at process exit through ordinary `Drop`.
//! `OnceLock`-based lazy init is the same pattern the original C++ gets
//! via `pthread_once`/static locals.

use std::path::Path;
use std::sync::OnceLock;

use crate::error::LoadError;
use crate::loaded_library::LoadedLibrary;
use crate::loader::Loader;

/// Holds at most one loaded library for the life of the process. Not
/// generic over multiple simultaneous libraries: this loader's spec
/// targets one wrapped DLL per process, matching the original's single
/// `s_instance`-style global.
///
/// The load attempt, success or failure, happens exactly once: a prior
/// failure is not retried by a later `ensure_loaded` call, mirroring
/// `pthread_once`'s one-shot semantics in the original C++.
pub struct GlobalLibrary {
    once: OnceLock<Result<LoadedLibrary, LoadError>>,
}

impl GlobalLibrary {
    pub const fn new() -> Self {
        Self { once: OnceLock::new() }
    }

    /// Load `path` on the first call; every subsequent call, regardless
    /// of the `path` argument, returns the first attempt's outcome
    /// without touching the filesystem again.
    pub fn ensure_loaded(&self, path: impl AsRef<Path>) -> Result<&LoadedLibrary, &LoadError> {
        self.once.get_or_init(|| Loader::load(path)).as_ref()
    }

    /// Run `f` against the loaded library, if one has been successfully
    /// loaded.
    pub fn with<R>(&self, f: impl FnOnce(&LoadedLibrary) -> R) -> Option<R> {
        self.once.get().and_then(|result| result.as_ref().ok()).map(f)
    }
}

impl Default for GlobalLibrary {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide instance. Construction is a no-op until
/// [`GlobalLibrary::ensure_loaded`] is called; destruction (and the
/// `DLL_PROCESS_DETACH` notification it implies) happens through the
/// contained `LoadedLibrary`'s `Drop` impl at process exit, since this is
/// a plain `static` rather than something requiring explicit teardown.
pub fn instance() -> &'static GlobalLibrary {
    static INSTANCE: OnceLock<GlobalLibrary> = OnceLock::new();
    INSTANCE.get_or_init(GlobalLibrary::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_load_is_cached_not_retried() {
        let global = GlobalLibrary::new();
        assert!(global.ensure_loaded("this_file_does_not_exist.dll").is_err());
        assert!(global.with(|_| ()).is_none());
        // Second call observes the same cached failure rather than
        // re-attempting resolution against a different path.
        assert!(global.ensure_loaded("/also/does/not/exist.dll").is_err());
    }
}
