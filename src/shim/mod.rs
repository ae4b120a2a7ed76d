//! Process-wide registry mapping `(module, symbol)` to host
//! implementations of the Win32 surface a loaded DLL is allowed to call.
//!
//! Mirrors `WindowsAPI::GetInstance().GetFunction(modName, symName)` in
//! `original_source/windows_library.cpp`: a singleton table, populated
//! before the first `Load`, returning a null/`None` sentinel for
//! anything not registered so the import slot is simply left unresolved.

pub mod memory;
pub mod strings;
pub mod sync;
pub mod time;
pub mod tls;

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

fn registry() -> &'static Mutex<HashMap<(String, String), usize>> {
    static REGISTRY: OnceLock<Mutex<HashMap<(String, String), usize>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        install_builtin_shims(&mut map);
        Mutex::new(map)
    })
}

/// Register a host implementation for `(module, symbol)`. `address`
/// must be the address of an `extern "win64"` function.
pub fn register(module: &str, symbol: &str, address: usize) {
    registry()
        .lock()
        .unwrap()
        .insert((module.to_ascii_lowercase(), symbol.to_string()), address);
}

/// Look up the host implementation for `(module, symbol)`. Returns
/// `None` to mean "leave the import slot unresolved"; the caller must
/// tolerate unresolved imports rather than treating them as fatal.
pub fn get_function(module: &str, symbol: &str) -> Option<usize> {
    registry()
        .lock()
        .unwrap()
        .get(&(module.to_ascii_lowercase(), symbol.to_string()))
        .copied()
}

fn install_builtin_shims(map: &mut HashMap<(String, String), usize>) {
    macro_rules! shim {
        ($map:expr, $module:expr, $symbol:expr, $func:expr) => {
            $map.insert(($module.to_string(), $symbol.to_string()), $func as usize);
        };
    }

    shim!(map, "kernel32.dll", "HeapAlloc", memory::HeapAlloc);
    shim!(map, "kernel32.dll", "HeapFree", memory::HeapFree);
    shim!(map, "kernel32.dll", "HeapReAlloc", memory::HeapReAlloc);
    shim!(map, "kernel32.dll", "GetProcessHeap", memory::GetProcessHeap);
    shim!(map, "kernel32.dll", "VirtualAlloc", memory::VirtualAlloc);
    shim!(map, "kernel32.dll", "VirtualFree", memory::VirtualFree);

    shim!(
        map,
        "kernel32.dll",
        "InitializeCriticalSection",
        sync::InitializeCriticalSection
    );
    shim!(
        map,
        "kernel32.dll",
        "EnterCriticalSection",
        sync::EnterCriticalSection
    );
    shim!(
        map,
        "kernel32.dll",
        "LeaveCriticalSection",
        sync::LeaveCriticalSection
    );
    shim!(
        map,
        "kernel32.dll",
        "DeleteCriticalSection",
        sync::DeleteCriticalSection
    );

    shim!(map, "kernel32.dll", "TlsAlloc", tls::TlsAlloc);
    shim!(map, "kernel32.dll", "TlsFree", tls::TlsFree);
    shim!(map, "kernel32.dll", "TlsGetValue", tls::TlsGetValue);
    shim!(map, "kernel32.dll", "TlsSetValue", tls::TlsSetValue);

    shim!(map, "kernel32.dll", "GetTickCount", time::GetTickCount);
    shim!(
        map,
        "kernel32.dll",
        "QueryPerformanceCounter",
        time::QueryPerformanceCounter
    );

    shim!(map, "kernel32.dll", "lstrlenA", strings::lstrlenA);
    shim!(
        map,
        "kernel32.dll",
        "MultiByteToWideChar",
        strings::MultiByteToWideChar
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_shim_resolves_case_insensitively() {
        assert!(get_function("KERNEL32.DLL", "HeapAlloc").is_some());
        assert!(get_function("kernel32.dll", "HeapAlloc").is_some());
    }

    #[test]
    fn unregistered_symbol_is_none() {
        assert_eq!(get_function("kernel32.dll", "NoSuchFunction"), None);
    }

    #[test]
    fn user_registration_overrides_nothing_but_is_visible() {
        register("oo2core_6_win64.dll", "HostCallback", 0x1234);
        assert_eq!(
            get_function("oo2core_6_win64.dll", "HostCallback"),
            Some(0x1234)
        );
    }
}
