//! `CRITICAL_SECTION` shims.
//!
//! A DLL supplies the address of its own `CRITICAL_SECTION` storage (its
//! layout is opaque to callers on real Windows too); we key a side table
//! of real `pthread_mutex_t`s off that address rather than writing
//! through it, so we never depend on the true Windows struct layout.

#![allow(non_snake_case)]

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Mutex, OnceLock};

struct RawMutex(libc::pthread_mutex_t);
unsafe impl Send for RawMutex {}

fn table() -> &'static Mutex<HashMap<usize, Box<RawMutex>>> {
    static TABLE: OnceLock<Mutex<HashMap<usize, Box<RawMutex>>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

pub unsafe extern "win64" fn InitializeCriticalSection(critical_section: *mut c_void) {
    let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
    libc::pthread_mutexattr_init(&mut attr);
    libc::pthread_mutexattr_settype(&mut attr, libc::PTHREAD_MUTEX_RECURSIVE);

    let mut raw = Box::new(RawMutex(std::mem::zeroed()));
    libc::pthread_mutex_init(&mut raw.0, &attr);
    libc::pthread_mutexattr_destroy(&mut attr);

    table()
        .lock()
        .unwrap()
        .insert(critical_section as usize, raw);
}

pub unsafe extern "win64" fn EnterCriticalSection(critical_section: *mut c_void) {
    let ptr = {
        let guard = table().lock().unwrap();
        guard
            .get(&(critical_section as usize))
            .map(|raw| &raw.0 as *const _ as *mut libc::pthread_mutex_t)
    };
    if let Some(p) = ptr {
        libc::pthread_mutex_lock(p);
    }
}

pub unsafe extern "win64" fn LeaveCriticalSection(critical_section: *mut c_void) {
    let ptr = {
        let guard = table().lock().unwrap();
        guard
            .get(&(critical_section as usize))
            .map(|raw| &raw.0 as *const _ as *mut libc::pthread_mutex_t)
    };
    if let Some(p) = ptr {
        libc::pthread_mutex_unlock(p);
    }
}

pub unsafe extern "win64" fn DeleteCriticalSection(critical_section: *mut c_void) {
    if let Some(mut raw) = table().lock().unwrap().remove(&(critical_section as usize)) {
        libc::pthread_mutex_destroy(&mut raw.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_and_leave_round_trip() {
        let mut storage: usize = 0;
        let handle = &mut storage as *mut usize as *mut c_void;
        unsafe {
            InitializeCriticalSection(handle);
            EnterCriticalSection(handle);
            LeaveCriticalSection(handle);
            DeleteCriticalSection(handle);
        }
    }

    #[test]
    fn unknown_handle_is_ignored_not_fatal() {
        unsafe {
            EnterCriticalSection(0x1 as *mut c_void);
            LeaveCriticalSection(0x1 as *mut c_void);
        }
    }
}
