//! `TlsAlloc`/`TlsGetValue`/`TlsSetValue`/`TlsFree` shims, backed by a
//! fixed-size slot bitmap plus real thread-local storage on the host
//! side (distinct from the `gs`-based TIB emulation in [`crate::tib`];
//! this is the explicit Win32 TLS API a DLL calls itself).

#![allow(non_snake_case)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

const TLS_OUT_OF_INDEXES: u32 = 0xFFFF_FFFF;
const SLOT_COUNT: usize = 1088;

fn slots() -> &'static Vec<AtomicBool> {
    static SLOTS: OnceLock<Vec<AtomicBool>> = OnceLock::new();
    SLOTS.get_or_init(|| (0..SLOT_COUNT).map(|_| AtomicBool::new(false)).collect())
}

thread_local! {
    static VALUES: RefCell<HashMap<u32, usize>> = RefCell::new(HashMap::new());
}

pub unsafe extern "win64" fn TlsAlloc() -> u32 {
    for (index, slot) in slots().iter().enumerate() {
        if slot
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            return index as u32;
        }
    }
    TLS_OUT_OF_INDEXES
}

pub unsafe extern "win64" fn TlsFree(index: u32) -> i32 {
    match slots().get(index as usize) {
        Some(slot) => {
            slot.store(false, Ordering::Release);
            VALUES.with(|v| v.borrow_mut().remove(&index));
            1
        }
        None => 0,
    }
}

pub unsafe extern "win64" fn TlsGetValue(index: u32) -> *mut c_void {
    VALUES.with(|v| v.borrow().get(&index).copied().unwrap_or(0) as *mut c_void)
}

pub unsafe extern "win64" fn TlsSetValue(index: u32, value: *mut c_void) -> i32 {
    VALUES.with(|v| {
        v.borrow_mut().insert(index, value as usize);
    });
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_set_get_free_round_trip() {
        unsafe {
            let index = TlsAlloc();
            assert_ne!(index, TLS_OUT_OF_INDEXES);
            assert!(TlsGetValue(index).is_null());
            assert_eq!(TlsSetValue(index, 0x42 as *mut c_void), 1);
            assert_eq!(TlsGetValue(index) as usize, 0x42);
            assert_eq!(TlsFree(index), 1);
        }
    }

    #[test]
    fn values_are_thread_local() {
        unsafe {
            let index = TlsAlloc();
            TlsSetValue(index, 0xAA as *mut c_void);

            let other_thread_value = std::thread::spawn(move || TlsGetValue(index) as usize)
                .join()
                .unwrap();

            assert_eq!(other_thread_value, 0);
            assert_eq!(TlsGetValue(index) as usize, 0xAA);
            TlsFree(index);
        }
    }
}
