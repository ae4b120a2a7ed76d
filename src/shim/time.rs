//! Time shims. Monotonic only, nothing here claims to track wall-clock
//! time, which the documented minimum Win32 surface does not require.

#![allow(non_snake_case)]

use std::sync::OnceLock;
use std::time::Instant;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

pub unsafe extern "win64" fn GetTickCount() -> u32 {
    epoch().elapsed().as_millis() as u32
}

pub unsafe extern "win64" fn QueryPerformanceCounter(counter: *mut i64) -> i32 {
    if counter.is_null() {
        return 0;
    }
    *counter = epoch().elapsed().as_nanos() as i64;
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_count_is_monotonic() {
        unsafe {
            let a = GetTickCount();
            std::thread::sleep(std::time::Duration::from_millis(5));
            let b = GetTickCount();
            assert!(b >= a);
        }
    }

    #[test]
    fn performance_counter_rejects_null() {
        unsafe {
            assert_eq!(QueryPerformanceCounter(std::ptr::null_mut()), 0);
        }
    }
}
