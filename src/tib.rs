//! Per-thread Thread Information Block emulation.
//!
//! Windows code reaches the TIB through the `gs` segment register
//! (`mov rax, gs:[offset]`). On Linux we point `gs` at a thread-local,
//! zeroed block via `arch_prctl`; on macOS, which has no equivalent knob,
//! we stash the same block in a process-wide thread-specific-data slot
//! that the shim layer consults instead. Ported from
//! `original_source/windows_library.cpp::SetupCall` /
//! `WindowsLibrary::s_tib`.

use std::cell::UnsafeCell;

/// Size in bytes of the emulated TIB. Large enough to cover the fields
/// Windows code in practice dereferences without authentic contents;
/// the block is always zero-initialized and this loader does not claim
/// to model the real TIB/TEB layout beyond that.
pub const TIB_SIZE: usize = 0x1000;

struct Tib(UnsafeCell<[u8; TIB_SIZE]>);

// Only ever accessed through the owning thread's gs base / TSD slot.
unsafe impl Sync for Tib {}

thread_local! {
    static TIB: Tib = const { Tib(UnsafeCell::new([0u8; TIB_SIZE])) };
}

#[cfg(target_os = "macos")]
mod tsd {
    use std::sync::OnceLock;

    static KEY: OnceLock<libc::pthread_key_t> = OnceLock::new();

    pub fn key() -> libc::pthread_key_t {
        *KEY.get_or_init(|| unsafe {
            let mut key: libc::pthread_key_t = 0;
            let result = libc::pthread_key_create(&mut key, None);
            assert_eq!(result, 0, "pthread_key_create failed");
            key
        })
    }
}

/// Install the current thread's TIB as the `gs` base (Linux) or in the
/// process-wide TSD slot the shim reads from (macOS). Zeroes the block
/// on first use for this thread. Idempotent: calling this N times on one
/// thread leaves it in the same state as calling it once.
pub fn setup_call() {
    TIB.with(|tib| {
        let ptr = tib.0.get() as *mut u8;

        #[cfg(target_os = "linux")]
        unsafe {
            let result = libc::syscall(libc::SYS_arch_prctl, libc::ARCH_SET_GS, ptr);
            assert_eq!(result, 0, "arch_prctl(ARCH_SET_GS) failed");
        }

        #[cfg(target_os = "macos")]
        unsafe {
            let result = libc::pthread_setspecific(tsd::key(), ptr as *const libc::c_void);
            assert_eq!(result, 0, "pthread_setspecific failed");
        }
    });
}

/// Address of the current thread's TIB, for tests and diagnostics.
pub fn current_tib_address() -> usize {
    TIB.with(|tib| tib.0.get() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_call_is_idempotent_per_thread() {
        setup_call();
        let addr = current_tib_address();
        setup_call();
        setup_call();
        assert_eq!(current_tib_address(), addr);
    }

    #[test]
    fn distinct_threads_get_distinct_tibs() {
        setup_call();
        let main_addr = current_tib_address();

        let spawned_addr = std::thread::spawn(|| {
            setup_call();
            current_tib_address()
        })
        .join()
        .unwrap();

        assert_ne!(main_addr, spawned_addr);
    }
}
