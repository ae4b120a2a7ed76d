//! Scoped ownership of an anonymous virtual-memory region.
//!
//! Mirrors `original_source/windows_library.cpp`'s `MappedMemory`: a
//! `(pointer, size)` pair obtained from the host's anonymous allocator,
//! released unconditionally on drop.

use std::io;
use std::ptr;

/// An owned, page-aligned region of anonymous memory.
///
/// `base` is null only for a moved-from instance; dropping a null-based
/// `MappedMemory` is a no-op, so release can never be forgotten.
#[derive(Debug)]
pub struct MappedMemory {
    base: *mut u8,
    size: usize,
}

// The loader hands out exported addresses into this region to be called
// from arbitrary host threads; the region itself carries no interior
// mutability beyond what the DLL performs on its own memory.
unsafe impl Send for MappedMemory {}
unsafe impl Sync for MappedMemory {}

impl MappedMemory {
    /// Reserve and commit `size` bytes, readable and writable, anonymous
    /// and not backed by any file.
    pub fn reserve(size: usize) -> io::Result<Self> {
        if size == 0 {
            return Ok(Self {
                base: ptr::null_mut(),
                size: 0,
            });
        }

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            base: ptr as *mut u8,
            size,
        })
    }

    /// Base address of the mapping.
    pub fn as_ptr(&self) -> *const u8 {
        self.base
    }

    /// Mutable base address of the mapping.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.base
    }

    /// Size of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.size
    }

    /// True for a moved-from (null, zero-sized) mapping.
    pub fn is_empty(&self) -> bool {
        self.base.is_null()
    }

    /// Whole mapping as an immutable byte slice.
    pub fn as_slice(&self) -> &[u8] {
        if self.base.is_null() {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.base, self.size) }
        }
    }

    /// Whole mapping as a mutable byte slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        if self.base.is_null() {
            &mut []
        } else {
            unsafe { std::slice::from_raw_parts_mut(self.base, self.size) }
        }
    }

    /// True if `addr` lies within `[base, base + size)`.
    pub fn contains(&self, addr: usize) -> bool {
        let start = self.base as usize;
        !self.base.is_null() && addr >= start && addr < start + self.size
    }

    /// Apply `prot` (a `libc::PROT_*` mask) to the `[offset, offset+len)`
    /// sub-range of the mapping.
    pub fn protect(&self, offset: usize, len: usize, prot: i32) -> io::Result<()> {
        if len == 0 {
            return Ok(());
        }
        if offset + len > self.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "protect range exceeds mapping size",
            ));
        }

        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let page_start = (self.base as usize + offset) & !(page_size - 1);
        let page_end = (self.base as usize + offset + len + page_size - 1) & !(page_size - 1);

        let result = unsafe {
            libc::mprotect(
                page_start as *mut libc::c_void,
                page_end - page_start,
                prot,
            )
        };

        if result != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}

impl Drop for MappedMemory {
    fn drop(&mut self) {
        if !self.base.is_null() {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.size);
            }
            self.base = ptr::null_mut();
            self.size = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_gives_zeroed_readwrite_memory() {
        let mut mem = MappedMemory::reserve(4096).unwrap();
        assert_eq!(mem.len(), 4096);
        assert!(!mem.is_empty());
        assert!(mem.as_slice().iter().all(|&b| b == 0));
        mem.as_mut_slice()[0] = 0xAB;
        assert_eq!(mem.as_slice()[0], 0xAB);
    }

    #[test]
    fn contains_respects_bounds() {
        let mem = MappedMemory::reserve(4096).unwrap();
        let base = mem.as_ptr() as usize;
        assert!(mem.contains(base));
        assert!(mem.contains(base + 4095));
        assert!(!mem.contains(base + 4096));
        assert!(!mem.contains(base.wrapping_sub(1)));
    }

    #[test]
    fn zero_size_reserve_is_empty_sentinel() {
        let mem = MappedMemory::reserve(0).unwrap();
        assert!(mem.is_empty());
        assert_eq!(mem.len(), 0);
    }

    #[test]
    fn protect_accepts_ranges_within_mapping() {
        let mem = MappedMemory::reserve(4096).unwrap();
        mem.protect(0, 4096, libc::PROT_READ).unwrap();
    }

    #[test]
    fn protect_rejects_out_of_range() {
        let mem = MappedMemory::reserve(4096).unwrap();
        assert!(mem.protect(4000, 4096, libc::PROT_READ).is_err());
    }
}
