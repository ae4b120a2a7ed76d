//! Heap/virtual-memory shims. Backed by the host allocator, not by a
//! second virtual address space, good enough for DLLs that only want
//! scratch buffers rather than full control over their address space.

#![allow(non_snake_case)]

use std::alloc::{alloc, alloc_zeroed, dealloc, realloc, Layout};
use std::ffi::c_void;
use std::ptr;

const HEAP_ZERO_MEMORY: u32 = 0x0000_0008;
const ALIGN: usize = 16;

#[repr(C)]
struct AllocationHeader {
    size: usize,
}

unsafe fn layout_for(payload_size: usize) -> Layout {
    Layout::from_size_align(payload_size + std::mem::size_of::<AllocationHeader>(), ALIGN)
        .expect("allocation size overflow")
}

/// Returns a process-wide pseudo heap handle. The shim never
/// dereferences it; it only threads the value back through
/// `HeapAlloc`/`HeapFree` so a DLL that checks for a non-null handle is
/// satisfied.
pub unsafe extern "win64" fn GetProcessHeap() -> *mut c_void {
    1usize as *mut c_void
}

pub unsafe extern "win64" fn HeapAlloc(_heap: *mut c_void, flags: u32, size: usize) -> *mut c_void {
    let layout = layout_for(size);
    let raw = if flags & HEAP_ZERO_MEMORY != 0 {
        alloc_zeroed(layout)
    } else {
        alloc(layout)
    };
    if raw.is_null() {
        return ptr::null_mut();
    }
    (raw as *mut AllocationHeader).write(AllocationHeader { size });
    raw.add(std::mem::size_of::<AllocationHeader>()) as *mut c_void
}

pub unsafe extern "win64" fn HeapFree(_heap: *mut c_void, _flags: u32, mem: *mut c_void) -> i32 {
    if mem.is_null() {
        return 1;
    }
    let raw = (mem as *mut u8).sub(std::mem::size_of::<AllocationHeader>());
    let header = &*(raw as *const AllocationHeader);
    let layout = layout_for(header.size);
    dealloc(raw, layout);
    1
}

pub unsafe extern "win64" fn HeapReAlloc(
    heap: *mut c_void,
    flags: u32,
    mem: *mut c_void,
    size: usize,
) -> *mut c_void {
    if mem.is_null() {
        return HeapAlloc(heap, flags, size);
    }

    let raw = (mem as *mut u8).sub(std::mem::size_of::<AllocationHeader>());
    let old_size = (&*(raw as *const AllocationHeader)).size;
    let old_layout = layout_for(old_size);

    let new_raw = realloc(raw, old_layout, size + std::mem::size_of::<AllocationHeader>());
    if new_raw.is_null() {
        return ptr::null_mut();
    }
    (new_raw as *mut AllocationHeader).write(AllocationHeader { size });
    new_raw.add(std::mem::size_of::<AllocationHeader>()) as *mut c_void
}

pub unsafe extern "win64" fn VirtualAlloc(
    _address: *mut c_void,
    size: usize,
    _allocation_type: u32,
    _protect: u32,
) -> *mut c_void {
    HeapAlloc(GetProcessHeap(), HEAP_ZERO_MEMORY, size)
}

pub unsafe extern "win64" fn VirtualFree(address: *mut c_void, _size: usize, _free_type: u32) -> i32 {
    HeapFree(GetProcessHeap(), 0, address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_alloc_roundtrips_through_free() {
        unsafe {
            let p = HeapAlloc(GetProcessHeap(), HEAP_ZERO_MEMORY, 64);
            assert!(!p.is_null());
            let bytes = std::slice::from_raw_parts(p as *const u8, 64);
            assert!(bytes.iter().all(|&b| b == 0));
            assert_eq!(HeapFree(GetProcessHeap(), 0, p), 1);
        }
    }

    #[test]
    fn heap_realloc_preserves_and_grows() {
        unsafe {
            let p = HeapAlloc(GetProcessHeap(), 0, 8);
            *(p as *mut u64) = 0xdead_beef_cafe_babe;
            let p2 = HeapReAlloc(GetProcessHeap(), 0, p, 32);
            assert_eq!(*(p2 as *mut u64), 0xdead_beef_cafe_babe);
            HeapFree(GetProcessHeap(), 0, p2);
        }
    }
}
