//! Example host wrapper around `oo2core_6_win64.dll`'s compression
//! exports, adapted from `OodleWrapper` in the linoodle project this
//! loader was distilled from. Not part of the library crate; shows how
//! a consumer strings `linoodle::global` together with typed
//! `extern "win64"` function pointers for one specific DLL.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::sync::OnceLock;

use linoodle::global::instance;
use linoodle::tib;

type Decompress = unsafe extern "win64" fn(
    src_buf: *mut u8,
    src_len: usize,
    dst_buf: *mut u8,
    dst_len: usize,
    fuzz: i64,
    crc: i64,
    verbose: i64,
    dec_buf_base: *mut u8,
    dec_buf_size: usize,
    cb: *mut c_void,
    cb_ctx: *mut c_void,
    scratch: *mut c_void,
    scratch_size: usize,
    thread_phase: i64,
) -> usize;

type Compress = unsafe extern "win64" fn(
    codec: i64,
    src_buf: *mut u8,
    src_len: usize,
    dst_buf: *mut u8,
    level: i64,
    opts: *mut c_void,
    dictionary_base: *mut c_void,
    lrm: *mut c_void,
    scratch: *mut c_void,
    scratch_size: usize,
) -> usize;

type CompressOptionsGetDefault = unsafe extern "win64" fn(codec: i64, level: i64) -> *mut c_void;
type GetCompressedBufferSizeNeeded = unsafe extern "win64" fn(src_len: usize) -> usize;
type GetDecodeBufferSize = unsafe extern "win64" fn(src_len: usize, corruption_possible: c_int) -> usize;

struct OodleExports {
    decompress: Decompress,
    compress: Compress,
    compress_options_get_default: CompressOptionsGetDefault,
    get_compressed_buffer_size_needed: GetCompressedBufferSizeNeeded,
    get_decode_buffer_size: GetDecodeBufferSize,
}

fn exports() -> &'static OodleExports {
    static EXPORTS: OnceLock<OodleExports> = OnceLock::new();
    EXPORTS.get_or_init(|| {
        let lib = instance()
            .ensure_loaded("oo2core_6_win64.dll")
            .expect("failed to load oo2core_6_win64.dll");

        unsafe {
            OodleExports {
                decompress: lib
                    .get_export("OodleLZ_Decompress")
                    .expect("missing export OodleLZ_Decompress"),
                compress: lib
                    .get_export("OodleLZ_Compress")
                    .expect("missing export OodleLZ_Compress"),
                compress_options_get_default: lib
                    .get_export("OodleLZ_CompressOptions_GetDefault")
                    .expect("missing export OodleLZ_CompressOptions_GetDefault"),
                get_compressed_buffer_size_needed: lib
                    .get_export("OodleLZ_GetCompressedBufferSizeNeeded")
                    .expect("missing export OodleLZ_GetCompressedBufferSizeNeeded"),
                get_decode_buffer_size: lib
                    .get_export("OodleLZ_GetDecodeBufferSize")
                    .expect("missing export OodleLZ_GetDecodeBufferSize"),
            }
        }
    })
}

/// Safe-ish wrapper: installs the TIB on the calling thread, then calls
/// straight through to the DLL's export under the Microsoft x64 ABI.
#[allow(clippy::too_many_arguments)]
pub fn decompress(
    src: &[u8],
    dst: &mut [u8],
    fuzz: i64,
    crc: i64,
    verbose: i64,
    thread_phase: i64,
) -> usize {
    tib::setup_call();
    unsafe {
        (exports().decompress)(
            src.as_ptr() as *mut u8,
            src.len(),
            dst.as_mut_ptr(),
            dst.len(),
            fuzz,
            crc,
            verbose,
            std::ptr::null_mut(),
            0,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
            thread_phase,
        )
    }
}

#[allow(clippy::too_many_arguments)]
pub fn compress(codec: i64, src: &[u8], dst: &mut [u8], level: i64) -> usize {
    tib::setup_call();
    unsafe {
        (exports().compress)(
            codec,
            src.as_ptr() as *mut u8,
            src.len(),
            dst.as_mut_ptr(),
            level,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        )
    }
}

pub fn compress_options_get_default(codec: i64, level: i64) -> *mut c_void {
    tib::setup_call();
    unsafe { (exports().compress_options_get_default)(codec, level) }
}

pub fn get_compressed_buffer_size_needed(src_len: usize) -> usize {
    tib::setup_call();
    unsafe { (exports().get_compressed_buffer_size_needed)(src_len) }
}

pub fn get_decode_buffer_size(src_len: usize, corruption_possible: bool) -> usize {
    tib::setup_call();
    unsafe { (exports().get_decode_buffer_size)(src_len, corruption_possible as c_int) }
}

fn main() {
    env_logger::init();
    let needed = get_compressed_buffer_size_needed(4096);
    println!("OodleLZ_GetCompressedBufferSizeNeeded(4096) = {needed}");
}
