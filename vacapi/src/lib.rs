//! This crate exports the va_list emulation layer via the C ABI, for the
//! native-call glue that sits between foreign variadic callees and the Rust
//! implementation.
//!
//! We use a dedicated crate for exporting to C, as you quickly get into
//! linkage trouble if you try and mix Rust dynamic libraries: the sane
//! solution is one `cdylib` crate in the workspace (this one) with all
//! other crates as regular `rlib`s.
//!
//! Handles are plain `Box`-allocated pointers. Passing a null or dangling
//! handle is a caller error; debug builds assert, release builds follow the
//! usual C contract (undefined behavior upstream).

use libc::c_void;
use valist::{VaList, VaListBuilder};

#[no_mangle]
pub extern "C" fn valist_builder_new() -> *mut VaListBuilder {
    Box::into_raw(Box::new(VaListBuilder::new()))
}

#[no_mangle]
pub extern "C" fn valist_builder_add_int(b: *mut VaListBuilder, v: i32) {
    debug_assert!(!b.is_null());
    unsafe { &mut *b }.add_int(v);
}

#[no_mangle]
pub extern "C" fn valist_builder_add_long(b: *mut VaListBuilder, v: i64) {
    debug_assert!(!b.is_null());
    unsafe { &mut *b }.add_long(v);
}

#[no_mangle]
pub extern "C" fn valist_builder_add_double(b: *mut VaListBuilder, v: f64) {
    debug_assert!(!b.is_null());
    unsafe { &mut *b }.add_double(v);
}

#[no_mangle]
pub extern "C" fn valist_builder_add_ptr(b: *mut VaListBuilder, v: *const c_void) {
    debug_assert!(!b.is_null());
    unsafe { &mut *b }.add_pointer(v);
}

/// Finalize the builder into a `va_list` reader. Consumes and frees the
/// builder handle: it must not be used again after this call.
#[no_mangle]
pub extern "C" fn valist_builder_build(b: *mut VaListBuilder) -> *mut VaList {
    debug_assert!(!b.is_null());
    let b = unsafe { Box::from_raw(b) };
    Box::into_raw(Box::new(b.build()))
}

/// Free a builder without building it.
#[no_mangle]
pub extern "C" fn valist_builder_drop(b: *mut VaListBuilder) {
    debug_assert!(!b.is_null());
    drop(unsafe { Box::from_raw(b) });
}

/// Wrap a native `va_list` (e.g. one initialized by `va_start` in foreign
/// code) in a reader. Fetching through the reader advances the native
/// `va_list` in place.
#[no_mangle]
pub unsafe extern "C" fn valist_from_address(addr: *mut c_void) -> *mut VaList {
    debug_assert!(!addr.is_null());
    Box::into_raw(Box::new(unsafe { VaList::from_address(addr) }))
}

/// The canonical empty `va_list`: fetching from it aborts.
#[no_mangle]
pub extern "C" fn valist_empty() -> *mut VaList {
    Box::into_raw(Box::new(VaList::empty()))
}

#[no_mangle]
pub extern "C" fn valist_next_int(vl: *mut VaList) -> i32 {
    debug_assert!(!vl.is_null());
    unsafe { &mut *vl }.next_int()
}

#[no_mangle]
pub extern "C" fn valist_next_long(vl: *mut VaList) -> i64 {
    debug_assert!(!vl.is_null());
    unsafe { &mut *vl }.next_long()
}

#[no_mangle]
pub extern "C" fn valist_next_double(vl: *mut VaList) -> f64 {
    debug_assert!(!vl.is_null());
    unsafe { &mut *vl }.next_double()
}

#[no_mangle]
pub extern "C" fn valist_next_ptr(vl: *mut VaList) -> *mut c_void {
    debug_assert!(!vl.is_null());
    unsafe { &mut *vl }.next_pointer()
}

/// `va_copy`: an independent reader resuming from the source's current
/// position, sharing the backing regions.
#[no_mangle]
pub extern "C" fn valist_copy(vl: *const VaList) -> *mut VaList {
    debug_assert!(!vl.is_null());
    Box::into_raw(Box::new(unsafe { &*vl }.copy()))
}

/// Address of the live descriptor in the native `va_list` layout.
#[no_mangle]
pub extern "C" fn valist_raw(vl: *const VaList) -> *mut c_void {
    debug_assert!(!vl.is_null());
    unsafe { &*vl }.as_raw_ptr()
}

#[no_mangle]
pub extern "C" fn valist_drop(vl: *mut VaList) {
    debug_assert!(!vl.is_null());
    drop(unsafe { Box::from_raw(vl) });
}
