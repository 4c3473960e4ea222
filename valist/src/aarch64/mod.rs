//! The AArch64/Linux `va_list` layout and its two sides.
//!
//! AAPCS64 materializes a variadic call's unnamed arguments in three
//! regions: a 64-byte save area for the general-purpose argument registers
//! (x0..x7, one 8-byte slot each), a 128-byte save area for the SIMD
//! registers (q0..q7, one 16-byte slot each), and whatever overflowed onto
//! the caller's stack. The `va_list` struct describes all three with two
//! "top of area" pointers, two negative offsets counting up towards those
//! tops, and a pointer to the next stack argument.
//!
//! [VaList] consumes such an image, [VaListBuilder] produces one.

mod builder;
mod reader;

pub use builder::VaListBuilder;
pub use reader::VaList;

use static_assertions::const_assert_eq;
use std::cell::UnsafeCell;
use std::ptr;
use valayout::{FP_AREA_BYTES, GP_AREA_BYTES};

/// The native five-field `va_list` struct. Foreign code reads and writes
/// this memory directly, so field order, widths and the absence of padding
/// are part of the ABI contract, not an implementation choice.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawVaList {
    /// Address of the next stack-passed argument. Null only when no
    /// arguments were spilled to the stack.
    pub stack: *mut u8,
    /// One past the end of the GP register save area.
    pub gr_top: *mut u8,
    /// One past the end of the FP register save area.
    pub vr_top: *mut u8,
    /// Byte offset (always <= 0) of the next unconsumed GP slot, relative
    /// to `gr_top`. Zero means the GP area is exhausted.
    pub gr_offs: i32,
    /// Byte offset (always <= 0) of the next unconsumed FP slot, relative
    /// to `vr_top`. Zero means the FP area is exhausted.
    pub vr_offs: i32,
}

const_assert_eq!(std::mem::size_of::<RawVaList>(), 32);
const_assert_eq!(std::mem::offset_of!(RawVaList, stack), 0);
const_assert_eq!(std::mem::offset_of!(RawVaList, gr_top), 8);
const_assert_eq!(std::mem::offset_of!(RawVaList, vr_top), 16);
const_assert_eq!(std::mem::offset_of!(RawVaList, gr_offs), 24);
const_assert_eq!(std::mem::offset_of!(RawVaList, vr_offs), 28);

/// Descriptor for the canonical empty `va_list`: both register areas
/// reported exhausted, no stack area. One process-lifetime instance shared
/// by every empty reader and never freed. It is also never written: every
/// fetch from an empty list fails before a cursor moves.
struct EmptyDesc(UnsafeCell<RawVaList>);

unsafe impl Sync for EmptyDesc {}

static EMPTY_DESC: EmptyDesc = EmptyDesc(UnsafeCell::new(RawVaList {
    stack: ptr::null_mut(),
    gr_top: ptr::null_mut(),
    vr_top: ptr::null_mut(),
    gr_offs: 0,
    vr_offs: 0,
}));

pub(crate) fn empty_desc() -> *mut RawVaList {
    EMPTY_DESC.0.get()
}

/// Backing storage for a builder-produced `va_list`: the two register save
/// areas, the stack overflow buffer, the builder-owned copies behind
/// by-reference aggregates, and the descriptor itself. Readers hold this
/// via `Arc`; the regions outlive the last reader referencing them.
#[allow(dead_code)] // the regions are only ever read through descriptor pointers
pub(crate) struct VaImage {
    gp: Box<[u8]>,
    fp: Box<[u8]>,
    /// Backed by `u128` words so the base address is 16-byte aligned: the
    /// overflow area models the stack at a call boundary, and over-aligned
    /// arguments are placed by rounding up absolute addresses.
    stack: Box<[u128]>,
    refs: Vec<Box<[u8]>>,
    desc: *mut RawVaList,
}

impl VaImage {
    /// Move the finished regions to the heap and wire up a descriptor
    /// pointing at them. An empty `stack` buffer encodes "nothing spilled"
    /// as a null stack pointer.
    pub(crate) fn new(
        gp: [u8; GP_AREA_BYTES],
        fp: [u8; FP_AREA_BYTES],
        mut stack: Box<[u128]>,
        refs: Vec<Box<[u8]>>,
    ) -> VaImage {
        let mut gp: Box<[u8]> = Box::new(gp);
        let mut fp: Box<[u8]> = Box::new(fp);
        let desc = Box::into_raw(Box::new(RawVaList {
            stack: if stack.is_empty() {
                ptr::null_mut()
            } else {
                stack.as_mut_ptr() as *mut u8
            },
            gr_top: unsafe { gp.as_mut_ptr().add(GP_AREA_BYTES) },
            vr_top: unsafe { fp.as_mut_ptr().add(FP_AREA_BYTES) },
            gr_offs: -(GP_AREA_BYTES as i32),
            vr_offs: -(FP_AREA_BYTES as i32),
        }));
        VaImage {
            gp,
            fp,
            stack,
            refs,
            desc,
        }
    }

    pub(crate) fn desc(&self) -> *mut RawVaList {
        self.desc
    }
}

impl Drop for VaImage {
    fn drop(&mut self) {
        // The descriptor was leaked out of a Box in new().
        drop(unsafe { Box::from_raw(self.desc) });
    }
}
