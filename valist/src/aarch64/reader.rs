//! The consumer side: scanning typed arguments out of an existing
//! `va_list` image.

use super::{empty_desc, RawVaList, VaImage};
use crate::alloc::{ArgAllocator, HeapAllocator};
use crate::log::log_abi;
use libc::c_void;
use std::{cell::UnsafeCell, ptr, sync::Arc};
use valayout::{
    align_up, ArgLayout, TypeClass, FP_SLOT_BYTES, GP_SLOT_BYTES, STACK_OVERALIGN_BYTES,
    STACK_SLOT_BYTES,
};

/// Where the five cursor fields live.
enum Desc {
    /// A descriptor owned elsewhere: adopted via [VaList::from_address],
    /// produced by a builder (owned by the image), or the process-wide
    /// empty descriptor.
    Raw(*mut RawVaList),
    /// A descriptor deep-copied by [VaList::copy].
    Owned(Box<UnsafeCell<RawVaList>>),
}

/// Resolved source of one argument's bytes.
#[derive(Debug, Clone, Copy)]
enum ArgSource {
    /// Starts at this address in a register save area; HFA members sit
    /// [FP_SLOT_BYTES] apart.
    Reg(*const u8),
    /// Contiguous bytes in the stack overflow area.
    Stack(*const u8),
}

impl ArgSource {
    fn ptr(self) -> *const u8 {
        match self {
            ArgSource::Reg(p) | ArgSource::Stack(p) => p,
        }
    }
}

/// A `va_list` reader. Fetching advances the cursors held in descriptor
/// memory, exactly as `va_arg` would; for a descriptor adopted with
/// [VaList::from_address] that means the native `va_list` is advanced in
/// place.
///
/// Readers are deliberately neither `Send` nor `Sync`: a `va_list` is a
/// call-stack-local, single-threaded concept and cursor movement is not
/// atomic.
pub struct VaList {
    desc: Desc,
    /// Keeps builder-produced backing memory alive; copies share it.
    image: Option<Arc<VaImage>>,
    /// Index of the next argument this reader will consume. Only used to
    /// identify the failing argument in usage-error messages.
    next_arg: usize,
}

impl VaList {
    /// Adopt a native descriptor, e.g. one a foreign caller initialized
    /// with `va_start`.
    ///
    /// # Safety
    ///
    /// `addr` must point at a live, correctly initialized `va_list` whose
    /// backing regions outlive this reader. Nothing is validated; a
    /// descriptor pointing at foreign garbage is an upstream error this
    /// layer cannot detect.
    pub unsafe fn from_address(addr: *mut c_void) -> VaList {
        debug_assert!(!addr.is_null());
        VaList {
            desc: Desc::Raw(addr as *mut RawVaList),
            image: None,
            next_arg: 0,
        }
    }

    /// The canonical empty list: no arguments of any class. Fetching from
    /// it is a usage error and panics. No allocation is performed; all
    /// empty readers share one process-lifetime descriptor.
    pub fn empty() -> VaList {
        VaList {
            desc: Desc::Raw(empty_desc()),
            image: None,
            next_arg: 0,
        }
    }

    pub(crate) fn from_image(image: Arc<VaImage>) -> VaList {
        VaList {
            desc: Desc::Raw(image.desc()),
            image: Some(image),
            next_arg: 0,
        }
    }

    /// Address of the live descriptor, in the exact native `va_list`
    /// layout. Foreign code may read or write it; doing so moves this
    /// reader's cursors too.
    pub fn as_raw_ptr(&self) -> *mut c_void {
        self.raw() as *mut c_void
    }

    /// An independent reader resuming the scan from this reader's current
    /// position. The five descriptor fields are deep-copied into a fresh
    /// descriptor; the backing regions are shared, not cloned, and stay
    /// alive until the last reader referencing them goes away.
    pub fn copy(&self) -> VaList {
        let d = unsafe { ptr::read(self.raw()) };
        VaList {
            desc: Desc::Owned(Box::new(UnsafeCell::new(d))),
            image: self.image.clone(),
            next_arg: self.next_arg,
        }
    }

    /// Fetch the next argument as a C `int`.
    pub fn next_int(&mut self) -> i32 {
        let src = self.advance(&ArgLayout::INT32);
        unsafe { ptr::read_unaligned(src.ptr() as *const i32) }
    }

    /// Fetch the next argument as a C `long`.
    pub fn next_long(&mut self) -> i64 {
        let src = self.advance(&ArgLayout::INT64);
        unsafe { ptr::read_unaligned(src.ptr() as *const i64) }
    }

    /// Fetch the next argument as a C `double`.
    pub fn next_double(&mut self) -> f64 {
        let src = self.advance(&ArgLayout::FLOAT64);
        unsafe { ptr::read_unaligned(src.ptr() as *const f64) }
    }

    /// Fetch the next argument as a pointer.
    pub fn next_pointer(&mut self) -> *mut c_void {
        let src = self.advance(&ArgLayout::PTR);
        unsafe { ptr::read_unaligned(src.ptr() as *const usize) as *mut c_void }
    }

    /// Fetch the next aggregate argument into freshly heap-allocated
    /// storage.
    pub fn next_aggregate(&mut self, layout: &ArgLayout) -> Box<[u8]> {
        self.next_aggregate_in(layout, &mut HeapAllocator)
    }

    /// As [VaList::next_aggregate], with the destination supplied by
    /// `alloc`. The result never aliases the register or stack areas. For a
    /// by-reference aggregate the pointee is copied; that memory belongs to
    /// whoever produced the argument and is never freed here.
    pub fn next_aggregate_in<A: ArgAllocator>(
        &mut self,
        layout: &ArgLayout,
        alloc: &mut A,
    ) -> Box<[u8]> {
        let class = layout.classify();
        let idx = self.next_arg;
        if !matches!(
            class,
            TypeClass::StructRegister | TypeClass::StructHfa | TypeClass::StructReference
        ) {
            panic!("argument {idx}: scalar layout ({class}) passed to an aggregate fetch");
        }
        let src = self.advance(layout);
        let mut dst = alloc.allocate(layout.size(), layout.align());
        assert!(
            dst.len() == layout.size(),
            "argument {idx} ({class}): allocator returned {} bytes, layout needs {}",
            dst.len(),
            layout.size()
        );
        match (class, src) {
            // Packed in consecutive GP slots, or contiguous on the stack:
            // either way the bytes are contiguous.
            (TypeClass::StructRegister, src) => unsafe {
                ptr::copy_nonoverlapping(src.ptr(), dst.as_mut_ptr(), layout.size());
            },
            // One member per 16-byte register slot; repack at the members'
            // natural offsets.
            (TypeClass::StructHfa, ArgSource::Reg(p)) => {
                let offs = layout.member_offsets();
                for (i, (m, off)) in layout.members().iter().zip(offs).enumerate() {
                    unsafe {
                        ptr::copy_nonoverlapping(
                            p.add(i * FP_SLOT_BYTES),
                            dst.as_mut_ptr().add(off),
                            m.size(),
                        );
                    }
                }
            }
            // A spilled HFA is the plain contiguous struct.
            (TypeClass::StructHfa, ArgSource::Stack(p)) => unsafe {
                ptr::copy_nonoverlapping(p, dst.as_mut_ptr(), layout.size());
            },
            // The slot holds a pointer to externally-owned storage.
            (TypeClass::StructReference, src) => unsafe {
                let indirect = ptr::read_unaligned(src.ptr() as *const *const u8);
                ptr::copy_nonoverlapping(indirect, dst.as_mut_ptr(), layout.size());
            },
            (TypeClass::Integer | TypeClass::Pointer | TypeClass::Float, _) => unreachable!(),
        }
        dst
    }

    /// Advance past the given arguments without decoding them. Cursors move
    /// exactly as the equivalent fetches would, alignment and overflow
    /// handling included; a by-reference aggregate's pointer slot is
    /// consumed but never dereferenced.
    pub fn skip(&mut self, layouts: &[ArgLayout]) {
        for l in layouts {
            self.advance(l);
        }
    }

    /// Move the cursors past one argument of the given layout and resolve
    /// where its bytes live. Fetch and skip share this, so skipping always
    /// leaves subsequent fetches exactly where sequential fetching would.
    fn advance(&mut self, layout: &ArgLayout) -> ArgSource {
        let class = layout.classify();
        let idx = self.next_arg;
        self.next_arg += 1;
        let src = match class {
            TypeClass::Integer | TypeClass::Pointer => {
                self.consume_gp(GP_SLOT_BYTES, STACK_SLOT_BYTES, STACK_SLOT_BYTES, idx, class)
            }
            TypeClass::Float => {
                self.consume_fp(FP_SLOT_BYTES, STACK_SLOT_BYTES, STACK_SLOT_BYTES, idx, class)
            }
            TypeClass::StructRegister => self.consume_gp(
                layout.gp_slots() * GP_SLOT_BYTES,
                align_up(layout.size(), STACK_SLOT_BYTES),
                layout.align(),
                idx,
                class,
            ),
            TypeClass::StructHfa => self.consume_fp(
                layout.members().len() * FP_SLOT_BYTES,
                align_up(layout.size(), STACK_SLOT_BYTES),
                layout.align(),
                idx,
                class,
            ),
            // Only the pointer travels in the argument stream.
            TypeClass::StructReference => {
                self.consume_gp(GP_SLOT_BYTES, STACK_SLOT_BYTES, STACK_SLOT_BYTES, idx, class)
            }
        };
        log_abi(|| format!("fetch: arg {idx} ({class}) from {src:?}"));
        src
    }

    /// Claim `reg_bytes` from the GP save area, or fall through to the
    /// stack. An argument that doesn't fit in the remaining slots kills the
    /// whole area: registers are never revisited once an argument has gone
    /// to the stack.
    fn consume_gp(
        &mut self,
        reg_bytes: usize,
        stack_bytes: usize,
        stack_align: usize,
        idx: usize,
        class: TypeClass,
    ) -> ArgSource {
        let offs = self.gr_offs();
        if offs >= 0 {
            return self.consume_stack(stack_bytes, stack_align, idx, class);
        }
        let new = offs + i32::try_from(reg_bytes).unwrap();
        if new > 0 {
            self.set_gr_offs(0);
            return self.consume_stack(stack_bytes, stack_align, idx, class);
        }
        self.set_gr_offs(new);
        ArgSource::Reg(unsafe { self.gr_top().offset(isize::try_from(offs).unwrap()) })
    }

    /// FP twin of [VaList::consume_gp], with 16-byte slots.
    fn consume_fp(
        &mut self,
        reg_bytes: usize,
        stack_bytes: usize,
        stack_align: usize,
        idx: usize,
        class: TypeClass,
    ) -> ArgSource {
        let offs = self.vr_offs();
        if offs >= 0 {
            return self.consume_stack(stack_bytes, stack_align, idx, class);
        }
        let new = offs + i32::try_from(reg_bytes).unwrap();
        if new > 0 {
            self.set_vr_offs(0);
            return self.consume_stack(stack_bytes, stack_align, idx, class);
        }
        self.set_vr_offs(new);
        ArgSource::Reg(unsafe { self.vr_top().offset(isize::try_from(offs).unwrap()) })
    }

    /// Claim `nbytes` (already rounded to the 8-byte stack stride) from the
    /// overflow area, rounding the stack pointer up to 16 first when the
    /// argument is over-aligned.
    fn consume_stack(
        &mut self,
        nbytes: usize,
        align: usize,
        idx: usize,
        class: TypeClass,
    ) -> ArgSource {
        let mut sp = self.stack();
        if sp.is_null() {
            panic!("fetch of argument {idx} ({class}) from an exhausted va_list");
        }
        if align > STACK_SLOT_BYTES {
            sp = align_up_ptr(sp, STACK_OVERALIGN_BYTES);
        }
        self.set_stack(unsafe { sp.add(nbytes) });
        ArgSource::Stack(sp)
    }

    fn raw(&self) -> *mut RawVaList {
        match &self.desc {
            Desc::Raw(p) => *p,
            Desc::Owned(b) => b.get(),
        }
    }

    fn stack(&self) -> *mut u8 {
        unsafe { (*self.raw()).stack }
    }

    fn set_stack(&mut self, p: *mut u8) {
        unsafe { (*self.raw()).stack = p }
    }

    fn gr_top(&self) -> *mut u8 {
        unsafe { (*self.raw()).gr_top }
    }

    fn vr_top(&self) -> *mut u8 {
        unsafe { (*self.raw()).vr_top }
    }

    fn gr_offs(&self) -> i32 {
        unsafe { (*self.raw()).gr_offs }
    }

    fn set_gr_offs(&mut self, v: i32) {
        unsafe { (*self.raw()).gr_offs = v }
    }

    fn vr_offs(&self) -> i32 {
        unsafe { (*self.raw()).vr_offs }
    }

    fn set_vr_offs(&mut self, v: i32) {
        unsafe { (*self.raw()).vr_offs = v }
    }
}

fn align_up_ptr(p: *mut u8, align: usize) -> *mut u8 {
    let addr = p as usize;
    p.wrapping_add(align_up(addr, align) - addr)
}
