//! The producer side: packing typed values into a fresh `va_list` image.

use super::{VaImage, VaList};
use crate::log::log_abi;
use libc::c_void;
use std::sync::Arc;
use valayout::{
    align_up, ArgLayout, TypeClass, FP_AREA_BYTES, FP_SLOT_BYTES, GP_AREA_BYTES, GP_SLOT_BYTES,
    STACK_OVERALIGN_BYTES, STACK_SLOT_BYTES,
};

/// One argument bound for the stack overflow area: the exact bytes to
/// place (the raw struct for spilled aggregates, an 8-byte slot image for
/// scalars, the pointer for by-reference aggregates) and the alignment to
/// honor before writing.
struct PendingArg {
    bytes: Vec<u8>,
    align: usize,
}

/// Accumulates typed arguments and lays them out exactly as a variadic
/// caller would: up to eight slots per register class, everything after
/// that in order on the stack.
///
/// Building consumes the builder, so a finalized list can never be added
/// to; the two-state lifecycle is encoded in ownership rather than checked
/// at run time.
pub struct VaListBuilder {
    gp_area: [u8; GP_AREA_BYTES],
    fp_area: [u8; FP_AREA_BYTES],
    gp_used: usize,
    fp_used: usize,
    gp_spilled: bool,
    fp_spilled: bool,
    pending: Vec<PendingArg>,
    /// Builder-owned copies backing by-reference aggregates; the argument
    /// slot holds a pointer into one of these, so they must move into the
    /// image and live as long as it does.
    refs: Vec<Box<[u8]>>,
    next_arg: usize,
}

impl VaListBuilder {
    pub fn new() -> VaListBuilder {
        VaListBuilder {
            gp_area: [0; GP_AREA_BYTES],
            fp_area: [0; FP_AREA_BYTES],
            gp_used: 0,
            fp_used: 0,
            gp_spilled: false,
            fp_spilled: false,
            pending: Vec::new(),
            refs: Vec::new(),
            next_arg: 0,
        }
    }

    /// Append a C `int` argument.
    pub fn add_int(&mut self, v: i32) -> &mut VaListBuilder {
        let idx = self.claim_idx();
        let in_reg = self.push_gp_scalar(&v.to_ne_bytes());
        log_placement(idx, TypeClass::Integer, in_reg);
        self
    }

    /// Append a C `long` argument.
    pub fn add_long(&mut self, v: i64) -> &mut VaListBuilder {
        let idx = self.claim_idx();
        let in_reg = self.push_gp_scalar(&v.to_ne_bytes());
        log_placement(idx, TypeClass::Integer, in_reg);
        self
    }

    /// Append a pointer argument.
    pub fn add_pointer(&mut self, v: *const c_void) -> &mut VaListBuilder {
        let idx = self.claim_idx();
        let in_reg = self.push_gp_scalar(&(v as usize).to_ne_bytes());
        log_placement(idx, TypeClass::Pointer, in_reg);
        self
    }

    /// Append a C `double` argument.
    pub fn add_double(&mut self, v: f64) -> &mut VaListBuilder {
        let idx = self.claim_idx();
        let in_reg = self.push_fp_scalar(&v.to_ne_bytes());
        log_placement(idx, TypeClass::Float, in_reg);
        self
    }

    /// Append an aggregate argument. `value` must be exactly
    /// `layout.size()` bytes. By-reference aggregates are copied into
    /// builder-owned storage first, so `value` need not outlive the call.
    pub fn add_aggregate(&mut self, layout: &ArgLayout, value: &[u8]) -> &mut VaListBuilder {
        let class = layout.classify();
        let idx = self.claim_idx();
        assert!(
            value.len() == layout.size(),
            "argument {idx} ({class}): {} value bytes for a {}-byte layout",
            value.len(),
            layout.size()
        );
        let in_reg = match class {
            TypeClass::StructRegister => self.push_gp(value, layout.align()),
            TypeClass::StructHfa => self.push_fp_hfa(layout, value),
            TypeClass::StructReference => {
                let copy: Box<[u8]> = value.to_vec().into_boxed_slice();
                let p = copy.as_ptr() as usize;
                self.refs.push(copy);
                self.push_gp_scalar(&p.to_ne_bytes())
            }
            TypeClass::Integer | TypeClass::Pointer | TypeClass::Float => {
                panic!("argument {idx}: scalar layout ({class}) passed to add_aggregate")
            }
        };
        log_placement(idx, class, in_reg);
        self
    }

    /// Lay out the accumulated arguments as a `va_list` image and return
    /// the reader bound to it. A builder that never saw an argument yields
    /// the canonical empty list without allocating.
    ///
    /// Both register offsets in the descriptor cover the full reserved
    /// areas rather than the bytes actually written: slots no argument
    /// landed in are skipped-but-present, exactly as in a native register
    /// save area.
    pub fn build(self) -> VaList {
        if self.next_arg == 0 {
            return VaList::empty();
        }

        // Pass one: total overflow footprint, with per-argument alignment.
        let mut size = 0;
        for p in &self.pending {
            if p.align > STACK_SLOT_BYTES {
                size = align_up(size, STACK_OVERALIGN_BYTES);
            }
            size += align_up(p.bytes.len(), STACK_SLOT_BYTES);
        }

        // Pass two: write each argument in add order at its alignment. The
        // buffer is u128-backed so its base, like a stack pointer at a call
        // boundary, is 16-byte aligned; offset arithmetic here then agrees
        // with the absolute-address alignment the consumer performs.
        let mut stack =
            vec![0u128; align_up(size, STACK_OVERALIGN_BYTES) / STACK_OVERALIGN_BYTES]
                .into_boxed_slice();
        let base = stack.as_mut_ptr() as *mut u8;
        let mut off = 0;
        for p in &self.pending {
            if p.align > STACK_SLOT_BYTES {
                off = align_up(off, STACK_OVERALIGN_BYTES);
            }
            unsafe {
                std::ptr::copy_nonoverlapping(p.bytes.as_ptr(), base.add(off), p.bytes.len());
            }
            off += align_up(p.bytes.len(), STACK_SLOT_BYTES);
        }

        log_abi(|| format!("build: {} args, {size} overflow bytes", self.next_arg));
        let image = VaImage::new(self.gp_area, self.fp_area, stack, self.refs);
        VaList::from_image(Arc::new(image))
    }

    fn claim_idx(&mut self) -> usize {
        let idx = self.next_arg;
        self.next_arg += 1;
        idx
    }

    /// Place a scalar in one GP slot, zero-extended to the slot width.
    fn push_gp_scalar(&mut self, value: &[u8]) -> bool {
        let mut slot = [0u8; GP_SLOT_BYTES];
        slot[..value.len()].copy_from_slice(value);
        self.push_gp(&slot, STACK_SLOT_BYTES)
    }

    /// Claim consecutive GP slots for `bytes`, or spill. Returns whether
    /// the bytes landed in the register area. Placement never returns to
    /// the registers once an argument of this class has spilled, even if a
    /// later argument would fit: the save area is append-only.
    fn push_gp(&mut self, bytes: &[u8], align: usize) -> bool {
        let need = align_up(bytes.len(), GP_SLOT_BYTES);
        if !self.gp_spilled && self.gp_used + need <= GP_AREA_BYTES {
            self.gp_area[self.gp_used..self.gp_used + bytes.len()].copy_from_slice(bytes);
            self.gp_used += need;
            true
        } else {
            self.gp_spilled = true;
            self.pending.push(PendingArg {
                bytes: bytes.to_vec(),
                align,
            });
            false
        }
    }

    /// Place a double in the low half of one 16-byte FP slot, or spill it
    /// to a normal 8-byte stack slot.
    fn push_fp_scalar(&mut self, value: &[u8]) -> bool {
        if !self.fp_spilled && self.fp_used + FP_SLOT_BYTES <= FP_AREA_BYTES {
            self.fp_area[self.fp_used..self.fp_used + value.len()].copy_from_slice(value);
            self.fp_used += FP_SLOT_BYTES;
            true
        } else {
            self.fp_spilled = true;
            self.pending.push(PendingArg {
                bytes: value.to_vec(),
                align: STACK_SLOT_BYTES,
            });
            false
        }
    }

    /// Place an HFA with one member per 16-byte FP slot, or spill it to the
    /// stack as the plain contiguous struct.
    fn push_fp_hfa(&mut self, layout: &ArgLayout, value: &[u8]) -> bool {
        let need = layout.members().len() * FP_SLOT_BYTES;
        if !self.fp_spilled && self.fp_used + need <= FP_AREA_BYTES {
            let offs = layout.member_offsets();
            for (i, (m, off)) in layout.members().iter().zip(offs).enumerate() {
                let dst = self.fp_used + i * FP_SLOT_BYTES;
                self.fp_area[dst..dst + m.size()].copy_from_slice(&value[off..off + m.size()]);
            }
            self.fp_used += need;
            true
        } else {
            self.fp_spilled = true;
            self.pending.push(PendingArg {
                bytes: value.to_vec(),
                align: layout.align(),
            });
            false
        }
    }
}

impl Default for VaListBuilder {
    fn default() -> Self {
        VaListBuilder::new()
    }
}

fn log_placement(idx: usize, class: TypeClass, in_reg: bool) {
    log_abi(|| {
        format!(
            "add: arg {idx} ({class}) -> {}",
            if in_reg { "register" } else { "stack" }
        )
    });
}
