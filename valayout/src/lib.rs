//! Argument layout descriptions and the AAPCS64 passing-class rules.
//!
//! This crate knows nothing about `va_list` memory images. It only answers
//! one question: given the shape of a single argument (scalar width and
//! alignment, or an aggregate's member layouts), which passing class does
//! the AArch64 procedure-call standard assign it? The consumer and producer
//! sides of the `va_list` emulation both dispatch on the answer.

use strum_macros::Display;
use thiserror::Error;

/// Size in bytes of one general-purpose register slot in the register save
/// area (x0..x7).
pub const GP_SLOT_BYTES: usize = 8;

/// Size in bytes of one SIMD/floating-point register slot in the register
/// save area (q0..q7). The full 128-bit register is saved even though
/// variadic floats only ever occupy the low 64 bits.
pub const FP_SLOT_BYTES: usize = 16;

/// Number of registers of each class available to variadic arguments.
pub const MAX_REG_ARGS: usize = 8;

/// Total size of the general-purpose register save area.
pub const GP_AREA_BYTES: usize = MAX_REG_ARGS * GP_SLOT_BYTES;

/// Total size of the SIMD/floating-point register save area.
pub const FP_AREA_BYTES: usize = MAX_REG_ARGS * FP_SLOT_BYTES;

/// Aggregates up to this size are packed across consecutive GP registers.
pub const MAX_STRUCT_REGISTER_BYTES: usize = 16;

/// Upper bound on the total size of a homogeneous floating-point aggregate.
pub const MAX_HFA_BYTES: usize = 32;

/// A homogeneous floating-point aggregate has at most this many members.
pub const MAX_HFA_MEMBERS: usize = 4;

/// Each member of a homogeneous floating-point aggregate is at most this
/// wide.
pub const MAX_HFA_MEMBER_BYTES: usize = 8;

/// Stack-passed arguments advance the stack pointer in multiples of this.
pub const STACK_SLOT_BYTES: usize = 8;

/// An argument whose alignment exceeds [STACK_SLOT_BYTES] is placed at an
/// address rounded up to this before being read from or written to the
/// stack.
pub const STACK_OVERALIGN_BYTES: usize = 16;

/// Round `val` up to the next multiple of `align` (a power of two).
pub fn align_up(val: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (val + align - 1) & !(align - 1)
}

/// A malformed argument layout. Layouts are validated on construction, so
/// the rest of the crate can treat every [ArgLayout] it sees as well-formed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LayoutError {
    #[error("unsupported scalar size: {0} bytes")]
    ScalarSize(usize),
    #[error("aggregate has no members")]
    EmptyAggregate,
    #[error("alignment {0} is not a power of two <= 16")]
    BadAlignment(usize),
    #[error("size {size} too small for members (natural size {natural})")]
    SizeTooSmall { size: usize, natural: usize },
    #[error("size {size} is not a multiple of alignment {align}")]
    SizeNotAligned { size: usize, align: usize },
}

/// The shape of one argument: a machine scalar, or an aggregate with an
/// ordered member list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutKind {
    Integer,
    Pointer,
    Float,
    Aggregate(Vec<ArgLayout>),
}

/// Describes one variadic argument's size, alignment and shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgLayout {
    size: usize,
    align: usize,
    kind: LayoutKind,
}

/// The ABI passing class of an argument, as mandated by AAPCS64. The byte
/// thresholds behind this classification ([MAX_STRUCT_REGISTER_BYTES] and
/// friends) are part of the calling-convention contract.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    /// A scalar integer, passed in one GP register slot.
    Integer,
    /// A pointer, passed in one GP register slot.
    Pointer,
    /// A scalar float or double, passed in one FP register slot.
    Float,
    /// A small all-integer aggregate, packed across one or two consecutive
    /// GP register slots.
    StructRegister,
    /// A homogeneous floating-point aggregate: each member gets its own FP
    /// register slot.
    StructHfa,
    /// A large or irregular aggregate, passed by pointer in one GP register
    /// slot. The backing storage belongs to whoever produced the argument.
    StructReference,
}

impl ArgLayout {
    /// A C `int` as passed variadically (one GP slot, low four bytes).
    pub const INT32: ArgLayout = ArgLayout {
        size: 4,
        align: 4,
        kind: LayoutKind::Integer,
    };

    /// A C `long`/`long long` on LP64.
    pub const INT64: ArgLayout = ArgLayout {
        size: 8,
        align: 8,
        kind: LayoutKind::Integer,
    };

    /// A C `double`. `float` never appears variadically (default argument
    /// promotion widens it).
    pub const FLOAT64: ArgLayout = ArgLayout {
        size: 8,
        align: 8,
        kind: LayoutKind::Float,
    };

    /// Any data or function pointer.
    pub const PTR: ArgLayout = ArgLayout {
        size: 8,
        align: 8,
        kind: LayoutKind::Pointer,
    };

    /// A scalar integer of `size` bytes (1, 2, 4 or 8), naturally aligned.
    pub fn integer(size: usize) -> Result<ArgLayout, LayoutError> {
        match size {
            1 | 2 | 4 | 8 => Ok(ArgLayout {
                size,
                align: size,
                kind: LayoutKind::Integer,
            }),
            _ => Err(LayoutError::ScalarSize(size)),
        }
    }

    /// A pointer-width layout.
    pub fn pointer() -> ArgLayout {
        Self::PTR
    }

    /// A scalar float of `size` bytes (4 or 8), naturally aligned.
    pub fn float(size: usize) -> Result<ArgLayout, LayoutError> {
        match size {
            4 | 8 => Ok(ArgLayout {
                size,
                align: size,
                kind: LayoutKind::Float,
            }),
            _ => Err(LayoutError::ScalarSize(size)),
        }
    }

    /// An aggregate laid out by the natural C rules: each member at its own
    /// alignment, total size rounded up to the aggregate alignment.
    pub fn aggregate(members: Vec<ArgLayout>) -> Result<ArgLayout, LayoutError> {
        let (natural_size, natural_align) = natural_layout(&members)?;
        Ok(ArgLayout {
            size: align_up(natural_size, natural_align),
            align: natural_align,
            kind: LayoutKind::Aggregate(members),
        })
    }

    /// An aggregate with an explicit size and alignment, for shapes with
    /// trailing padding or over-alignment. Validated against the members'
    /// natural layout.
    pub fn aggregate_with(
        size: usize,
        align: usize,
        members: Vec<ArgLayout>,
    ) -> Result<ArgLayout, LayoutError> {
        let (natural_size, natural_align) = natural_layout(&members)?;
        if !align.is_power_of_two() || align > 16 || align < natural_align {
            return Err(LayoutError::BadAlignment(align));
        }
        if size < natural_size {
            return Err(LayoutError::SizeTooSmall {
                size,
                natural: natural_size,
            });
        }
        if size % align != 0 {
            return Err(LayoutError::SizeNotAligned { size, align });
        }
        Ok(ArgLayout {
            size,
            align,
            kind: LayoutKind::Aggregate(members),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn align(&self) -> usize {
        self.align
    }

    pub fn kind(&self) -> &LayoutKind {
        &self.kind
    }

    /// The aggregate's members, or an empty slice for scalars.
    pub fn members(&self) -> &[ArgLayout] {
        match &self.kind {
            LayoutKind::Aggregate(ms) => ms,
            _ => &[],
        }
    }

    /// Natural byte offset of each member within the aggregate.
    pub fn member_offsets(&self) -> Vec<usize> {
        let mut offs = Vec::with_capacity(self.members().len());
        let mut off = 0;
        for m in self.members() {
            off = align_up(off, m.align);
            offs.push(off);
            off += m.size;
        }
        offs
    }

    /// Number of 8-byte GP register slots this layout occupies when packed
    /// into the GP save area.
    pub fn gp_slots(&self) -> usize {
        align_up(self.size, GP_SLOT_BYTES) / GP_SLOT_BYTES
    }

    /// Determine this layout's ABI passing class. Pure and deterministic:
    /// the same layout always classifies the same way, and every layout
    /// constructible through this crate's API classifies successfully.
    pub fn classify(&self) -> TypeClass {
        match &self.kind {
            LayoutKind::Integer => TypeClass::Integer,
            LayoutKind::Pointer => TypeClass::Pointer,
            LayoutKind::Float => TypeClass::Float,
            LayoutKind::Aggregate(members) => {
                if is_hfa(self.size, members) {
                    TypeClass::StructHfa
                } else if self.size <= MAX_STRUCT_REGISTER_BYTES && all_leaves_integer(members) {
                    TypeClass::StructRegister
                } else {
                    TypeClass::StructReference
                }
            }
        }
    }
}

fn natural_layout(members: &[ArgLayout]) -> Result<(usize, usize), LayoutError> {
    if members.is_empty() {
        return Err(LayoutError::EmptyAggregate);
    }
    let mut off = 0;
    let mut align = 1;
    for m in members {
        off = align_up(off, m.align);
        off += m.size;
        align = align.max(m.align);
    }
    Ok((off, align))
}

/// The homogeneous floating-point aggregate rule: up to
/// [MAX_HFA_MEMBERS] members, every one a float scalar of at most
/// [MAX_HFA_MEMBER_BYTES] bytes.
fn is_hfa(size: usize, members: &[ArgLayout]) -> bool {
    size <= MAX_HFA_BYTES
        && members.len() <= MAX_HFA_MEMBERS
        && members.iter().all(|m| {
            matches!(m.kind, LayoutKind::Float) && m.size <= MAX_HFA_MEMBER_BYTES
        })
}

fn all_leaves_integer(members: &[ArgLayout]) -> bool {
    members.iter().all(|m| match &m.kind {
        LayoutKind::Integer | LayoutKind::Pointer => true,
        LayoutKind::Float => false,
        LayoutKind::Aggregate(ms) => all_leaves_integer(ms),
    })
}
