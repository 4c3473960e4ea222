//! Emulation of the native `va_list` calling-convention machinery.
//!
//! A variadic call on AArch64/Linux leaves its arguments in three memory
//! regions (a general-purpose register save area, a SIMD/floating-point
//! register save area and an overflow area on the stack) and describes them
//! with a five-field `va_list` struct. This crate reimplements both sides of
//! that contract in host memory: a reader that consumes an existing
//! `va_list` image cursor by cursor, and a builder that packs typed values
//! into a fresh image a reader (or native callee) can consume.
//!
//! Only the AArch64 convention is implemented. The per-architecture module
//! layout leaves room for siblings sharing the same surface, selected at
//! build time; nothing here requires runtime dispatch because a build
//! targets exactly one convention.

pub mod aarch64;
pub mod alloc;
mod log;

pub use aarch64::{RawVaList, VaList, VaListBuilder};
