//! Typed matrix-multiply kernels.
//!
//! # Kernel Contract
//!
//! A [`MatMulKernel`] computes one column-major product
//! `out[m×n] = op(lhs)[m×k] · op(rhs)[k×n]`, where `op` optionally transposes
//! an operand:
//!
//! - `lhs` is stored `m×k` column-major, or `k×m` when `transpose_lhs`
//! - `rhs` is stored `k×n` column-major, or `n×k` when `transpose_rhs`
//!
//! The kernel receives raw pointers wrapped in [`MatMulArgs`] and calls its
//! `done` callback exactly once, from any thread, after `out` is written.
//! Row-major products are expressed by the caller through the identity
//! `(A·B)ᵀ = Bᵀ·Aᵀ`; kernels only ever see column-major data.
//!
//! # Element Types
//!
//! [`Element`] is implemented for every type the dot thunk dispatches on:
//! `half::f16`, `f32`, `f64`, `i32`, `Complex<f32>` and `Complex<f64>`.
//!
//! # Implementations
//!
//! - [`CpuMatMul`]: portable reference kernel, parallel over output columns
//!   with rayon.

mod cpu;

pub use self::cpu::{CpuMatMul, column_major_matmul};

use crate::shape::PrimitiveType;
use core::fmt::Debug;
use core::ops::{Add, Mul};
use half::f16;
use num_complex::Complex;

/// Called once a kernel invocation has finished writing its output.
pub type DoneCallback = Box<dyn FnOnce() + Send + 'static>;

/// A scalar type a kernel can multiply.
///
/// Products are accumulated in [`Element::Acc`], which may be wider than the
/// element itself.
pub trait Element: bytemuck::Pod + Debug + PartialEq + Send + Sync + 'static {
    /// The matching runtime element type.
    const TYPE: PrimitiveType;

    /// Accumulator type.
    type Acc: Copy + Add<Output = Self::Acc> + Mul<Output = Self::Acc>;

    /// The additive identity of the accumulator.
    fn zero() -> Self::Acc;

    /// Converts to the accumulator type.
    fn widen(self) -> Self::Acc;

    /// Converts an accumulated value back.
    fn narrow(acc: Self::Acc) -> Self;
}

impl Element for f16 {
    const TYPE: PrimitiveType = PrimitiveType::F16;
    type Acc = f32;

    fn zero() -> f32 {
        0.0
    }

    fn widen(self) -> f32 {
        self.to_f32()
    }

    fn narrow(acc: f32) -> Self {
        Self::from_f32(acc)
    }
}

impl Element for f32 {
    const TYPE: PrimitiveType = PrimitiveType::F32;
    type Acc = Self;

    fn zero() -> Self {
        0.0
    }

    fn widen(self) -> Self {
        self
    }

    fn narrow(acc: Self) -> Self {
        acc
    }
}

impl Element for f64 {
    const TYPE: PrimitiveType = PrimitiveType::F64;
    type Acc = Self;

    fn zero() -> Self {
        0.0
    }

    fn widen(self) -> Self {
        self
    }

    fn narrow(acc: Self) -> Self {
        acc
    }
}

impl Element for i32 {
    const TYPE: PrimitiveType = PrimitiveType::S32;
    // Wide enough that no intermediate product of two i32 overflows.
    type Acc = i64;

    fn zero() -> i64 {
        0
    }

    fn widen(self) -> i64 {
        i64::from(self)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn narrow(acc: i64) -> Self {
        acc as Self
    }
}

impl Element for Complex<f32> {
    const TYPE: PrimitiveType = PrimitiveType::C64;
    type Acc = Self;

    fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    fn widen(self) -> Self {
        self
    }

    fn narrow(acc: Self) -> Self {
        acc
    }
}

impl Element for Complex<f64> {
    const TYPE: PrimitiveType = PrimitiveType::C128;
    type Acc = Self;

    fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    fn widen(self) -> Self {
        self
    }

    fn narrow(acc: Self) -> Self {
        acc
    }
}

/// Raw operands of one matrix multiply.
///
/// Holds pointers rather than slices because the multiply runs on a pool
/// thread after the submitting call has returned.
pub struct MatMulArgs<T> {
    out: *mut T,
    lhs: *const T,
    rhs: *const T,
    /// Rows of `op(lhs)` and of `out`.
    pub m: usize,
    /// Columns of `op(rhs)` and of `out`.
    pub n: usize,
    /// Contracted dimension.
    pub k: usize,
    /// Whether `lhs` is stored transposed.
    pub transpose_lhs: bool,
    /// Whether `rhs` is stored transposed.
    pub transpose_rhs: bool,
}

// SAFETY: the pointers are only dereferenced through `into_slices`, whose
// caller guarantees validity on whatever thread it runs.
unsafe impl<T: Send + Sync> Send for MatMulArgs<T> {}

impl<T> MatMulArgs<T> {
    /// Bundles the operands of one multiply.
    ///
    /// # Safety
    ///
    /// Until the multiply finishes, `out` must be valid for writes of
    /// `m * n` elements and `lhs`/`rhs` valid for reads of `m * k` and
    /// `k * n` elements, all properly aligned, with `out` overlapping
    /// neither input.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn new(
        out: *mut T,
        lhs: *const T,
        rhs: *const T,
        m: usize,
        n: usize,
        k: usize,
        transpose_lhs: bool,
        transpose_rhs: bool,
    ) -> Self {
        Self {
            out,
            lhs,
            rhs,
            m,
            n,
            k,
            transpose_lhs,
            transpose_rhs,
        }
    }

    /// Borrows the operands as `(out, lhs, rhs)`.
    ///
    /// # Safety
    ///
    /// The guarantees given to [`MatMulArgs::new`] must still hold for `'a`.
    pub unsafe fn into_slices<'a>(self) -> (&'a mut [T], &'a [T], &'a [T]) {
        // SAFETY: forwarded to the caller, see above.
        unsafe {
            (
                core::slice::from_raw_parts_mut(self.out, self.m * self.n),
                core::slice::from_raw_parts(self.lhs, self.m * self.k),
                core::slice::from_raw_parts(self.rhs, self.k * self.n),
            )
        }
    }
}

impl<T> Debug for MatMulArgs<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MatMulArgs")
            .field("m", &self.m)
            .field("n", &self.n)
            .field("k", &self.k)
            .field("transpose_lhs", &self.transpose_lhs)
            .field("transpose_rhs", &self.transpose_rhs)
            .finish_non_exhaustive()
    }
}

/// A numeric library able to multiply matrices of every [`Element`] type.
pub trait MatMulKernel: Send + Sync + 'static {
    /// Computes `out = op(lhs) · op(rhs)` and then calls `done` once.
    fn matmul<T: Element>(&self, args: MatMulArgs<T>, done: DoneCallback);
}
