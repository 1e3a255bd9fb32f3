//! Parallel CPU reference kernel.
//!
//! Column-major GEMM in plain Rust. Output columns are independent, so they
//! are computed in parallel with [`rayon`](https://docs.rs/rayon); each
//! column is a contiguous run of `m` elements in `out`.
//!
//! Accumulation happens in [`Element::Acc`], which keeps `f16` sums in `f32`
//! and `i32` sums in `i64` (wrapping back on store).

use super::{DoneCallback, Element, MatMulArgs, MatMulKernel};
use rayon::prelude::*;

/// The portable matmul kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuMatMul;

impl MatMulKernel for CpuMatMul {
    fn matmul<T: Element>(&self, args: MatMulArgs<T>, done: DoneCallback) {
        let (m, n, k) = (args.m, args.n, args.k);
        let (transpose_lhs, transpose_rhs) = (args.transpose_lhs, args.transpose_rhs);

        // SAFETY: the submitter of `args` keeps the buffers alive until `done`.
        let (out, lhs, rhs) = unsafe { args.into_slices() };
        column_major_matmul(out, lhs, rhs, m, n, k, transpose_lhs, transpose_rhs);
        done();
    }
}

/// Computes `out = op(lhs) · op(rhs)` on column-major slices.
///
/// # Panics
///
/// Panics if a slice is shorter than its dimensions require.
///
/// # Example
///
/// ```rust
/// use briny_rt::kernel::column_major_matmul;
///
/// // [1 3]   [5 7]   [23 31]
/// // [2 4] · [6 8] = [34 46]
/// let lhs = [1.0f32, 2.0, 3.0, 4.0];
/// let rhs = [5.0f32, 6.0, 7.0, 8.0];
/// let mut out = [0.0f32; 4];
/// column_major_matmul(&mut out, &lhs, &rhs, 2, 2, 2, false, false);
/// assert_eq!(out, [23.0, 34.0, 31.0, 46.0]);
/// ```
#[allow(clippy::too_many_arguments)]
pub fn column_major_matmul<T: Element>(
    out: &mut [T],
    lhs: &[T],
    rhs: &[T],
    m: usize,
    n: usize,
    k: usize,
    transpose_lhs: bool,
    transpose_rhs: bool,
) {
    assert!(out.len() >= m * n, "matmul output too small");
    assert!(lhs.len() >= m * k, "matmul lhs too small");
    assert!(rhs.len() >= k * n, "matmul rhs too small");

    if m == 0 || n == 0 {
        return;
    }

    out[..m * n]
        .par_chunks_mut(m)
        .enumerate()
        .for_each(|(j, column)| {
            for (i, slot) in column.iter_mut().enumerate() {
                let mut acc = T::zero();
                for l in 0..k {
                    let a = if transpose_lhs {
                        lhs[l + i * k]
                    } else {
                        lhs[i + l * m]
                    };
                    let b = if transpose_rhs {
                        rhs[j + l * n]
                    } else {
                        rhs[l + j * k]
                    };
                    acc = acc + a.widen() * b.widen();
                }
                *slot = T::narrow(acc);
            }
        });
}
