//! Matrix dimensions of a single (per-batch) dot.

use crate::shape::Shape;
use core::fmt;

/// Dimensions and layout decisions of one `[m×k] · [k×n]` multiply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatMulDims {
    /// Rows of the result.
    pub m: i64,
    /// Contracted size.
    pub k: i64,
    /// Columns of the result.
    pub n: i64,
    /// Whether the lhs matrix is stored column-major.
    pub lhs_column_major: bool,
    /// Whether lhs contracts its last dimension, so no transpose is needed.
    pub lhs_canonical: bool,
    /// Whether the rhs matrix is stored column-major.
    pub rhs_column_major: bool,
    /// Whether rhs contracts its first dimension, so no transpose is needed.
    pub rhs_canonical: bool,
}

impl fmt::Display for MatMulDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MatMulDims{{m:{}, k:{}, n:{}, lhs_column_major:{}, lhs_canonical:{}, \
             rhs_column_major:{}, rhs_canonical:{}}}",
            self.m,
            self.k,
            self.n,
            self.lhs_column_major,
            self.lhs_canonical,
            self.rhs_column_major,
            self.rhs_canonical,
        )
    }
}

/// Resolves the matmul dimensions of per-batch operand shapes.
///
/// Contracting indices are relative to the per-batch shapes, so each is 0
/// or 1. A rank-1 (or rank-0) lhs is a row vector (`m = 1`) and a rank-1 rhs
/// is a column vector (`n = 1`).
///
/// # Panics
///
/// Panics with a contract violation unless each operand has exactly one
/// contracting dimension with an index below 2. Descriptors are validated
/// when the thunk is created, so this indicates a caller bug.
///
/// # Example
///
/// ```rust
/// use briny_rt::dot::matmul_dims;
/// use briny_rt::shape::{PrimitiveType, Shape};
///
/// let lhs = Shape::row_major(PrimitiveType::F32, [2, 3]);
/// let rhs = Shape::row_major(PrimitiveType::F32, [3, 4]);
/// let dims = matmul_dims(&lhs, &[1], &rhs, &[0]);
///
/// assert_eq!((dims.m, dims.k, dims.n), (2, 3, 4));
/// assert!(dims.lhs_canonical && dims.rhs_canonical);
/// assert!(!dims.lhs_column_major);
/// ```
#[must_use]
pub fn matmul_dims(
    lhs_shape: &Shape,
    lhs_contracting_dims: &[i64],
    rhs_shape: &Shape,
    rhs_contracting_dims: &[i64],
) -> MatMulDims {
    let lhs_contracting = single_contracting_dim("lhs", lhs_contracting_dims);
    let rhs_contracting = single_contracting_dim("rhs", rhs_contracting_dims);

    let lhs_rank = lhs_shape.rank();
    let rhs_rank = rhs_shape.rank();

    MatMulDims {
        m: if lhs_rank <= 1 {
            1
        } else {
            lhs_shape.dimension(1 - lhs_contracting)
        },
        k: lhs_shape.dimension(lhs_contracting),
        n: if rhs_rank <= 1 {
            1
        } else {
            rhs_shape.dimension(1 - rhs_contracting)
        },
        lhs_column_major: lhs_rank > 1 && lhs_shape.minor(0) == 0,
        lhs_canonical: lhs_rank <= 1 || lhs_contracting == 1,
        rhs_column_major: rhs_rank > 1 && rhs_shape.minor(0) == 0,
        rhs_canonical: rhs_contracting == 0,
    }
}

fn single_contracting_dim(operand: &str, dims: &[i64]) -> usize {
    let [dim] = dims else {
        panic!(
            "contract violation: {operand} must have exactly one contracting dimension, got {}",
            dims.len()
        );
    };
    match usize::try_from(*dim) {
        Ok(index) if index < 2 => index,
        _ => panic!("contract violation: {operand} contracting dimension {dim} is not 0 or 1"),
    }
}
