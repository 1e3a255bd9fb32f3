//! Batch decomposition of a dot.
//!
//! A dot over operands with `B` leading batch dimensions is executed as
//! `batch_size` independent matrix multiplies, where `batch_size` is the
//! product of those leading dimensions. [`DotShape`] holds the per-batch
//! shapes (batch dimensions removed, layouts renumbered) and the
//! contracting indices relative to them.

use super::dims::{MatMulDims, matmul_dims};
use crate::error::{Result, RuntimeError};
use crate::shape::{DotDimensionNumbers, Shape};
use briny::prelude::TrustedData;

/// Per-batch view of a dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotShape {
    /// Number of independent matrix multiplies.
    pub batch_size: usize,
    /// Lhs with batch dimensions removed.
    pub lhs_matmul_shape: Shape,
    /// Rhs with batch dimensions removed.
    pub rhs_matmul_shape: Shape,
    /// Output with batch dimensions removed.
    pub out_matmul_shape: Shape,
    /// Lhs contracting dimension in `lhs_matmul_shape` coordinates.
    pub lhs_contracting_dims: Vec<i64>,
    /// Rhs contracting dimension in `rhs_matmul_shape` coordinates.
    pub rhs_contracting_dims: Vec<i64>,
}

impl DotShape {
    /// Derives and validates the batch decomposition.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidArgument`] if:
    ///
    /// - a shape has a malformed layout or a negative dimension
    /// - a shape, or one batch element of it, spans more than `isize::MAX`
    ///   bytes
    /// - the operand element types differ
    /// - the lhs and rhs batch dimension lists differ in length, are not the
    ///   leading dimensions, or have mismatched sizes
    /// - an operand does not have exactly one contracting dimension
    /// - a per-batch operand or output has rank above 2
    /// - the contracted sizes differ, or the output does not hold
    ///   `batch_size * m * n` elements
    /// - the operands and output disagree on column-major layout
    pub fn new(
        dot_dimensions: &DotDimensionNumbers,
        lhs_shape: &Shape,
        rhs_shape: &Shape,
        out_shape: &Shape,
    ) -> Result<Self> {
        let lhs_shape = trusted(lhs_shape, "lhs")?;
        let rhs_shape = trusted(rhs_shape, "rhs")?;
        let out_shape = trusted(out_shape, "out")?;

        let element_type = lhs_shape.element_type();
        if rhs_shape.element_type() != element_type || out_shape.element_type() != element_type {
            return Err(RuntimeError::invalid_argument(format!(
                "dot element types differ: lhs {lhs_shape}, rhs {rhs_shape}, out {out_shape}"
            )));
        }

        let num_batch_dims = dot_dimensions.lhs_batch_dimensions.len();
        if dot_dimensions.rhs_batch_dimensions.len() != num_batch_dims {
            return Err(RuntimeError::invalid_argument(format!(
                "lhs has {num_batch_dims} batch dimensions but rhs has {}",
                dot_dimensions.rhs_batch_dimensions.len()
            )));
        }
        let leading = |dims: &[i64]| dims.iter().zip(0i64..).all(|(&dim, i)| dim == i);
        if !leading(&dot_dimensions.lhs_batch_dimensions)
            || !leading(&dot_dimensions.rhs_batch_dimensions)
        {
            return Err(RuntimeError::invalid_argument(
                "batch dimensions must be the leading dimensions",
            ));
        }

        for (name, shape) in [("lhs", &lhs_shape), ("rhs", &rhs_shape), ("out", &out_shape)] {
            let rank = shape.rank();
            if rank < num_batch_dims || rank - num_batch_dims > 2 {
                return Err(RuntimeError::invalid_argument(format!(
                    "{name} shape {shape} must have {num_batch_dims} batch dimensions \
                     followed by at most 2 matrix dimensions"
                )));
            }
            // Each batch element must be one contiguous matrix.
            let batch_major = shape.minor_to_major()[rank - num_batch_dims..]
                .iter()
                .all(|&dim| dim < num_batch_dims as i64);
            if !batch_major {
                return Err(RuntimeError::invalid_argument(format!(
                    "{name} shape {shape} must keep its batch dimensions major-most"
                )));
            }
            // A zero batch dimension hides an oversized matrix from the total.
            let per_batch = shape.strip_leading(num_batch_dims);
            if shape.byte_size().is_none() || per_batch.byte_size().is_none() {
                return Err(RuntimeError::invalid_argument(format!(
                    "{name} shape {shape} is too large to address"
                )));
            }
        }

        let mut batch_size = 1usize;
        for i in 0..num_batch_dims {
            let size = out_shape.dimension(i);
            if lhs_shape.dimension(i) != size || rhs_shape.dimension(i) != size {
                return Err(RuntimeError::invalid_argument(format!(
                    "batch dimension {i} differs: lhs {lhs_shape}, rhs {rhs_shape}, out {out_shape}"
                )));
            }
            batch_size = usize::try_from(size)
                .ok()
                .and_then(|size| batch_size.checked_mul(size))
                .ok_or_else(|| RuntimeError::invalid_argument("batch size overflows"))?;
        }

        let lhs_contracting_dims = per_batch_contracting(
            "lhs",
            &dot_dimensions.lhs_contracting_dimensions,
            num_batch_dims,
            lhs_shape.rank(),
        )?;
        let rhs_contracting_dims = per_batch_contracting(
            "rhs",
            &dot_dimensions.rhs_contracting_dimensions,
            num_batch_dims,
            rhs_shape.rank(),
        )?;

        let dot_shape = Self {
            batch_size,
            lhs_matmul_shape: lhs_shape.strip_leading(num_batch_dims),
            rhs_matmul_shape: rhs_shape.strip_leading(num_batch_dims),
            out_matmul_shape: out_shape.strip_leading(num_batch_dims),
            lhs_contracting_dims,
            rhs_contracting_dims,
        };
        dot_shape.check_matmul()?;
        Ok(dot_shape)
    }

    /// Resolves the per-batch matmul dimensions.
    #[must_use]
    pub fn matmul_dims(&self) -> MatMulDims {
        matmul_dims(
            &self.lhs_matmul_shape,
            &self.lhs_contracting_dims,
            &self.rhs_matmul_shape,
            &self.rhs_contracting_dims,
        )
    }

    fn check_matmul(&self) -> Result<()> {
        let dims = self.matmul_dims();

        let rhs_k = self.rhs_matmul_shape.dimension(contracting_index(&self.rhs_contracting_dims));
        if dims.k != rhs_k {
            return Err(RuntimeError::invalid_argument(format!(
                "contracted sizes differ: lhs {}, rhs {rhs_k}",
                dims.k
            )));
        }

        let result_count = dims.m.checked_mul(dims.n);
        if result_count.is_none() || self.out_matmul_shape.element_count() != result_count {
            return Err(RuntimeError::invalid_argument(format!(
                "output {} cannot hold a {}x{} result",
                self.out_matmul_shape, dims.m, dims.n
            )));
        }

        let out = &self.out_matmul_shape;
        let out_column_major = out.rank() > 1 && out.minor(0) == 0;
        let operands_agree = dims.lhs_column_major == dims.rhs_column_major;
        let out_agrees = out.rank() <= 1 || out_column_major == dims.lhs_column_major;
        if !operands_agree || !out_agrees {
            return Err(RuntimeError::invalid_argument(format!(
                "operands must share one layout: lhs {}, rhs {}, out {out}",
                self.lhs_matmul_shape, self.rhs_matmul_shape
            )));
        }
        Ok(())
    }
}

fn trusted(shape: &Shape, name: &str) -> Result<Shape> {
    TrustedData::new(shape.clone())
        .map(TrustedData::into_inner)
        .map_err(|_| RuntimeError::invalid_argument(format!("{name} shape {shape} is malformed")))
}

fn per_batch_contracting(
    name: &str,
    dims: &[i64],
    num_batch_dims: usize,
    rank: usize,
) -> Result<Vec<i64>> {
    let [dim] = dims else {
        return Err(RuntimeError::invalid_argument(format!(
            "{name} must have exactly one contracting dimension, got {}",
            dims.len()
        )));
    };
    let per_batch_rank = rank - num_batch_dims;
    match usize::try_from(*dim) {
        Ok(index) if index >= num_batch_dims && index - num_batch_dims < per_batch_rank => {
            Ok(vec![(index - num_batch_dims) as i64])
        }
        _ => Err(RuntimeError::invalid_argument(format!(
            "{name} contracting dimension {dim} is not a matrix dimension"
        ))),
    }
}

// Only called on indices already checked by `per_batch_contracting`.
fn contracting_index(dims: &[i64]) -> usize {
    dims.first()
        .and_then(|&dim| usize::try_from(dim).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::PrimitiveType::{F32, S8};

    #[test]
    fn unbatched_dot_has_batch_size_one() {
        let shape = DotShape::new(
            &DotDimensionNumbers::matmul(1, 0),
            &Shape::row_major(F32, [2, 3]),
            &Shape::row_major(F32, [3, 4]),
            &Shape::row_major(F32, [2, 4]),
        )
        .unwrap();
        assert_eq!(shape.batch_size, 1);
        assert_eq!(shape.lhs_contracting_dims, vec![1]);
        let dims = shape.matmul_dims();
        assert_eq!((dims.m, dims.k, dims.n), (2, 3, 4));
    }

    #[test]
    fn batch_dims_are_stripped_and_contracting_dims_rebased() {
        let shape = DotShape::new(
            &DotDimensionNumbers::batched(2, 2, 3),
            &Shape::row_major(F32, [2, 5, 4, 3]),
            &Shape::row_major(F32, [2, 5, 6, 4]),
            &Shape::row_major(F32, [2, 5, 3, 6]),
        )
        .unwrap();
        assert_eq!(shape.batch_size, 10);
        assert_eq!(shape.lhs_matmul_shape.dimensions(), &[4, 3]);
        assert_eq!(shape.lhs_matmul_shape.minor_to_major(), &[1, 0]);
        assert_eq!(shape.lhs_contracting_dims, vec![0]);
        assert_eq!(shape.rhs_contracting_dims, vec![1]);
        let dims = shape.matmul_dims();
        assert_eq!((dims.m, dims.k, dims.n), (3, 4, 6));
    }

    #[test]
    fn element_types_need_not_be_supported_by_kernels() {
        let shape = DotShape::new(
            &DotDimensionNumbers::matmul(1, 0),
            &Shape::row_major(S8, [2, 2]),
            &Shape::row_major(S8, [2, 2]),
            &Shape::row_major(S8, [2, 2]),
        );
        assert!(shape.is_ok());
    }

    #[test]
    fn rejects_invalid_descriptors() {
        let lhs = Shape::row_major(F32, [2, 3]);
        let rhs = Shape::row_major(F32, [3, 4]);
        let out = Shape::row_major(F32, [2, 4]);
        let is_invalid = |numbers: &DotDimensionNumbers, l: &Shape, r: &Shape, o: &Shape| {
            matches!(
                DotShape::new(numbers, l, r, o),
                Err(RuntimeError::InvalidArgument(_))
            )
        };
        let plain = DotDimensionNumbers::matmul(1, 0);

        // k mismatch
        assert!(is_invalid(&plain, &lhs, &Shape::row_major(F32, [4, 4]), &out));
        // output too small
        assert!(is_invalid(&plain, &lhs, &rhs, &Shape::row_major(F32, [2, 3])));
        // element types differ
        assert!(is_invalid(&plain, &lhs, &Shape::row_major(S8, [3, 4]), &out));
        // two contracting dims
        let mut two = plain.clone();
        two.lhs_contracting_dimensions.push(0);
        assert!(is_invalid(&two, &lhs, &rhs, &out));
        // non-leading batch dims
        let mut trailing = DotDimensionNumbers::batched(1, 2, 1);
        trailing.lhs_batch_dimensions = vec![1];
        let batched = Shape::row_major(F32, [2, 2, 2]);
        assert!(is_invalid(&trailing, &batched, &batched, &batched));
        // interleaved batches
        let interleaved = Shape::column_major(F32, [2, 2, 2]);
        let per_batch = DotDimensionNumbers::batched(1, 2, 1);
        assert!(is_invalid(&per_batch, &interleaved, &interleaved, &interleaved));
        let contiguous = Shape::new(F32, [2, 2, 2], [1, 2, 0]);
        assert!(DotShape::new(&per_batch, &contiguous, &contiguous, &contiguous).is_ok());
        // rank above 2 per batch
        assert!(is_invalid(&plain, &batched, &rhs, &out));
        // mixed layouts
        assert!(is_invalid(&plain, &lhs, &Shape::column_major(F32, [3, 4]), &out));
        // malformed layout
        assert!(is_invalid(&plain, &Shape::new(F32, [2, 3], [0, 0]), &rhs, &out));
    }

    #[test]
    fn rejects_shapes_too_large_to_address() {
        let is_invalid = |numbers: &DotDimensionNumbers, l: &[i64], r: &[i64], o: &[i64]| {
            matches!(
                DotShape::new(
                    numbers,
                    &Shape::row_major(F32, l),
                    &Shape::row_major(F32, r),
                    &Shape::row_major(F32, o),
                ),
                Err(RuntimeError::InvalidArgument(_))
            )
        };

        // 2^64 output elements wrap to zero without checked arithmetic.
        let plain = DotDimensionNumbers::matmul(1, 0);
        assert!(is_invalid(&plain, &[1 << 62, 1], &[1, 4], &[1 << 62, 4]));
        assert!(is_invalid(&plain, &[1 << 61, 1], &[1, 1], &[1 << 61, 1]));

        // An empty batch does not excuse an oversized matrix.
        let batched = DotDimensionNumbers::batched(1, 2, 1);
        assert!(is_invalid(
            &batched,
            &[0, 1 << 40, 1],
            &[0, 1, 1 << 40],
            &[0, 1 << 40, 1 << 40]
        ));
        assert!(!is_invalid(&batched, &[0, 2, 1], &[0, 1, 2], &[0, 2, 2]));
    }
}
