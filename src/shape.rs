//! Shapes, layouts and element types.
//!
//! # Data Model
//!
//! A [`Shape`] is an element type, a list of dimension sizes and a layout.
//! The layout is stored as `minor_to_major`: the first entry is the
//! dimension that varies fastest in memory. For a matrix `[rows, cols]`:
//!
//! - row-major is `minor_to_major = [1, 0]`
//! - column-major is `minor_to_major = [0, 1]`
//!
//! Shapes arrive already legalized by an upstream pass. The only checks done
//! here are structural (the layout must be a permutation of the dimensions)
//! and are expressed through [`briny`]'s [`Validate`] trait so that
//! [`TrustedData`](briny::prelude::TrustedData) can gate thunk creation.
//!
//! [`DotDimensionNumbers`] describes a contraction: paired batch dimensions
//! and exactly one contracting dimension per operand.

use briny::prelude::{Validate, ValidationError};
use core::fmt;

/// Element types understood by the runtime.
///
/// Only a subset is accepted by the dot thunk; see
/// [`crate::dot::DotThunk::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum PrimitiveType {
    /// Boolean predicate.
    PRED,
    /// Signed 8-bit integer.
    S8,
    /// Signed 16-bit integer.
    S16,
    /// Signed 32-bit integer.
    S32,
    /// Signed 64-bit integer.
    S64,
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// IEEE half precision float.
    F16,
    /// bfloat16.
    BF16,
    /// IEEE single precision float.
    F32,
    /// IEEE double precision float.
    F64,
    /// Complex number made of two `f32`.
    C64,
    /// Complex number made of two `f64`.
    C128,
}

impl PrimitiveType {
    /// Width of a single element in bytes.
    #[must_use]
    pub const fn byte_width(self) -> usize {
        match self {
            Self::PRED | Self::S8 | Self::U8 => 1,
            Self::S16 | Self::U16 | Self::F16 | Self::BF16 => 2,
            Self::S32 | Self::U32 | Self::F32 => 4,
            Self::S64 | Self::U64 | Self::F64 | Self::C64 => 8,
            Self::C128 => 16,
        }
    }

    /// Lowercase name, as printed in shapes and error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PRED => "pred",
            Self::S8 => "s8",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::S64 => "s64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::C64 => "c64",
            Self::C128 => "c128",
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An array shape: element type, dimension sizes and memory layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    element_type: PrimitiveType,
    dimensions: Vec<i64>,
    minor_to_major: Vec<i64>,
}

impl Shape {
    /// Creates a shape with an explicit `minor_to_major` layout.
    ///
    /// The layout is not checked here; [`Validate::validate`] does that.
    pub fn new(
        element_type: PrimitiveType,
        dimensions: impl Into<Vec<i64>>,
        minor_to_major: impl Into<Vec<i64>>,
    ) -> Self {
        Self {
            element_type,
            dimensions: dimensions.into(),
            minor_to_major: minor_to_major.into(),
        }
    }

    /// Creates a shape whose last dimension is minor-most.
    pub fn row_major(element_type: PrimitiveType, dimensions: impl Into<Vec<i64>>) -> Self {
        let dimensions = dimensions.into();
        let minor_to_major = (0..dimensions.len() as i64).rev().collect::<Vec<_>>();
        Self::new(element_type, dimensions, minor_to_major)
    }

    /// Creates a shape whose first dimension is minor-most.
    pub fn column_major(element_type: PrimitiveType, dimensions: impl Into<Vec<i64>>) -> Self {
        let dimensions = dimensions.into();
        let minor_to_major = (0..dimensions.len() as i64).collect::<Vec<_>>();
        Self::new(element_type, dimensions, minor_to_major)
    }

    /// Element type of the array.
    #[must_use]
    pub const fn element_type(&self) -> PrimitiveType {
        self.element_type
    }

    /// Number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// All dimension sizes, major-to-minor in logical order.
    #[must_use]
    pub fn dimensions(&self) -> &[i64] {
        &self.dimensions
    }

    /// Size of dimension `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn dimension(&self, index: usize) -> i64 {
        self.dimensions[index]
    }

    /// The layout, minor-most dimension first.
    #[must_use]
    pub fn minor_to_major(&self) -> &[i64] {
        &self.minor_to_major
    }

    /// The dimension at position `index` of `minor_to_major`.
    ///
    /// # Panics
    ///
    /// Panics if the layout has fewer than `index + 1` entries.
    #[must_use]
    pub fn minor(&self, index: usize) -> i64 {
        self.minor_to_major[index]
    }

    /// Total number of elements, or `None` if it overflows `i64`.
    #[must_use]
    pub fn element_count(&self) -> Option<i64> {
        self.dimensions
            .iter()
            .try_fold(1i64, |count, &dim| count.checked_mul(dim))
    }

    /// Total size in bytes.
    ///
    /// `None` if the count is negative or the size exceeds `isize::MAX`,
    /// the largest region a pointer offset can span.
    #[must_use]
    pub fn byte_size(&self) -> Option<usize> {
        let count = usize::try_from(self.element_count()?).ok()?;
        count
            .checked_mul(self.element_type.byte_width())
            .filter(|&size| isize::try_from(size).is_ok())
    }

    /// Removes the leading `count` dimensions, renumbering the layout.
    ///
    /// The relative minor-to-major order of the remaining dimensions is kept.
    #[must_use]
    pub fn strip_leading(&self, count: usize) -> Self {
        let offset = count as i64;
        Self {
            element_type: self.element_type,
            dimensions: self.dimensions[count..].to_vec(),
            minor_to_major: self
                .minor_to_major
                .iter()
                .filter(|&&dim| dim >= offset)
                .map(|&dim| dim - offset)
                .collect(),
        }
    }
}

impl Validate for Shape {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.minor_to_major.len() != self.dimensions.len() {
            return Err(ValidationError);
        }
        if self.dimensions.iter().any(|&dim| dim < 0) {
            return Err(ValidationError);
        }
        let mut seen = vec![false; self.dimensions.len()];
        for &dim in &self.minor_to_major {
            let Ok(index) = usize::try_from(dim) else {
                return Err(ValidationError);
            };
            match seen.get_mut(index) {
                Some(slot) if !*slot => *slot = true,
                _ => return Err(ValidationError),
            }
        }
        Ok(())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.element_type)?;
        for (i, dim) in self.dimensions.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]{")?;
        for (i, dim) in self.minor_to_major.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("}")
    }
}

/// Describes which operand dimensions a dot contracts and which it batches.
///
/// Batch dimensions are paired positionally: `lhs_batch_dimensions[i]` is
/// iterated together with `rhs_batch_dimensions[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DotDimensionNumbers {
    /// Batch dimensions of the left operand.
    pub lhs_batch_dimensions: Vec<i64>,
    /// Batch dimensions of the right operand.
    pub rhs_batch_dimensions: Vec<i64>,
    /// Contracting dimensions of the left operand.
    pub lhs_contracting_dimensions: Vec<i64>,
    /// Contracting dimensions of the right operand.
    pub rhs_contracting_dimensions: Vec<i64>,
}

impl DotDimensionNumbers {
    /// A plain (non-batched) contraction.
    #[must_use]
    pub fn matmul(lhs_contracting: i64, rhs_contracting: i64) -> Self {
        Self {
            lhs_contracting_dimensions: vec![lhs_contracting],
            rhs_contracting_dimensions: vec![rhs_contracting],
            ..Self::default()
        }
    }

    /// A contraction over operands with `batch` leading batch dimensions.
    ///
    /// Contracting indices are given in full-operand coordinates.
    #[must_use]
    pub fn batched(batch: usize, lhs_contracting: i64, rhs_contracting: i64) -> Self {
        let batch_dims = (0..batch as i64).collect::<Vec<_>>();
        Self {
            lhs_batch_dimensions: batch_dims.clone(),
            rhs_batch_dimensions: batch_dims,
            lhs_contracting_dimensions: vec![lhs_contracting],
            rhs_contracting_dimensions: vec![rhs_contracting],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_are_derived_from_majorness() {
        let row = Shape::row_major(PrimitiveType::F32, [2, 3, 4]);
        assert_eq!(row.minor_to_major(), &[2, 1, 0]);
        assert_eq!(row.minor(0), 2);

        let col = Shape::column_major(PrimitiveType::F32, [2, 3]);
        assert_eq!(col.minor_to_major(), &[0, 1]);
        assert_eq!(col.byte_size(), Some(24));
    }

    #[test]
    fn sizes_that_overflow_are_unrepresentable() {
        let wide = Shape::row_major(PrimitiveType::F32, [1 << 62, 1]);
        assert_eq!(wide.element_count(), Some(1 << 62));
        assert_eq!(wide.byte_size(), None);

        let wrapping = Shape::row_major(PrimitiveType::F32, [1 << 62, 4]);
        assert_eq!(wrapping.element_count(), None);
        assert_eq!(wrapping.byte_size(), None);

        let empty = Shape::row_major(PrimitiveType::F64, [0, 1 << 62]);
        assert_eq!(empty.byte_size(), Some(0));
    }

    #[test]
    fn stripping_batch_dims_keeps_relative_layout() {
        let shape = Shape::new(PrimitiveType::F64, [5, 2, 3], [1, 2, 0]);
        let stripped = shape.strip_leading(1);
        assert_eq!(stripped.dimensions(), &[2, 3]);
        assert_eq!(stripped.minor_to_major(), &[0, 1]);
    }

    #[test]
    fn validation_rejects_malformed_layouts() {
        assert!(Shape::row_major(PrimitiveType::S32, [4, 4]).validate().is_ok());
        assert!(Shape::new(PrimitiveType::S32, [4, 4], [0, 0]).validate().is_err());
        assert!(Shape::new(PrimitiveType::S32, [4, 4], [0]).validate().is_err());
        assert!(Shape::new(PrimitiveType::S32, [4, -1], [1, 0]).validate().is_err());
    }

    #[test]
    fn display_matches_compact_form() {
        let shape = Shape::row_major(PrimitiveType::C64, [2, 3]);
        assert_eq!(shape.to_string(), "c64[2,3]{1,0}");
        assert_eq!(PrimitiveType::C128.byte_width(), 16);
    }
}
