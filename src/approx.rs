//! Approximate equality of numeric results.
//!
//! Kernels may reorder or widen accumulations, so their results are compared
//! against a reference with a tolerance instead of bit-for-bit. Each
//! comparison is graded as an [`ApproxEquality`]; sequences take the grade of
//! their worst element.

use half::f16;
use num_complex::Complex;

/// The max epsilon accepted on `f16`s.
pub const F16_MAX_ERROR: f32 = 5e-2;

/// The best expected epsilon accepted on `f16`s.
pub const F16_MIN_ERROR: f32 = 1e-3;

/// The max epsilon accepted on `f32`s.
pub const F32_MAX_ERROR: f32 = 1e-3;

/// The expected minimum epsilon accepted on `f32`s.
pub const F32_AVG_ERROR: f32 = 1e-5;

/// The best expected epsilon accepted on `f32`s.
pub const F32_MIN_ERROR: f32 = 1e-6;

/// The max epsilon accepted on `f64`s.
pub const F64_MAX_ERROR: f64 = 1e-3;

/// The expected minimum epsilon accepted on `f64`s.
pub const F64_AVG_ERROR: f64 = 1e-6;

/// The best expected epsilon accepted on `f64`s.
pub const F64_MIN_ERROR: f64 = 1e-13;

/// The approximated equality enumerated, best first.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Very strong epsilon.
    Precise = 0,

    /// Good epsilon.
    Partial = 1,

    /// Acceptable epsilon.
    Relative = 2,

    /// No relative equality.
    Scarce = 3,
}

impl ApproxEquality {
    /// Whether the values are close enough to count as equal.
    #[must_use]
    pub const fn is_acceptable(self) -> bool {
        !matches!(self, Self::Scarce)
    }

    fn grade<F: PartialOrd>(dif: F, min: F, avg: F, max: F) -> Self {
        if dif < min {
            Self::Precise
        } else if dif < avg {
            Self::Partial
        } else if dif < max {
            Self::Relative
        } else {
            Self::Scarce
        }
    }
}

/// Checks the relative distance based off epsilon.
pub trait RelativeEq<Rhs: ?Sized = Self> {
    /// Grades how close `self` is to `rhs`.
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

impl RelativeEq for f16 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        let dif = (self.to_f32() - rhs.to_f32()).abs();
        ApproxEquality::grade(dif, F16_MIN_ERROR, F16_MIN_ERROR, F16_MAX_ERROR)
    }
}

impl RelativeEq for f32 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        ApproxEquality::grade((self - rhs).abs(), F32_MIN_ERROR, F32_AVG_ERROR, F32_MAX_ERROR)
    }
}

impl RelativeEq for f64 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        ApproxEquality::grade((self - rhs).abs(), F64_MIN_ERROR, F64_AVG_ERROR, F64_MAX_ERROR)
    }
}

impl RelativeEq for i32 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        if self == rhs {
            ApproxEquality::Precise
        } else {
            ApproxEquality::Scarce
        }
    }
}

impl<T: RelativeEq> RelativeEq for Complex<T> {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        self.re.approx_eq(&rhs.re).max(self.im.approx_eq(&rhs.im))
    }
}

impl<T: RelativeEq> RelativeEq for [T] {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        let mut eq = ApproxEquality::Precise;
        for (a, b) in self.iter().zip(rhs) {
            eq = eq.max(a.approx_eq(b));
            if eq == ApproxEquality::Scarce {
                break;
            }
        }
        eq
    }
}

impl<T: RelativeEq> RelativeEq for Vec<T> {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        self.as_slice().approx_eq(rhs.as_slice())
    }
}

/// Approximates equality based off the relative difference.
///
/// Anything better than [`ApproxEquality::Scarce`] counts as equal.
pub fn approx_eq<A: RelativeEq<B> + ?Sized, B: ?Sized>(a: &A, b: &B) -> bool {
    a.approx_eq(b).is_acceptable()
}
