//! Tolerance-based comparison of fields.

use crate::Real;
use crate::grid::Grid;
use crate::storage::Field;

/// Largest error still rated [`ApproxEquality::Relative`].
pub const MAX_ERROR: Real = 1e-3;

/// The expected error of single-pass stencils.
pub const AVG_ERROR: Real = 1e-6;

/// The best expected error.
pub const MIN_ERROR: Real = 1e-12;

/// How close two values are.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Within [`MIN_ERROR`].
    Precise = 0,
    /// Within [`AVG_ERROR`].
    Partial = 1,
    /// Within [`MAX_ERROR`].
    Relative = 2,
    /// Not equal.
    Scarce = 3,
}

impl ApproxEquality {
    /// Rates the relative distance of `a` and `b`.
    #[must_use]
    pub fn rate(a: Real, b: Real) -> Self {
        let dif = relative_error(a, b);
        if dif < MIN_ERROR {
            Self::Precise
        } else if dif < AVG_ERROR {
            Self::Partial
        } else if dif < MAX_ERROR {
            Self::Relative
        } else {
            Self::Scarce
        }
    }
}

/// `|a - b|` scaled by the larger magnitude, or absolute below 1.
#[allow(clippy::float_cmp)]
fn relative_error(a: Real, b: Real) -> Real {
    if a == b {
        return 0.0;
    }
    (a - b).abs() / a.abs().max(b.abs()).max(1.0)
}

/// Compares a computed field against a reference over a grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verifier {
    precision: Real,
}

impl Verifier {
    /// A verifier accepting relative errors up to `precision`.
    #[must_use]
    pub const fn new(precision: Real) -> Self {
        Self { precision }
    }

    /// Accepted relative error.
    #[must_use]
    pub const fn precision(&self) -> Real {
        self.precision
    }

    /// Whether `actual` matches `expected` on every point of the grid's
    /// `i x j x k` box, excluding `halos[axis] = [low, high]` boundary widths.
    ///
    /// Fields whose extents differ, or that do not cover the box, never match.
    #[must_use]
    pub fn verify(&self, grid: &Grid, expected: &Field, actual: &Field, halos: [[usize; 2]; 3]) -> bool {
        if expected.dims() != actual.dims() || expected.is_temporary() || actual.is_temporary() {
            return false;
        }
        let dims = expected.dims();
        let totals = [grid.i.total, grid.j.total, grid.k_levels];
        if totals.iter().zip(dims).any(|(&t, d)| t > d) {
            return false;
        }
        let range = |axis: usize| halos[axis][0]..totals[axis].saturating_sub(halos[axis][1]);

        let mut mismatches = 0usize;
        let mut worst = ApproxEquality::Precise;
        for i in range(0) {
            for j in range(1) {
                for k in range(2) {
                    let (e, a) = (expected.get(i, j, k), actual.get(i, j, k));
                    worst = worst.max(ApproxEquality::rate(e, a));
                    let close = relative_error(e, a) <= self.precision;
                    if !close {
                        if mismatches == 0 {
                            tracing::warn!(field = %actual.name(), i, j, k, expected = e, actual = a, "verification mismatch");
                        }
                        mismatches += 1;
                    }
                }
            }
        }
        if mismatches > 0 {
            tracing::warn!(field = %actual.name(), mismatches, rating = ?worst, "verification failed");
        } else {
            tracing::debug!(field = %actual.name(), rating = ?worst, "verification passed");
        }
        mismatches == 0
    }
}
