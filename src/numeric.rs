//! Floating point addition with optional cancellation guards.

use serde::{Deserialize, Serialize};

/// How additions (and therefore dot products) treat results that are tiny compared to
/// their operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StabilityMode {
    /// Plain floating point addition.
    Fast,
    /// Results with magnitude below the absolute tolerance are snapped to zero.
    AbsoluteStable,
    /// Like `AbsoluteStable`, but results that are small relative to the magnitude of the
    /// operands (catastrophic cancellation) are snapped to zero as well.
    RelativeStable,
}

/// Stability mode together with its tolerances.
///
/// Every [`NumericVector`](crate::NumericVector) carries a copy of this value, so the mode is
/// picked once (usually from the solver configuration) and then used by all additions and dot
/// products performed on that vector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Arithmetic {
    /// Selected mode.
    pub mode: StabilityMode,
    /// Results with smaller magnitude are zero in the stable modes.
    pub absolute_tolerance: f64,
    /// Results smaller than `relative_tolerance * (|a| + |b|)` are zero in the relative mode.
    pub relative_tolerance: f64,
}

impl Default for Arithmetic {
    fn default() -> Self {
        Arithmetic {
            mode: StabilityMode::RelativeStable,
            absolute_tolerance: 1e-14,
            relative_tolerance: 1e-9,
        }
    }
}

impl Arithmetic {
    /// Plain floating point arithmetic.
    pub fn fast() -> Self {
        Arithmetic {
            mode: StabilityMode::Fast,
            ..Arithmetic::default()
        }
    }

    /// Default tolerances with the given mode.
    pub fn with_mode(mode: StabilityMode) -> Self {
        Arithmetic {
            mode,
            ..Arithmetic::default()
        }
    }

    /// Computes `a + b` according to the selected mode.
    #[inline]
    pub fn add(&self, a: f64, b: f64) -> f64 {
        let sum = a + b;
        match self.mode {
            StabilityMode::Fast => sum,
            StabilityMode::AbsoluteStable => {
                if sum.abs() < self.absolute_tolerance {
                    0.0
                } else {
                    sum
                }
            }
            StabilityMode::RelativeStable => {
                let abs = sum.abs();
                if abs < self.absolute_tolerance
                    || abs < (a.abs() + b.abs()) * self.relative_tolerance
                {
                    0.0
                } else {
                    sum
                }
            }
        }
    }

    /// Computes `a + lambda * b`.
    #[inline]
    pub fn add_scaled(&self, a: f64, lambda: f64, b: f64) -> f64 {
        self.add(a, lambda * b)
    }

    /// Snaps a freshly computed value to zero if it is below the absolute tolerance.
    ///
    /// Does nothing in the fast mode.
    #[inline]
    pub fn snap(&self, val: f64) -> f64 {
        match self.mode {
            StabilityMode::Fast => val,
            _ if val.abs() < self.absolute_tolerance => 0.0,
            _ => val,
        }
    }

    pub(crate) fn dot_accumulator(&self) -> DotAccumulator {
        DotAccumulator {
            arithmetic: *self,
            positive: 0.0,
            negative: 0.0,
        }
    }
}

/// Running sum of products for dot products.
///
/// In the stable modes positive and negative products are accumulated separately and only
/// combined at the end, through the same filter as ordinary additions.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DotAccumulator {
    arithmetic: Arithmetic,
    positive: f64,
    negative: f64,
}

impl DotAccumulator {
    #[inline]
    pub(crate) fn push(&mut self, product: f64) {
        if self.arithmetic.mode == StabilityMode::Fast || product > 0.0 {
            self.positive += product;
        } else {
            self.negative += product;
        }
    }

    pub(crate) fn finish(self) -> f64 {
        match self.arithmetic.mode {
            StabilityMode::Fast => self.positive,
            _ => self.arithmetic.add(self.positive, self.negative),
        }
    }
}
