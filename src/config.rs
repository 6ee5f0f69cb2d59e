//! Solver settings.

use crate::breakpoint::SortingMethod;
use crate::numeric::Arithmetic;
use crate::vector::DEFAULT_SPARSITY_RATIO;
use serde::{Deserialize, Serialize};

/// Which simplex variant drives the solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Algorithm {
    /// Primal simplex (composite phase 1).
    Primal,
    /// Dual simplex with bound flipping, falling back to primal when dual phase 1 gets stuck.
    Dual,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Dual
    }
}

/// How a ratio test picks its breakpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RatioTestMethod {
    /// The first breakpoint (textbook ratio test).
    Traditional,
    /// The maximum of the piecewise linear function (long step).
    Piecewise,
    /// Long step followed by a search for a larger pivot near the chosen breakpoint.
    PiecewiseThreshold,
}

/// Settings of the expand procedure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpandConfig {
    /// Enables the procedure. When disabled the master pivot tolerance is always used.
    pub enabled: bool,
    /// The working tolerance starts at `pivot_tolerance * multiplier` after every reinversion.
    pub multiplier: f64,
}

impl Default for ExpandConfig {
    fn default() -> Self {
        ExpandConfig {
            enabled: true,
            multiplier: 0.01,
        }
    }
}

/// All tunable parameters of a solve.
///
/// Can be deserialized from JSON, missing fields take their default values:
///
/// ```
/// # use pivotal::{SolverConfig, Algorithm, RatioTestMethod};
/// let config: SolverConfig = serde_json::from_str(
///     r#"{"algorithm": "PRIMAL", "primal_ratio_test": "TRADITIONAL", "iteration_limit": 50}"#,
/// ).unwrap();
/// assert_eq!(config.algorithm, Algorithm::Primal);
/// assert_eq!(config.primal_ratio_test, RatioTestMethod::Traditional);
/// assert_eq!(config.iteration_limit, Some(50));
/// assert_eq!(config.reinversion_frequency, 30);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    /// Simplex variant.
    pub algorithm: Algorithm,
    /// Stability mode and tolerances of vector arithmetic.
    pub arithmetic: Arithmetic,
    /// Sparse vectors become dense above this share of nonzeros.
    pub sparsity_ratio: f64,
    /// Allowed bound violation of primal values.
    pub feasibility_tolerance: f64,
    /// Allowed sign violation of reduced costs.
    pub optimality_tolerance: f64,
    /// Master tolerance below which pivot candidates are ignored.
    pub pivot_tolerance: f64,
    /// Expand procedure for the working pivot tolerance.
    pub expand: ExpandConfig,
    /// Basis updates between two reinversions.
    pub reinversion_frequency: usize,
    /// Relative threshold of the LU partial pivoting.
    pub lu_pivot_threshold: f64,
    /// Dual ratio test.
    pub dual_ratio_test: RatioTestMethod,
    /// Primal ratio test.
    pub primal_ratio_test: RatioTestMethod,
    /// Breakpoint ordering strategy.
    pub breakpoint_sorting: SortingMethod,
    /// Largest step length difference to the chosen breakpoint at which a better pivot is
    /// still considered.
    pub stable_pivot_window: f64,
    /// The chosen pivot is replaced if it is smaller than this share of the largest pivot in
    /// the window.
    pub stable_pivot_threshold: f64,
    /// Maximum number of iterations.
    pub iteration_limit: Option<usize>,
    /// Maximum wall clock time in seconds.
    pub time_limit_secs: Option<f64>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            algorithm: Algorithm::default(),
            arithmetic: Arithmetic::default(),
            sparsity_ratio: DEFAULT_SPARSITY_RATIO,
            feasibility_tolerance: 1e-8,
            optimality_tolerance: 1e-8,
            pivot_tolerance: 1e-7,
            expand: ExpandConfig::default(),
            reinversion_frequency: 30,
            lu_pivot_threshold: 0.1,
            dual_ratio_test: RatioTestMethod::PiecewiseThreshold,
            primal_ratio_test: RatioTestMethod::Piecewise,
            breakpoint_sorting: SortingMethod::default(),
            stable_pivot_window: 1e-6,
            stable_pivot_threshold: 0.1,
            iteration_limit: None,
            time_limit_secs: None,
        }
    }
}

impl SolverConfig {
    /// Working pivot tolerance `k` iterations after the last reinversion.
    ///
    /// With the expand procedure enabled it grows linearly from
    /// `pivot_tolerance * expand.multiplier` to `pivot_tolerance` over
    /// `reinversion_frequency` iterations.
    pub fn working_pivot_tolerance(&self, k: usize) -> f64 {
        if !self.expand.enabled || k >= self.reinversion_frequency {
            return self.pivot_tolerance;
        }
        let start = self.pivot_tolerance * self.expand.multiplier;
        let progress = k as f64 / self.reinversion_frequency as f64;
        start + (self.pivot_tolerance - start) * progress
    }
}
