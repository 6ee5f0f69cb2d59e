//! Pricing: choosing the entering variable (primal) or the leaving row (dual).

use crate::breakpoint::BoundSide;
use crate::model::{VariableState, VariableStates};
use std::fmt;

/// An improving nonbasic variable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrimalCandidate {
    /// The variable.
    pub variable: usize,
    /// `1.0` if it should increase, `-1.0` if it should decrease.
    pub direction: f64,
    /// Its reduced cost.
    pub reduced_cost: f64,
}

/// A primal infeasible basic variable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DualCandidate {
    /// Its row.
    pub row: usize,
    /// The violated bound.
    pub leaving_to: BoundSide,
    /// Amount of violation.
    pub infeasibility: f64,
}

/// Selects the entering variable of a primal iteration.
pub trait PrimalPricing: fmt::Debug {
    /// Returns an improving nonbasic variable, or `None` if the reduced costs are optimal
    /// within `tolerance`.
    fn select_candidate(
        &mut self,
        reduced_costs: &[f64],
        states: &VariableStates,
        tolerance: f64,
    ) -> Option<PrimalCandidate>;
}

/// Selects the leaving row of a dual iteration.
pub trait DualPricing: fmt::Debug {
    /// Returns a basic variable violating its bounds by more than `tolerance`, or `None` if
    /// the basis is primal feasible.
    fn select_candidate(
        &mut self,
        basis_head: &[usize],
        basic_values: &[f64],
        lower: &[f64],
        upper: &[f64],
        tolerance: f64,
    ) -> Option<DualCandidate>;
}

/// Dantzig's rule: the largest reduced cost magnitude, ties broken by the smaller index.
#[derive(Clone, Copy, Debug, Default)]
pub struct DantzigPrimalPricing;

impl PrimalPricing for DantzigPrimalPricing {
    fn select_candidate(
        &mut self,
        reduced_costs: &[f64],
        states: &VariableStates,
        tolerance: f64,
    ) -> Option<PrimalCandidate> {
        let mut best: Option<PrimalCandidate> = None;
        let partitions = [
            VariableState::AtLower,
            VariableState::AtUpper,
            VariableState::Free,
        ];
        for &state in &partitions {
            for var in states.iter_partition(state.partition()) {
                let d = reduced_costs[var];
                let direction = match state {
                    VariableState::AtLower if d < -tolerance => 1.0,
                    VariableState::AtUpper if d > tolerance => -1.0,
                    VariableState::Free if d.abs() > tolerance => -d.signum(),
                    _ => continue,
                };

                let better = match best {
                    None => true,
                    Some(b) => {
                        d.abs() > b.reduced_cost.abs()
                            || (d.abs() == b.reduced_cost.abs() && var < b.variable)
                    }
                };
                if better {
                    best = Some(PrimalCandidate {
                        variable: var,
                        direction,
                        reduced_cost: d,
                    });
                }
            }
        }
        best
    }
}

/// The largest bound violation, ties broken by the smaller row.
#[derive(Clone, Copy, Debug, Default)]
pub struct DantzigDualPricing;

impl DualPricing for DantzigDualPricing {
    fn select_candidate(
        &mut self,
        basis_head: &[usize],
        basic_values: &[f64],
        lower: &[f64],
        upper: &[f64],
        tolerance: f64,
    ) -> Option<DualCandidate> {
        let mut best: Option<DualCandidate> = None;
        for (row, (&var, &val)) in basis_head.iter().zip(basic_values).enumerate() {
            let (infeasibility, leaving_to) = if val < lower[var] - tolerance {
                (lower[var] - val, BoundSide::Lower)
            } else if val > upper[var] + tolerance {
                (val - upper[var], BoundSide::Upper)
            } else {
                continue;
            };

            // rows are visited in order, so strict comparison keeps the smaller one
            if best.map_or(true, |b| infeasibility > b.infeasibility) {
                best = Some(DualCandidate {
                    row,
                    leaving_to,
                    infeasibility,
                });
            }
        }
        best
    }
}
