//! Dual ratio test with bound flipping.
//!
//! The leaving basic variable `x_p` of row `r` moves to the bound it violates, which changes
//! every reduced cost along the pivot row: `d_j(t) = d_j + t * sign * alpha_rj` where `sign` is
//! `+1` when `x_p` leaves to its lower bound. The dual objective grows with slope equal to the
//! primal infeasibility of `x_p` and every reduced cost that changes sign costs some of that
//! slope. Boxed variables can absorb this by flipping to their other bound, all other
//! variables block the step.

use crate::breakpoint::{BoundSide, Breakpoint, BreakpointHandler, SortingMethod};
use crate::model::{state_of, VariableState, VariableStates, VariableType};
use crate::ratio_test::{
    clamped_ratio, select_breakpoint, BoundFlip, RatioTestCounters, RatioTestParams,
};
use crate::vector::NumericVector;

/// Data of a dual ratio test call.
#[derive(Clone, Copy, Debug)]
pub struct DualRatioInput<'a> {
    /// Pivot row `e_r^T B^-1 [A | -I]` over all variables.
    pub pivot_row: &'a NumericVector,
    /// Reduced costs of all variables.
    pub reduced_costs: &'a [f64],
    /// Current basic/nonbasic partition.
    pub states: &'a VariableStates,
    /// Lower bounds of all variables.
    pub lower: &'a [f64],
    /// Upper bounds of all variables.
    pub upper: &'a [f64],
    /// Bound the leaving variable moves to.
    pub leaving_to: BoundSide,
    /// Initial slope of the dual objective: the primal infeasibility of the leaving variable,
    /// or in phase 1 the magnitude of the auxiliary primal value.
    pub initial_slope: f64,
}

/// A successful dual ratio test.
#[derive(Clone, Debug, PartialEq)]
pub struct DualStep {
    /// Entering variable.
    pub entering: usize,
    /// Its pivot row coefficient.
    pub alpha: f64,
    /// Dual step length `t >= 0`.
    pub step: f64,
    /// Boxed variables that change bounds.
    pub flips: Vec<BoundFlip>,
    /// Estimated growth of the dual objective.
    pub gain: f64,
}

/// Result of a dual ratio test.
#[derive(Clone, Debug, PartialEq)]
pub enum DualOutcome {
    /// Pivot on the returned entering variable.
    Pivot(DualStep),
    /// No reduced cost blocks the step in phase 2: the primal problem is infeasible.
    DualUnbounded,
    /// No breakpoint in phase 1.
    NoBreakpoint,
}

/// Dual ratio test, reusing its breakpoint storage between calls.
#[derive(Debug)]
pub struct DualRatioTest {
    handler: BreakpointHandler,
    counters: RatioTestCounters,
}

impl DualRatioTest {
    /// Creates a ratio test ordering its breakpoints with `sorting`.
    pub fn new(sorting: SortingMethod) -> DualRatioTest {
        DualRatioTest {
            handler: BreakpointHandler::new(sorting),
            counters: RatioTestCounters::default(),
        }
    }

    /// Events counted so far.
    pub fn counters(&self) -> &RatioTestCounters {
        &self.counters
    }

    /// Phase 2 ratio test. Reduced costs are assumed feasible up to `params.tolerance`.
    pub fn phase2(&mut self, input: &DualRatioInput, params: &RatioTestParams) -> DualOutcome {
        let sign = direction_sign(input.leaving_to);
        self.handler.clear();

        for (j, alpha) in input.pivot_row.nonzero_iter() {
            if alpha.abs() < params.pivot_tolerance {
                continue;
            }
            let rho = sign * alpha;
            let d = input.reduced_costs[j];
            let (value, side) = match state_of(input.states, j) {
                VariableState::Basic | VariableState::Fixed => continue,
                VariableState::AtLower if rho < 0.0 => {
                    (clamped_ratio(d, rho, &mut self.counters), BoundSide::Lower)
                }
                VariableState::AtUpper if rho > 0.0 => {
                    (clamped_ratio(-d, rho, &mut self.counters), BoundSide::Upper)
                }
                VariableState::Free => (d.abs() / alpha.abs(), BoundSide::Lower),
                _ => continue,
            };

            let range = input.upper[j] - input.lower[j];
            let slope = if range.is_finite() {
                alpha.abs() * range
            } else {
                f64::INFINITY
            };
            self.handler.add(Breakpoint {
                value,
                variable: j,
                slope,
                alpha,
                side,
            });
        }

        let selection = match select_breakpoint(
            &mut self.handler,
            params,
            input.initial_slope,
            |bp| bp.slope.is_finite(),
            &mut self.counters,
        ) {
            Some(s) => s,
            None => return DualOutcome::DualUnbounded,
        };

        let flips = (0..selection.index)
            .map(|k| {
                let bp = self.handler.get(k);
                BoundFlip {
                    variable: bp.variable,
                    to: bp.side.opposite(),
                }
            })
            .collect::<Vec<_>>();

        trace!(
            "dual ratio test: entering {} at t={:.3e}, {} flips",
            selection.breakpoint.variable,
            selection.breakpoint.value,
            flips.len()
        );
        DualOutcome::Pivot(DualStep {
            entering: selection.breakpoint.variable,
            alpha: selection.breakpoint.alpha,
            step: selection.breakpoint.value,
            flips,
            gain: selection.objective,
        })
    }

    /// Phase 1 ratio test maximizing the sum of dual infeasibilities (as a negative number).
    ///
    /// Boxed variables are not considered, they are kept dual feasible by putting them at the
    /// appropriate bound. A reduced cost passing zero changes the slope by `|alpha|`, except
    /// for free variables going from infeasible to infeasible on the other side (`2 |alpha|`).
    pub fn phase1(&mut self, input: &DualRatioInput, params: &RatioTestParams) -> DualOutcome {
        let sign = direction_sign(input.leaving_to);
        let tol = params.tolerance;
        self.handler.clear();

        for (j, alpha) in input.pivot_row.nonzero_iter() {
            if alpha.abs() < params.pivot_tolerance || state_of(input.states, j) == VariableState::Basic {
                continue;
            }
            let rho = sign * alpha;
            let d = input.reduced_costs[j];
            let candidate = match VariableType::from_bounds(input.lower[j], input.upper[j]) {
                VariableType::Bounded | VariableType::Fixed => None,
                VariableType::Plus => {
                    if d < -tol && rho > 0.0 {
                        Some((-d / rho, alpha.abs(), BoundSide::Lower))
                    } else if d >= -tol && rho < 0.0 {
                        let t = clamped_ratio(d, rho, &mut self.counters);
                        Some((t, alpha.abs(), BoundSide::Lower))
                    } else {
                        None
                    }
                }
                VariableType::Minus => {
                    if d > tol && rho < 0.0 {
                        Some((d / -rho, alpha.abs(), BoundSide::Upper))
                    } else if d <= tol && rho > 0.0 {
                        let t = clamped_ratio(-d, rho, &mut self.counters);
                        Some((t, alpha.abs(), BoundSide::Upper))
                    } else {
                        None
                    }
                }
                VariableType::Free => {
                    if d.abs() <= tol {
                        Some((0.0, alpha.abs(), BoundSide::Lower))
                    } else if (d < 0.0 && rho > 0.0) || (d > 0.0 && rho < 0.0) {
                        Some((d.abs() / rho.abs(), 2.0 * alpha.abs(), BoundSide::Lower))
                    } else {
                        None
                    }
                }
            };

            if let Some((value, slope, side)) = candidate {
                self.handler.add(Breakpoint {
                    value,
                    variable: j,
                    slope,
                    alpha,
                    side,
                });
            }
        }

        match select_breakpoint(
            &mut self.handler,
            params,
            input.initial_slope,
            |_| false,
            &mut self.counters,
        ) {
            Some(selection) => DualOutcome::Pivot(DualStep {
                entering: selection.breakpoint.variable,
                alpha: selection.breakpoint.alpha,
                step: selection.breakpoint.value,
                flips: vec![],
                gain: selection.objective,
            }),
            None => DualOutcome::NoBreakpoint,
        }
    }
}

fn direction_sign(leaving_to: BoundSide) -> f64 {
    match leaving_to {
        BoundSide::Lower => 1.0,
        BoundSide::Upper => -1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RatioTestMethod;

    const INF: f64 = f64::INFINITY;

    fn params(method: RatioTestMethod) -> RatioTestParams {
        RatioTestParams {
            method,
            pivot_tolerance: 1e-9,
            tolerance: 1e-9,
            stable_pivot_window: 1e-6,
            stable_pivot_threshold: 0.1,
        }
    }

    fn states(of: &[VariableState]) -> VariableStates {
        let mut states = VariableStates::new(of.len(), VariableState::COUNT);
        for (var, state) in of.iter().enumerate() {
            states.insert(state.partition(), var, 0.0);
        }
        states
    }

    struct Case {
        row: NumericVector,
        d: Vec<f64>,
        states: VariableStates,
        lower: Vec<f64>,
        upper: Vec<f64>,
    }

    impl Case {
        fn input(&self, leaving_to: BoundSide, initial_slope: f64) -> DualRatioInput<'_> {
            DualRatioInput {
                pivot_row: &self.row,
                reduced_costs: &self.d,
                states: &self.states,
                lower: &self.lower,
                upper: &self.upper,
                leaving_to,
                initial_slope,
            }
        }
    }

    /// Two boxed, one plus and one minus candidate. Variable 4 is basic and leaving.
    fn flipping_case() -> Case {
        use VariableState::*;
        Case {
            row: NumericVector::from_dense(&[-1.0, -2.0, -1.0, 1.0, 1.0]),
            d: vec![0.5, 2.0, 3.0, -10.0, 0.0],
            states: states(&[AtLower, AtLower, AtLower, AtUpper, Basic]),
            lower: vec![0.0, 0.0, 0.0, -INF, 0.0],
            upper: vec![1.0, 2.0, INF, 0.0, 5.0],
        }
    }

    #[test]
    fn long_step_flips_boxed_variables() {
        let case = flipping_case();
        let mut test = DualRatioTest::new(SortingMethod::Heap);

        // slope 1.5 -> 0.5 after variable 0 (|alpha| * range = 1) -> -3.5 after variable 1
        let outcome = test.phase2(&case.input(BoundSide::Lower, 1.5), &params(RatioTestMethod::Piecewise));
        let step = match outcome {
            DualOutcome::Pivot(step) => step,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(step.entering, 1);
        assert_eq!(step.alpha, -2.0);
        assert_eq!(step.step, 1.0);
        assert_eq!(
            step.flips,
            vec![BoundFlip {
                variable: 0,
                to: BoundSide::Upper
            }]
        );
        assert_eq!(step.gain, 1.5 * 0.5 + 0.5 * 0.5);

        let outcome = test.phase2(&case.input(BoundSide::Lower, 1.5), &params(RatioTestMethod::Traditional));
        match outcome {
            DualOutcome::Pivot(step) => {
                assert_eq!(step.entering, 0);
                assert!(step.flips.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn large_infeasibility_stops_at_unboxed_variable() {
        let case = flipping_case();
        let mut test = DualRatioTest::new(SortingMethod::Full);
        let outcome = test.phase2(&case.input(BoundSide::Lower, 100.0), &params(RatioTestMethod::PiecewiseThreshold));
        match outcome {
            DualOutcome::Pivot(step) => {
                assert_eq!(step.entering, 2);
                assert_eq!(step.step, 3.0);
                let flipped = step.flips.iter().map(|f| f.variable).collect::<Vec<_>>();
                assert_eq!(flipped, vec![0, 1]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn leaving_to_upper_mirrors_signs() {
        let mut case = flipping_case();
        let mut test = DualRatioTest::new(SortingMethod::Heap);
        assert_eq!(
            test.phase2(&case.input(BoundSide::Upper, 1.5), &params(RatioTestMethod::Piecewise)),
            DualOutcome::DualUnbounded
        );

        case.row.scale(-1.0);
        match test.phase2(&case.input(BoundSide::Upper, 1.5), &params(RatioTestMethod::Piecewise)) {
            DualOutcome::Pivot(step) => {
                assert_eq!(step.entering, 1);
                assert_eq!(step.alpha, 2.0);
                assert_eq!(step.flips.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unblocked_step_is_dual_unbounded() {
        use VariableState::*;
        let case = Case {
            row: NumericVector::from_dense(&[1.0, -3.0, 1e-12, 2.0]),
            d: vec![1.0, 0.0, 1.0, 0.0],
            states: states(&[AtLower, Fixed, AtLower, Basic]),
            lower: vec![0.0, 1.0, 0.0, 0.0],
            upper: vec![INF, 1.0, INF, 1.0],
        };
        let mut test = DualRatioTest::new(SortingMethod::Heap);
        assert_eq!(
            test.phase2(&case.input(BoundSide::Lower, 1.0), &params(RatioTestMethod::Piecewise)),
            DualOutcome::DualUnbounded
        );
    }

    #[test]
    fn slightly_infeasible_reduced_cost_gives_zero_step() {
        use VariableState::*;
        let case = Case {
            row: NumericVector::from_dense(&[-1.0, -1.0, 1.0]),
            d: vec![-1e-10, 0.5, 0.0],
            states: states(&[AtLower, AtLower, Basic]),
            lower: vec![0.0, 0.0, 0.0],
            upper: vec![INF, INF, INF],
        };
        let mut test = DualRatioTest::new(SortingMethod::Heap);
        match test.phase2(&case.input(BoundSide::Lower, 2.0), &params(RatioTestMethod::Piecewise)) {
            DualOutcome::Pivot(step) => {
                assert_eq!(step.entering, 0);
                assert_eq!(step.step, 0.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(test.counters().fake_feasible, 1);
    }

    #[test]
    fn phase1_breakpoints() {
        use VariableState::*;
        let case = Case {
            row: NumericVector::from_dense(&[-1.0, 0.5, 5.0, 1.0, 1.0]),
            d: vec![0.5, -1.0, -3.0, -0.2, 0.0],
            states: states(&[Free, AtLower, AtLower, AtUpper, Basic]),
            lower: vec![-INF, 0.0, 0.0, -INF, 0.0],
            upper: vec![INF, INF, 1.0, 0.0, INF],
        };
        let mut test = DualRatioTest::new(SortingMethod::Full);

        // breakpoints: variable 3 at 0.2 (slope 1), free variable 0 at 0.5 (slope 2),
        // variable 1 at 2.0; the boxed variable 2 is ignored
        let outcome = test.phase1(&case.input(BoundSide::Lower, 3.0), &params(RatioTestMethod::Piecewise));
        match outcome {
            DualOutcome::Pivot(step) => {
                assert_eq!(step.entering, 0);
                assert_eq!(step.step, 0.5);
                assert_eq!(step.alpha, -1.0);
                assert!(step.flips.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }

        let outcome = test.phase1(&case.input(BoundSide::Lower, 10.0), &params(RatioTestMethod::Piecewise));
        match outcome {
            DualOutcome::Pivot(step) => assert_eq!(step.entering, 1),
            other => panic!("unexpected {:?}", other),
        }

        // moving the other way only the boxed variable would react
        let only_boxed = Case {
            row: NumericVector::from_dense(&[0.0, 0.0, 5.0, 0.0, 1.0]),
            ..case
        };
        assert_eq!(
            test.phase1(&only_boxed.input(BoundSide::Upper, 1.0), &params(RatioTestMethod::Piecewise)),
            DualOutcome::NoBreakpoint
        );
    }

    #[test]
    fn step_is_never_negative() {
        use rand::prelude::*;
        let mut rng = rand_pcg::Pcg64::seed_from_u64(17);
        for _ in 0..50 {
            let n = 20;
            let entries = (0..n)
                .filter_map(|j| {
                    if rng.gen_bool(0.5) {
                        Some((j, rng.gen_range(-2.0, 2.0)))
                    } else {
                        None
                    }
                })
                .collect::<Vec<_>>();
            let row = NumericVector::from_entries(n, entries);
            let mut vs = vec![];
            let mut d = vec![];
            let mut lower = vec![];
            let mut upper = vec![];
            for _ in 0..n {
                let (state, lb, ub, dj) = match rng.gen_range(0, 4) {
                    0 => (VariableState::AtLower, 0.0, rng.gen_range(1.0, 3.0), rng.gen_range(0.0, 1.0)),
                    1 => (VariableState::AtUpper, -INF, 0.0, rng.gen_range(-1.0, 0.0)),
                    2 => (VariableState::Free, -INF, INF, 0.0),
                    _ => (VariableState::Basic, 0.0, INF, 0.0),
                };
                vs.push(state);
                lower.push(lb);
                upper.push(ub);
                d.push(dj);
            }
            let case = Case {
                row,
                d,
                states: states(&vs),
                lower,
                upper,
            };
            let mut test = DualRatioTest::new(SortingMethod::Heap);
            let side = if rng.gen_bool(0.5) {
                BoundSide::Lower
            } else {
                BoundSide::Upper
            };
            match test.phase2(&case.input(side, rng.gen_range(0.1, 5.0)), &params(RatioTestMethod::PiecewiseThreshold)) {
                DualOutcome::Pivot(step) => {
                    assert!(step.step >= 0.0);
                    assert_ne!(vs[step.entering], VariableState::Basic);
                    for flip in &step.flips {
                        assert!((case.upper[flip.variable] - case.lower[flip.variable]).is_finite());
                    }
                }
                DualOutcome::DualUnbounded => {}
                DualOutcome::NoBreakpoint => panic!("phase 2 reports unboundedness instead"),
            }
        }
    }
}
