//! The simplex iteration loop.
//!
//! The engine keeps the basis head, the basic/nonbasic partition of all variables, the values
//! of the basic variables and the (phase 2) reduced costs. Both algorithms share this state:
//!
//! * Primal: composite phase 1 minimizing the sum of infeasibilities of the basic variables,
//!   then phase 2 on the real costs.
//! * Dual: phase 1 minimizing the sum of dual infeasibilities of the non-boxed nonbasic
//!   variables, then the long-step dual phase 2. When dual phase 1 gets stuck the primal
//!   algorithm takes over from the current basis.
//!
//! Terminal results (optimal, infeasible, unbounded) are only accepted on a fresh
//! factorization.

use crate::basis::{Basis, LuBasis};
use crate::breakpoint::BoundSide;
use crate::config::{Algorithm, RatioTestMethod, SolverConfig};
use crate::dual_ratio_test::{DualOutcome, DualRatioInput, DualRatioTest, DualStep};
use crate::helpers::{bound_violation, SENTINEL};
use crate::model::{state_of, Model, VariableState, VariableStates, VariableType};
use crate::pricing::{
    DantzigDualPricing, DantzigPrimalPricing, DualPricing, PrimalCandidate, PrimalPricing,
};
use crate::primal_ratio_test::{PrimalOutcome, PrimalRatioInput, PrimalRatioTest, PrimalStep};
use crate::ratio_test::{BoundFlip, RatioTestParams};
use crate::snapshot::{finite_or_none, BasicEntry, BasisSnapshot, NonbasicEntry, NonbasicState};
use crate::vector::NumericVector;
use crate::Error;
use serde::Serialize;
use std::time::Instant;

/// Consecutive numerical failures tolerated before giving up.
const MAX_NUMERICAL_RETRIES: usize = 3;

/// Allowed relative difference between the pivot element computed from the row and from
/// the column.
const PIVOT_AGREEMENT: f64 = 1e-6;

/// Why the engine stopped without a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// The configured iteration limit was reached.
    IterationLimit,
    /// The configured time limit was reached.
    TimeLimit,
    /// The basis could not be kept numerically stable.
    Numerical,
}

/// State of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Looking for a feasible basis (primal or dual, depending on the algorithm).
    Phase1,
    /// Optimizing from a feasible basis.
    Phase2,
    /// The current basis is optimal.
    Optimal,
    /// No feasible point exists.
    Infeasible,
    /// The objective is unbounded below.
    Unbounded,
    /// Stopped early. The basis is the last consistent one.
    Failed(FailureReason),
}

impl EngineState {
    /// True for states in which [`SimplexEngine::run`] returns immediately.
    pub fn is_terminal(self) -> bool {
        match self {
            EngineState::Phase1 | EngineState::Phase2 => false,
            _ => true,
        }
    }
}

/// Counters of a solve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// Basis changes and bound flips of the entering variable.
    pub iterations: usize,
    /// Iterations spent in phase 1.
    pub phase1_iterations: usize,
    /// Nonbasic variables moved to their other bound.
    pub bound_flips: usize,
    /// Switches from phase 2 back to phase 1 and from the dual to the primal algorithm.
    pub fallbacks: usize,
    /// Fresh factorizations of the basis.
    pub reinversions: usize,
    /// Negative ratios clamped to zero by the ratio tests.
    pub fake_feasible: usize,
    /// Stable pivot refinements towards shorter steps.
    pub backward_steps: usize,
    /// Stable pivot refinements towards longer steps.
    pub forward_steps: usize,
}

/// Bounded-variable simplex solver for a [`Model`].
pub struct SimplexEngine {
    model: Model,
    config: SolverConfig,
    basis: Box<dyn Basis>,
    primal_pricing: Box<dyn PrimalPricing>,
    dual_pricing: Box<dyn DualPricing>,
    primal_test: PrimalRatioTest,
    dual_test: DualRatioTest,

    algorithm: Algorithm,
    state: EngineState,
    bounds_consistent: bool,
    started: bool,
    /// Values and reduced costs were computed from a fresh factorization and nothing moved
    /// since.
    fresh: bool,

    /// Basic variable of every row.
    basis_head: Vec<usize>,
    /// Row of every basic variable, `SENTINEL` for nonbasic ones.
    basis_pos: Vec<usize>,
    states: VariableStates,
    basic_values: Vec<f64>,
    reduced_costs: Vec<f64>,
    last_consistent: Option<(Vec<usize>, VariableStates)>,

    statistics: Statistics,
}

impl std::fmt::Debug for SimplexEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimplexEngine")
            .field("num_rows", &self.model.num_rows())
            .field("num_vars", &self.model.num_vars())
            .field("algorithm", &self.algorithm)
            .field("state", &self.state)
            .field("basis", &self.basis)
            .field("statistics", &self.statistics())
            .finish()
    }
}

impl SimplexEngine {
    /// Creates an engine with the LU basis representation and Dantzig pricing, starting from
    /// the slack basis.
    pub fn new(model: Model, config: SolverConfig) -> SimplexEngine {
        let basis = Box::new(LuBasis::new(config.lu_pivot_threshold));
        SimplexEngine::with_collaborators(
            model,
            config,
            basis,
            Box::new(DantzigPrimalPricing),
            Box::new(DantzigDualPricing),
        )
    }

    /// Creates an engine with custom basis representation and pricing rules, starting from
    /// the slack basis.
    pub fn with_collaborators(
        model: Model,
        config: SolverConfig,
        basis: Box<dyn Basis>,
        primal_pricing: Box<dyn PrimalPricing>,
        dual_pricing: Box<dyn DualPricing>,
    ) -> SimplexEngine {
        let num_vars = model.num_vars();
        let num_rows = model.num_rows();
        let (lower, upper) = (model.lower_bounds(), model.upper_bounds());

        let mut states = VariableStates::new(num_vars, VariableState::COUNT);
        let mut basis_head = Vec::with_capacity(num_rows);
        let mut basis_pos = vec![SENTINEL; num_vars];
        for var in 0..model.num_structural() {
            let (state, value) = VariableState::nonbasic_for(lower[var], upper[var]);
            states.insert(state.partition(), var, value);
        }
        for row in 0..num_rows {
            let var = model.logical_of(row);
            basis_pos[var] = row;
            basis_head.push(var);
            states.insert(VariableState::Basic.partition(), var, 0.0);
        }

        let bounds_consistent = (0..num_vars).all(|v| lower[v] <= upper[v]);
        if !bounds_consistent {
            debug!("a variable has its lower bound above its upper bound");
        }

        SimplexEngine {
            primal_test: PrimalRatioTest::new(config.breakpoint_sorting),
            dual_test: DualRatioTest::new(config.breakpoint_sorting),
            algorithm: config.algorithm,
            state: if bounds_consistent {
                EngineState::Phase1
            } else {
                EngineState::Infeasible
            },
            bounds_consistent,
            started: false,
            fresh: false,
            basis_head,
            basis_pos,
            states,
            basic_values: vec![0.0; num_rows],
            reduced_costs: vec![0.0; num_vars],
            last_consistent: None,
            statistics: Statistics::default(),
            model,
            config,
            basis,
            primal_pricing,
            dual_pricing,
        }
    }

    /// The model being solved.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Settings in use.
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Algorithm currently iterating. Starts as configured, switches to primal on fallback.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Counters of the solve so far.
    pub fn statistics(&self) -> Statistics {
        let primal = self.primal_test.counters();
        let dual = self.dual_test.counters();
        Statistics {
            fake_feasible: primal.fake_feasible + dual.fake_feasible,
            backward_steps: primal.backward_steps + dual.backward_steps,
            forward_steps: primal.forward_steps + dual.forward_steps,
            ..self.statistics
        }
    }

    /// Basic variable of every row.
    pub fn basis_head(&self) -> &[usize] {
        &self.basis_head
    }

    /// State of `var` in the current basis.
    pub fn variable_state(&self, var: usize) -> VariableState {
        state_of(&self.states, var)
    }

    /// Current value of `var`.
    pub fn value(&self, var: usize) -> f64 {
        match self.basis_pos[var] {
            SENTINEL => *self.states.attached(var),
            row => self.basic_values[row],
        }
    }

    /// Reduced cost of `var` with respect to the real costs.
    pub fn reduced_cost(&self, var: usize) -> f64 {
        self.reduced_costs[var]
    }

    /// Objective value (of the minimization) at the current values.
    pub fn objective(&self) -> f64 {
        let costs = self.model.costs();
        (0..self.model.num_structural())
            .map(|var| costs[var] * self.value(var))
            .sum()
    }

    /// Iterates until a terminal state is reached and returns it.
    pub fn run(&mut self) -> EngineState {
        if self.state.is_terminal() {
            return self.state;
        }

        let timer = Instant::now();
        if !self.started {
            if let Err(err) = self.start() {
                if !self.state.is_terminal() {
                    self.fail(err);
                }
                return self.state;
            }
        }

        let mut numerical_failures = 0;
        while !self.state.is_terminal() {
            if let Some(reason) = self.limit_reached(&timer) {
                debug!("stopping after {} iterations: {:?}", self.statistics.iterations, reason);
                self.state = EngineState::Failed(reason);
                break;
            }

            let iterations = self.statistics.iterations;
            let res = if self.basis.update_count() >= self.config.reinversion_frequency
                || self.basis.wants_reinversion()
            {
                self.reinvert()
            } else {
                self.iterate()
            };

            match res {
                Ok(()) => {
                    if self.statistics.iterations > iterations {
                        numerical_failures = 0;
                    }
                }
                Err(err) => {
                    if self.state.is_terminal() {
                        break;
                    }
                    numerical_failures += 1;
                    warn!(
                        "{} in iteration {}, recovery attempt {}",
                        err, self.statistics.iterations, numerical_failures
                    );
                    if numerical_failures > MAX_NUMERICAL_RETRIES {
                        self.fail(err);
                        break;
                    }
                    self.basis.increase_stability();
                    if let Err(err) = self.reinvert() {
                        if !self.state.is_terminal() {
                            self.fail(err);
                        }
                        break;
                    }
                }
            }
        }

        debug!(
            "{:?} simplex finished: {:?}, objective {}, {:?}",
            self.algorithm,
            self.state,
            self.objective(),
            self.statistics()
        );
        self.state
    }

    /// Describes the current basis.
    pub fn snapshot(&self) -> BasisSnapshot {
        let (lower, upper) = (self.model.lower_bounds(), self.model.upper_bounds());
        let basic = self
            .basis_head
            .iter()
            .zip(&self.basic_values)
            .map(|(&var, &value)| BasicEntry {
                name: self.model.name(var).to_owned(),
                value,
                lower_bound: finite_or_none(lower[var]),
                upper_bound: finite_or_none(upper[var]),
            })
            .collect();
        let nonbasic = (0..self.model.num_vars())
            .filter_map(|var| {
                NonbasicState::from_state(state_of(&self.states, var)).map(|state| NonbasicEntry {
                    name: self.model.name(var).to_owned(),
                    state,
                    value: *self.states.attached(var),
                })
            })
            .collect();
        BasisSnapshot { basic, nonbasic }
    }

    /// Replaces the current basis with `snapshot`. The next [`run`](#method.run) starts from
    /// it.
    ///
    /// Nonbasic values are taken from the bounds of the model, not from the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidBasis` if the snapshot does not describe a basis of the model
    /// (unknown, missing or repeated variables, states not matching the bounds, wrong number of
    /// basic variables, singular basis matrix). The current basis is kept in that case.
    pub fn load_basis(&mut self, snapshot: &BasisSnapshot) -> Result<(), Error> {
        let num_vars = self.model.num_vars();
        let num_rows = self.model.num_rows();
        if snapshot.basic.len() != num_rows {
            return Err(Error::InvalidBasis(format!(
                "expected {} basic variables, got {}",
                num_rows,
                snapshot.basic.len()
            )));
        }

        let mut seen = vec![false; num_vars];
        let mut lookup = |name: &str| -> Result<usize, Error> {
            let var = self
                .model
                .index_of(name)
                .ok_or_else(|| Error::InvalidBasis(format!("unknown variable {}", name)))?;
            if seen[var] {
                return Err(Error::InvalidBasis(format!("variable {} listed twice", name)));
            }
            seen[var] = true;
            Ok(var)
        };

        let mut head = Vec::with_capacity(num_rows);
        let mut states = VariableStates::new(num_vars, VariableState::COUNT);
        for entry in &snapshot.basic {
            let var = lookup(&entry.name)?;
            head.push(var);
            states.insert(VariableState::Basic.partition(), var, 0.0);
        }
        for entry in &snapshot.nonbasic {
            let var = lookup(&entry.name)?;
            let (state, value) = self.loaded_nonbasic(var, entry.state).ok_or_else(|| {
                Error::InvalidBasis(format!(
                    "state {:?} does not match the bounds of {}",
                    entry.state, entry.name
                ))
            })?;
            states.insert(state.partition(), var, value);
        }
        if let Some(var) = seen.iter().position(|&s| !s) {
            return Err(Error::InvalidBasis(format!(
                "variable {} missing",
                self.model.name(var)
            )));
        }

        let previous = (self.basis_head.clone(), self.states.clone());
        self.install(head, states);
        if self.basis.invert(&self.model, &self.basis_head).is_err() {
            self.install(previous.0, previous.1);
            if self.started && self.basis.invert(&self.model, &self.basis_head).is_err() {
                warn!("could not refactorize the previous basis");
            }
            return Err(Error::InvalidBasis("singular basis matrix".to_owned()));
        }

        debug!("loaded basis with {} rows", num_rows);
        self.started = false;
        self.last_consistent = None;
        if self.bounds_consistent {
            self.state = EngineState::Phase1;
        }
        Ok(())
    }

    fn loaded_nonbasic(&self, var: usize, state: NonbasicState) -> Option<(VariableState, f64)> {
        let (lb, ub) = (self.model.lower_bounds()[var], self.model.upper_bounds()[var]);
        match state.to_state() {
            VariableState::AtLower | VariableState::AtUpper | VariableState::Fixed if lb == ub => {
                Some((VariableState::Fixed, lb))
            }
            VariableState::AtLower if lb.is_finite() => Some((VariableState::AtLower, lb)),
            VariableState::AtUpper if ub.is_finite() => Some((VariableState::AtUpper, ub)),
            VariableState::Free if !lb.is_finite() && !ub.is_finite() => {
                Some((VariableState::Free, 0.0))
            }
            _ => None,
        }
    }

    fn install(&mut self, head: Vec<usize>, states: VariableStates) {
        self.basis_pos.iter_mut().for_each(|pos| *pos = SENTINEL);
        for (row, &var) in head.iter().enumerate() {
            self.basis_pos[var] = row;
        }
        self.basis_head = head;
        self.states = states;
        self.basic_values.iter_mut().for_each(|val| *val = 0.0);
        self.fresh = false;
    }

    fn fail(&mut self, err: Error) {
        let reason = match err {
            Error::IterationLimit => FailureReason::IterationLimit,
            Error::TimeLimit => FailureReason::TimeLimit,
            _ => FailureReason::Numerical,
        };
        if reason == FailureReason::Numerical {
            self.restore_consistent();
        }
        self.state = EngineState::Failed(reason);
    }

    fn limit_reached(&self, timer: &Instant) -> Option<FailureReason> {
        if let Some(limit) = self.config.iteration_limit {
            if self.statistics.iterations >= limit {
                return Some(FailureReason::IterationLimit);
            }
        }
        if let Some(secs) = self.config.time_limit_secs {
            if timer.elapsed().as_secs_f64() >= secs {
                return Some(FailureReason::TimeLimit);
            }
        }
        None
    }

    fn start(&mut self) -> Result<(), Error> {
        self.started = true;
        self.algorithm = self.config.algorithm;
        self.reinvert()?;

        self.state = match self.algorithm {
            Algorithm::Primal if self.primal_feasible() => EngineState::Phase2,
            Algorithm::Primal => EngineState::Phase1,
            Algorithm::Dual => {
                if self.flip_boxed_to_dual_feasible() > 0 {
                    self.recompute_primal()?;
                }
                if self.has_dual_infeasibility() {
                    EngineState::Phase1
                } else {
                    EngineState::Phase2
                }
            }
        };
        debug!(
            "starting {:?} simplex in {:?}: {} rows, {} variables",
            self.algorithm,
            self.state,
            self.model.num_rows(),
            self.model.num_vars()
        );
        Ok(())
    }

    fn iterate(&mut self) -> Result<(), Error> {
        match (self.algorithm, self.state) {
            (Algorithm::Primal, EngineState::Phase1) => self.primal_phase1_iteration(),
            (Algorithm::Primal, _) => self.primal_phase2_iteration(),
            (Algorithm::Dual, EngineState::Phase1) => self.dual_phase1_iteration(),
            (Algorithm::Dual, _) => self.dual_phase2_iteration(),
        }
    }

    fn count_iteration(&mut self) {
        self.statistics.iterations += 1;
        if self.state == EngineState::Phase1 {
            self.statistics.phase1_iterations += 1;
        }
        if self.statistics.iterations % 100 == 0 {
            debug!(
                "{:?} {:?} iter {}: objective {:.8e}, infeasibility {:.3e}, etas {}",
                self.algorithm,
                self.state,
                self.statistics.iterations,
                self.objective(),
                self.primal_infeasibility(),
                self.basis.update_count()
            );
        }
    }

    /// Accepts `outcome` if the current values come from a fresh factorization, reinverts
    /// otherwise so that the iteration is repeated.
    fn confirm(&mut self, outcome: EngineState) -> Result<(), Error> {
        if self.fresh {
            debug!("{:?} after {} iterations", outcome, self.statistics.iterations);
            self.state = outcome;
            Ok(())
        } else {
            trace!("checking {:?} on a fresh factorization", outcome);
            self.reinvert()
        }
    }

    fn numerical_stall(&mut self, what: &str) -> Result<(), Error> {
        if self.fresh {
            warn!("{} on a fresh factorization", what);
            Err(Error::Numerical)
        } else {
            debug!("{}, reinverting", what);
            self.reinvert()
        }
    }

    fn primal_phase1_iteration(&mut self) -> Result<(), Error> {
        if self.primal_feasible() {
            self.recompute_reduced_costs()?;
            self.state = EngineState::Phase2;
            debug!(
                "primal phase 1 finished after {} iterations",
                self.statistics.phase1_iterations
            );
            return Ok(());
        }

        let costs = self.phase1_reduced_costs()?;
        let tol = self.config.optimality_tolerance;
        let candidate = match self.primal_pricing.select_candidate(&costs, &self.states, tol) {
            Some(candidate) => candidate,
            None => return self.confirm(EngineState::Infeasible),
        };

        let column = self.ftran_column(candidate.variable)?;
        let params = self.ratio_params(
            self.config.primal_ratio_test,
            self.config.feasibility_tolerance,
        );
        let outcome = self.primal_test.phase1(
            &PrimalRatioInput {
                column: &column,
                basis_head: &self.basis_head,
                basic_values: &self.basic_values,
                lower: self.model.lower_bounds(),
                upper: self.model.upper_bounds(),
                entering: candidate.variable,
                direction: candidate.direction,
                reduced_cost: candidate.reduced_cost,
            },
            &params,
        );

        match outcome {
            PrimalOutcome::Pivot(step) => self.primal_pivot(&candidate, &step, &column, false),
            PrimalOutcome::BoundFlip { step } => {
                self.primal_flip(&candidate, step, &column);
                Ok(())
            }
            PrimalOutcome::NoBreakpoint
            | PrimalOutcome::Unbounded
            | PrimalOutcome::Fallback { .. } => {
                self.numerical_stall("primal phase 1 found no breakpoint")
            }
        }
    }

    fn primal_phase2_iteration(&mut self) -> Result<(), Error> {
        let tol = self.config.optimality_tolerance;
        let candidate =
            match self
                .primal_pricing
                .select_candidate(&self.reduced_costs, &self.states, tol)
            {
                Some(candidate) => candidate,
                None => {
                    if self.fresh && !self.primal_feasible() {
                        self.state = EngineState::Phase1;
                        return Ok(());
                    }
                    return self.confirm(EngineState::Optimal);
                }
            };

        let column = self.ftran_column(candidate.variable)?;
        let params = self.ratio_params(
            self.config.primal_ratio_test,
            self.config.feasibility_tolerance,
        );
        let outcome = self.primal_test.phase2(
            &PrimalRatioInput {
                column: &column,
                basis_head: &self.basis_head,
                basic_values: &self.basic_values,
                lower: self.model.lower_bounds(),
                upper: self.model.upper_bounds(),
                entering: candidate.variable,
                direction: candidate.direction,
                reduced_cost: candidate.reduced_cost,
            },
            &params,
        );

        match outcome {
            PrimalOutcome::Pivot(step) => self.primal_pivot(&candidate, &step, &column, true),
            PrimalOutcome::BoundFlip { step } => {
                self.primal_flip(&candidate, step, &column);
                Ok(())
            }
            PrimalOutcome::Unbounded => self.confirm(EngineState::Unbounded),
            PrimalOutcome::Fallback { row } => {
                debug!(
                    "basic variable {} is infeasible, back to primal phase 1",
                    self.basis_head[row]
                );
                self.statistics.fallbacks += 1;
                self.state = EngineState::Phase1;
                self.reinvert()
            }
            PrimalOutcome::NoBreakpoint => {
                self.numerical_stall("primal phase 2 found no breakpoint")
            }
        }
    }

    fn primal_pivot(
        &mut self,
        candidate: &PrimalCandidate,
        step: &PrimalStep,
        column: &NumericVector,
        update_reduced_costs: bool,
    ) -> Result<(), Error> {
        let entering = candidate.variable;
        if update_reduced_costs {
            let pivot_row = self.pivot_row(step.leaving_row)?;
            let alpha = pivot_row.at(entering);
            check_pivot(alpha, step.alpha)?;
            self.update_reduced_costs(entering, step.leaving_variable, &pivot_row, alpha);
        }

        let delta = candidate.direction * step.step;
        let entering_value = self.value(entering) + delta;
        self.shift_basic_values(delta, column);
        trace!(
            "primal pivot: {} enters, {} leaves row {} at {:?}, step {:e}",
            entering,
            step.leaving_variable,
            step.leaving_row,
            step.to,
            step.step
        );
        self.change_basis(step.leaving_row, entering, step.to, column, entering_value)?;
        self.count_iteration();
        Ok(())
    }

    fn primal_flip(&mut self, candidate: &PrimalCandidate, step: f64, column: &NumericVector) {
        let var = candidate.variable;
        self.shift_basic_values(candidate.direction * step, column);
        let to = if candidate.direction > 0.0 {
            BoundSide::Upper
        } else {
            BoundSide::Lower
        };
        let (state, value) = self.nonbasic_at(var, to);
        self.states.move_to(var, state.partition(), value);
        self.statistics.bound_flips += 1;
        self.fresh = false;
        trace!("bound flip: {} to {:?}", var, to);
        self.count_iteration();
    }

    fn dual_phase1_iteration(&mut self) -> Result<(), Error> {
        self.flip_boxed_to_dual_feasible();

        let num_rows = self.model.num_rows();
        let arithmetic = self.config.arithmetic;
        let mut aux = NumericVector::sparse(num_rows)
            .with_arithmetic(arithmetic)
            .with_sparsity_ratio(self.config.sparsity_ratio);
        let mut num_infeasible = 0;
        for var in self.states.iter_range(VariableState::NONBASIC) {
            let sign = self.dual_infeasibility_sign(var);
            if sign != 0.0 {
                num_infeasible += 1;
                for (row, coeff) in self.model.column_iter(var) {
                    aux.add_element(row, sign * coeff);
                }
            }
        }

        if num_infeasible == 0 {
            self.recompute_primal()?;
            self.state = EngineState::Phase2;
            debug!(
                "dual phase 1 finished after {} iterations",
                self.statistics.phase1_iterations
            );
            return Ok(());
        }
        self.basis.ftran(&mut aux)?;

        let tol = self.config.optimality_tolerance;
        let (lower, upper) = (self.model.lower_bounds(), self.model.upper_bounds());
        let mut leaving: Option<(usize, f64)> = None;
        for (row, val) in aux.nonzero_iter() {
            let var = self.basis_head[row];
            let target = if val > 0.0 { lower[var] } else { upper[var] };
            if val.abs() <= tol || !target.is_finite() {
                continue;
            }
            let better = match leaving {
                None => true,
                Some((r, v)) => val.abs() > v.abs() || (val.abs() == v.abs() && row < r),
            };
            if better {
                leaving = Some((row, val));
            }
        }
        let (row, val) = match leaving {
            Some(leaving) => leaving,
            None => return self.fall_back_to_primal(),
        };

        let leaving_to = if val > 0.0 {
            BoundSide::Lower
        } else {
            BoundSide::Upper
        };
        let pivot_row = self.pivot_row(row)?;
        let params = self.ratio_params(
            self.config.dual_ratio_test,
            self.config.optimality_tolerance,
        );
        let outcome = self.dual_test.phase1(
            &DualRatioInput {
                pivot_row: &pivot_row,
                reduced_costs: &self.reduced_costs,
                states: &self.states,
                lower: self.model.lower_bounds(),
                upper: self.model.upper_bounds(),
                leaving_to,
                initial_slope: val.abs(),
            },
            &params,
        );

        match outcome {
            DualOutcome::Pivot(step) => self.dual_pivot(row, leaving_to, &pivot_row, &step, false),
            DualOutcome::NoBreakpoint | DualOutcome::DualUnbounded => self.fall_back_to_primal(),
        }
    }

    fn fall_back_to_primal(&mut self) -> Result<(), Error> {
        debug!(
            "dual phase 1 stalled after {} iterations, continuing with the primal simplex",
            self.statistics.phase1_iterations
        );
        self.statistics.fallbacks += 1;
        self.algorithm = Algorithm::Primal;
        self.recompute_primal()?;
        self.state = if self.primal_feasible() {
            EngineState::Phase2
        } else {
            EngineState::Phase1
        };
        Ok(())
    }

    fn dual_phase2_iteration(&mut self) -> Result<(), Error> {
        let candidate = match self.dual_pricing.select_candidate(
            &self.basis_head,
            &self.basic_values,
            self.model.lower_bounds(),
            self.model.upper_bounds(),
            self.config.feasibility_tolerance,
        ) {
            Some(candidate) => candidate,
            None => return self.dual_optimal(),
        };

        let pivot_row = self.pivot_row(candidate.row)?;
        let params = self.ratio_params(
            self.config.dual_ratio_test,
            self.config.optimality_tolerance,
        );
        let outcome = self.dual_test.phase2(
            &DualRatioInput {
                pivot_row: &pivot_row,
                reduced_costs: &self.reduced_costs,
                states: &self.states,
                lower: self.model.lower_bounds(),
                upper: self.model.upper_bounds(),
                leaving_to: candidate.leaving_to,
                initial_slope: candidate.infeasibility,
            },
            &params,
        );

        match outcome {
            DualOutcome::Pivot(step) => {
                self.dual_pivot(candidate.row, candidate.leaving_to, &pivot_row, &step, true)
            }
            DualOutcome::DualUnbounded => self.confirm(EngineState::Infeasible),
            DualOutcome::NoBreakpoint => self.numerical_stall("dual phase 2 found no breakpoint"),
        }
    }

    /// The basis is primal feasible. Accept it if the reduced costs are still dual feasible
    /// on a fresh factorization.
    fn dual_optimal(&mut self) -> Result<(), Error> {
        if !self.fresh {
            return self.reinvert();
        }
        if self.flip_boxed_to_dual_feasible() > 0 {
            return self.recompute_primal();
        }
        if self.has_dual_infeasibility() {
            debug!("dual feasibility lost, finishing with the primal simplex");
            self.statistics.fallbacks += 1;
            self.algorithm = Algorithm::Primal;
            self.state = EngineState::Phase2;
            return Ok(());
        }
        self.confirm(EngineState::Optimal)
    }

    fn dual_pivot(
        &mut self,
        row: usize,
        leaving_to: BoundSide,
        pivot_row: &NumericVector,
        step: &DualStep,
        update_primal: bool,
    ) -> Result<(), Error> {
        let entering = step.entering;
        let leaving = self.basis_head[row];
        let column = self.ftran_column(entering)?;
        let alpha = column.at(row);
        check_pivot(step.alpha, alpha)?;

        let mut entering_value = self.value(entering);
        if update_primal {
            self.apply_flips(&step.flips)?;
            let target = self.bound(leaving, leaving_to);
            let theta = (self.basic_values[row] - target) / alpha;
            self.shift_basic_values(theta, &column);
            entering_value += theta;
        }
        self.update_reduced_costs(entering, leaving, pivot_row, step.alpha);

        trace!(
            "dual pivot: {} leaves row {} to {:?}, {} enters, step {:e}, {} flips",
            leaving,
            row,
            leaving_to,
            entering,
            step.step,
            step.flips.len()
        );
        self.change_basis(row, entering, leaving_to, &column, entering_value)?;
        self.count_iteration();
        Ok(())
    }

    fn apply_flips(&mut self, flips: &[BoundFlip]) -> Result<(), Error> {
        if flips.is_empty() {
            return Ok(());
        }

        let mut delta = NumericVector::sparse(self.model.num_rows())
            .with_arithmetic(self.config.arithmetic)
            .with_sparsity_ratio(self.config.sparsity_ratio);
        let mut moves = Vec::with_capacity(flips.len());
        for flip in flips {
            let (state, value) = self.nonbasic_at(flip.variable, flip.to);
            let change = value - self.value(flip.variable);
            for (row, coeff) in self.model.column_iter(flip.variable) {
                delta.add_element(row, change * coeff);
            }
            moves.push((flip.variable, state, value));
        }
        self.basis.ftran(&mut delta)?;

        self.shift_basic_values(1.0, &delta);
        for (var, state, value) in moves {
            self.states.move_to(var, state.partition(), value);
        }
        self.statistics.bound_flips += flips.len();
        self.fresh = false;
        Ok(())
    }

    /// Moves boxed nonbasic variables to the bound that makes their reduced cost feasible.
    /// Primal values are left untouched.
    fn flip_boxed_to_dual_feasible(&mut self) -> usize {
        let tol = self.config.optimality_tolerance;
        let model = &self.model;
        let d = &self.reduced_costs;
        let boxed = |var: usize| model.var_type(var) == VariableType::Bounded;
        let flips = self
            .states
            .iter_partition(VariableState::AtLower.partition())
            .filter(|&var| boxed(var) && d[var] < -tol)
            .map(|var| (var, BoundSide::Upper))
            .chain(
                self.states
                    .iter_partition(VariableState::AtUpper.partition())
                    .filter(|&var| boxed(var) && d[var] > tol)
                    .map(|var| (var, BoundSide::Lower)),
            )
            .collect::<Vec<_>>();

        for &(var, side) in &flips {
            let (state, value) = self.nonbasic_at(var, side);
            self.states.move_to(var, state.partition(), value);
        }
        if !flips.is_empty() {
            trace!("flipped {} boxed variables", flips.len());
            self.statistics.bound_flips += flips.len();
            self.fresh = false;
        }
        flips.len()
    }

    /// `1.0` if the nonbasic `var` is dual infeasible and wants to increase, `-1.0` if it wants
    /// to decrease, `0.0` otherwise. Boxed variables are never infeasible.
    fn dual_infeasibility_sign(&self, var: usize) -> f64 {
        let tol = self.config.optimality_tolerance;
        let d = self.reduced_costs[var];
        match self.model.var_type(var) {
            VariableType::Plus | VariableType::Free if d < -tol => 1.0,
            VariableType::Minus | VariableType::Free if d > tol => -1.0,
            _ => 0.0,
        }
    }

    fn has_dual_infeasibility(&self) -> bool {
        let tol = self.config.optimality_tolerance;
        self.states
            .iter_range(VariableState::NONBASIC)
            .any(|var| {
                let d = self.reduced_costs[var];
                let wrong_bound = match state_of(&self.states, var) {
                    VariableState::AtLower => d < -tol,
                    VariableState::AtUpper => d > tol,
                    _ => false,
                };
                self.dual_infeasibility_sign(var) != 0.0
                    || (wrong_bound && self.model.var_type(var) == VariableType::Bounded)
            })
    }

    fn update_reduced_costs(
        &mut self,
        entering: usize,
        leaving: usize,
        pivot_row: &NumericVector,
        alpha: f64,
    ) {
        let arithmetic = self.config.arithmetic;
        let theta = self.reduced_costs[entering] / alpha;
        for (var, coeff) in pivot_row.nonzero_iter() {
            if self.basis_pos[var] == SENTINEL {
                self.reduced_costs[var] =
                    arithmetic.add_scaled(self.reduced_costs[var], -theta, coeff);
            }
        }
        self.reduced_costs[entering] = 0.0;
        self.reduced_costs[leaving] = -theta;
    }

    /// `x_B -= delta * column`.
    fn shift_basic_values(&mut self, delta: f64, column: &NumericVector) {
        if delta == 0.0 {
            return;
        }
        let arithmetic = self.config.arithmetic;
        for (row, coeff) in column.nonzero_iter() {
            self.basic_values[row] = arithmetic.add_scaled(self.basic_values[row], -delta, coeff);
        }
    }

    fn change_basis(
        &mut self,
        row: usize,
        entering: usize,
        leaving_to: BoundSide,
        column: &NumericVector,
        entering_value: f64,
    ) -> Result<(), Error> {
        let leaving = self.basis_head[row];
        let (state, value) = self.nonbasic_at(leaving, leaving_to);

        self.basis_head[row] = entering;
        self.basis_pos[entering] = row;
        self.basis_pos[leaving] = SENTINEL;
        self.basic_values[row] = entering_value;
        self.states
            .move_to(entering, VariableState::Basic.partition(), 0.0);
        self.states.move_to(leaving, state.partition(), value);
        self.fresh = false;

        if self.basis.update(row, column).is_err() {
            debug!("basis update rejected, reinverting");
            self.reinvert()?;
        }
        Ok(())
    }

    /// Nonbasic state of `var` at the given bound.
    fn nonbasic_at(&self, var: usize, side: BoundSide) -> (VariableState, f64) {
        let (lb, ub) = (self.model.lower_bounds()[var], self.model.upper_bounds()[var]);
        if lb == ub {
            return (VariableState::Fixed, lb);
        }
        match side {
            BoundSide::Lower if lb.is_finite() => (VariableState::AtLower, lb),
            BoundSide::Upper if ub.is_finite() => (VariableState::AtUpper, ub),
            _ => VariableState::nonbasic_for(lb, ub),
        }
    }

    fn bound(&self, var: usize, side: BoundSide) -> f64 {
        match side {
            BoundSide::Lower => self.model.lower_bounds()[var],
            BoundSide::Upper => self.model.upper_bounds()[var],
        }
    }

    fn ratio_params(&self, method: RatioTestMethod, tolerance: f64) -> RatioTestParams {
        RatioTestParams {
            method,
            pivot_tolerance: self
                .config
                .working_pivot_tolerance(self.basis.update_count()),
            tolerance,
            stable_pivot_window: self.config.stable_pivot_window,
            stable_pivot_threshold: self.config.stable_pivot_threshold,
        }
    }

    /// `B^-1 a_var`.
    fn ftran_column(&mut self, var: usize) -> Result<NumericVector, Error> {
        let mut column = self
            .model
            .column(var, self.config.arithmetic)
            .with_sparsity_ratio(self.config.sparsity_ratio);
        self.basis.ftran(&mut column)?;
        Ok(column)
    }

    /// Row `row` of `B^-1 [A | -I]`.
    fn pivot_row(&mut self, row: usize) -> Result<NumericVector, Error> {
        let arithmetic = self.config.arithmetic;
        let mut rho = NumericVector::unit(self.model.num_rows(), row)
            .with_arithmetic(arithmetic)
            .with_sparsity_ratio(self.config.sparsity_ratio);
        self.basis.btran(&mut rho)?;
        Ok(self
            .model
            .transposed_product(&rho, arithmetic)
            .with_sparsity_ratio(self.config.sparsity_ratio))
    }

    fn reinvert(&mut self) -> Result<(), Error> {
        while let Err(err) = self.basis.invert(&self.model, &self.basis_head) {
            warn!("basis factorization failed: {}", err);
            if !self.basis.increase_stability() {
                self.fail(err);
                return Err(Error::Numerical);
            }
        }
        self.statistics.reinversions += 1;
        self.last_consistent = Some((self.basis_head.clone(), self.states.clone()));
        self.recompute_primal()?;
        self.recompute_reduced_costs()?;
        self.fresh = true;
        Ok(())
    }

    fn restore_consistent(&mut self) {
        let (head, states) = match self.last_consistent.take() {
            Some(consistent) => consistent,
            None => return,
        };
        debug!("restoring the last consistent basis");
        self.install(head.clone(), states.clone());
        let restored = self.basis.invert(&self.model, &self.basis_head).is_ok()
            && self.recompute_primal().is_ok()
            && self.recompute_reduced_costs().is_ok();
        if !restored {
            warn!("could not refactorize the last consistent basis");
        }
        self.last_consistent = Some((head, states));
    }

    /// `x_B = -B^-1 N x_N`.
    fn recompute_primal(&mut self) -> Result<(), Error> {
        let mut rhs = NumericVector::dense(self.model.num_rows())
            .with_arithmetic(self.config.arithmetic);
        for var in self.states.iter_range(VariableState::NONBASIC) {
            let value = *self.states.attached(var);
            if value != 0.0 {
                for (row, coeff) in self.model.column_iter(var) {
                    rhs.add_element(row, -value * coeff);
                }
            }
        }
        self.basis.ftran(&mut rhs)?;
        self.basic_values = rhs.to_vec();
        Ok(())
    }

    /// `d = c - [A | -I]^T B^-T c_B`.
    fn recompute_reduced_costs(&mut self) -> Result<(), Error> {
        let arithmetic = self.config.arithmetic;
        let costs = self.model.costs();
        let mut multipliers = NumericVector::from_entries(
            self.model.num_rows(),
            self.basis_head
                .iter()
                .enumerate()
                .map(|(row, &var)| (row, costs[var])),
        )
        .with_arithmetic(arithmetic);
        self.basis.btran(&mut multipliers)?;

        let products = self
            .model
            .transposed_product(&multipliers, arithmetic)
            .to_vec();
        let costs = self.model.costs();
        for (var, d) in self.reduced_costs.iter_mut().enumerate() {
            *d = if self.basis_pos[var] == SENTINEL {
                arithmetic.add(costs[var], -products[var])
            } else {
                0.0
            };
        }
        Ok(())
    }

    /// Reduced costs of the phase 1 objective: the sum of bound violations of basic
    /// variables.
    fn phase1_reduced_costs(&mut self) -> Result<Vec<f64>, Error> {
        let tol = self.config.feasibility_tolerance;
        let arithmetic = self.config.arithmetic;
        let (lower, upper) = (self.model.lower_bounds(), self.model.upper_bounds());
        let entries = self
            .basis_head
            .iter()
            .zip(&self.basic_values)
            .enumerate()
            .filter_map(|(row, (&var, &val))| {
                if val < lower[var] - tol {
                    Some((row, -1.0))
                } else if val > upper[var] + tol {
                    Some((row, 1.0))
                } else {
                    None
                }
            })
            .collect::<Vec<_>>();
        let mut multipliers =
            NumericVector::from_entries(self.model.num_rows(), entries).with_arithmetic(arithmetic);
        self.basis.btran(&mut multipliers)?;

        let products = self
            .model
            .transposed_product(&multipliers, arithmetic)
            .to_vec();
        Ok(products
            .iter()
            .enumerate()
            .map(|(var, &p)| {
                if self.basis_pos[var] == SENTINEL {
                    -p
                } else {
                    0.0
                }
            })
            .collect())
    }

    fn primal_feasible(&self) -> bool {
        let tol = self.config.feasibility_tolerance;
        let (lower, upper) = (self.model.lower_bounds(), self.model.upper_bounds());
        self.basis_head
            .iter()
            .zip(&self.basic_values)
            .all(|(&var, &val)| bound_violation(val, lower[var], upper[var]) <= tol)
    }

    fn primal_infeasibility(&self) -> f64 {
        let (lower, upper) = (self.model.lower_bounds(), self.model.upper_bounds());
        self.basis_head
            .iter()
            .zip(&self.basic_values)
            .map(|(&var, &val)| bound_violation(val, lower[var], upper[var]))
            .sum()
    }
}

/// Pivot elements computed from the row and from the column must agree.
fn check_pivot(from_row: f64, from_column: f64) -> Result<(), Error> {
    if (from_row - from_column).abs() > PIVOT_AGREEMENT * (1.0 + from_row.abs()) {
        warn!(
            "pivot mismatch: {:e} from the row, {:e} from the column",
            from_row, from_column
        );
        return Err(Error::Numerical);
    }
    Ok(())
}
