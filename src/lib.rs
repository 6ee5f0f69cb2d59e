/*!
A bounded-variable simplex solver for linear programs.

[Linear programming](https://en.wikipedia.org/wiki/Linear_programming) is a technique for
finding the minimum (or maximum) of a linear function of a set of continuous variables
subject to linear equality and inequality constraints.

# Features

* Pure Rust implementation.
* Primal simplex with a composite phase 1 and dual simplex with bound flipping (long step)
  ratio tests, falling back to the primal algorithm when dual phase 1 gets stuck.
* Hybrid sparse/dense vectors with optional numerically stable arithmetic.
* Serializable basis snapshots that can be loaded back to warm start a solve.

# Entry points

Begin by creating a [`Problem`](struct.Problem.html) instance, declaring variables and adding
constraints. Solving it will produce a [`Solution`](struct.Solution.html) that can be used to
get the optimal objective value, variable values and the final basis.

The building blocks are public too: a [`SimplexEngine`](engine/struct.SimplexEngine.html)
works directly on a [`Model`](model/struct.Model.html) in computational form and can be
given a custom basis representation or pricing rule.

# Example

```
use pivotal::{Problem, OptimizationDirection, ComparisonOp};

// Maximize an objective function x + 2 * y of two variables x >= 0 and 0 <= y <= 3
let mut problem = Problem::new(OptimizationDirection::Maximize);
let x = problem.add_var(1.0, (0.0, f64::INFINITY));
let y = problem.add_var(2.0, (0.0, 3.0));

// subject to constraints: x + y <= 4 and 2 * x + y >= 2.
problem.add_constraint(&[(x, 1.0), (y, 1.0)], ComparisonOp::Le, 4.0);
problem.add_constraint(&[(x, 2.0), (y, 1.0)], ComparisonOp::Ge, 2.0);

// Optimal value is 7, achieved at x = 1 and y = 3.
let solution = problem.solve().unwrap();
assert_eq!(solution.objective(), 7.0);
assert_eq!(solution[x], 1.0);
assert_eq!(solution[y], 3.0);
```
*/

#![deny(missing_debug_implementations, missing_docs)]

#[macro_use]
extern crate log;

pub mod basis;
pub mod breakpoint;
pub mod config;
pub mod dual_ratio_test;
pub mod engine;
mod helpers;
mod lu;
pub mod model;
pub mod numeric;
pub mod partition;
pub mod pricing;
pub mod snapshot;
mod sparse;
pub mod vector;

pub use config::{Algorithm, ExpandConfig, RatioTestMethod, SolverConfig};
pub use engine::{EngineState, FailureReason, SimplexEngine, Statistics};
pub use snapshot::BasisSnapshot;

use model::{Model, ModelRow, StructuralVar};
use std::collections::HashSet;

/// An enum indicating whether to minimize or maximize objective function.
#[derive(Clone, Copy, Debug)]
pub enum OptimizationDirection {
    /// Minimize the objective function.
    Minimize,
    /// Maximize the objective function.
    Maximize,
}

/// A reference to a variable in a linear programming problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable(pub(crate) usize);

impl Variable {
    /// Sequence number of the variable.
    ///
    /// Variables are referenced by their number in the addition sequence. The method returns
    /// this number.
    pub fn idx(&self) -> usize {
        self.0
    }
}

/// A sum of variables multiplied by constant coefficients used as a left-hand side
/// when defining constraints.
#[derive(Clone, Debug)]
pub struct LinearExpr {
    vars: Vec<usize>,
    coeffs: Vec<f64>,
}

impl LinearExpr {
    /// Creates an empty linear expression.
    pub fn empty() -> Self {
        Self {
            vars: vec![],
            coeffs: vec![],
        }
    }

    /// Add a single term to the linear expression.
    ///
    /// Variables can be added to an expression in any order, but adding the same variable
    /// several times is forbidden (the [`Problem::add_constraint`] method will panic).
    ///
    /// [`Problem::add_constraint`]: struct.Problem.html#method.add_constraint
    pub fn add(&mut self, var: Variable, coeff: f64) {
        self.vars.push(var.0);
        self.coeffs.push(coeff);
    }

    /// Terms sorted by variable.
    fn into_sorted_terms(self) -> Vec<(usize, f64)> {
        let mut terms = self
            .vars
            .into_iter()
            .zip(self.coeffs)
            .collect::<Vec<_>>();
        terms.sort_by_key(|&(var, _)| var);
        for pair in terms.windows(2) {
            assert!(
                pair[0].0 != pair[1].0,
                "variable {} appears twice in a linear expression",
                pair[0].0
            );
        }
        terms
    }
}

/// A single `variable * constant` term in a linear expression.
/// This is an auxiliary struct for specifying conversions.
#[doc(hidden)]
#[derive(Clone, Copy, Debug)]
pub struct LinearTerm(Variable, f64);

impl From<(Variable, f64)> for LinearTerm {
    fn from(term: (Variable, f64)) -> Self {
        LinearTerm(term.0, term.1)
    }
}

impl<'a> From<&'a (Variable, f64)> for LinearTerm {
    fn from(term: &'a (Variable, f64)) -> Self {
        LinearTerm(term.0, term.1)
    }
}

impl<I: IntoIterator<Item = impl Into<LinearTerm>>> From<I> for LinearExpr {
    fn from(iter: I) -> Self {
        let mut expr = LinearExpr::empty();
        for term in iter {
            let LinearTerm(var, coeff) = term.into();
            expr.add(var, coeff);
        }
        expr
    }
}

impl std::iter::FromIterator<(Variable, f64)> for LinearExpr {
    fn from_iter<I: IntoIterator<Item = (Variable, f64)>>(iter: I) -> Self {
        let mut expr = LinearExpr::empty();
        for term in iter {
            expr.add(term.0, term.1)
        }
        expr
    }
}

impl std::iter::Extend<(Variable, f64)> for LinearExpr {
    fn extend<I: IntoIterator<Item = (Variable, f64)>>(&mut self, iter: I) {
        for term in iter {
            self.add(term.0, term.1)
        }
    }
}

/// An operator specifying the relation between left-hand and right-hand sides of the constraint.
#[derive(Clone, Copy, Debug)]
pub enum ComparisonOp {
    /// The == operator (equal to)
    Eq,
    /// The <= operator (less than or equal to)
    Le,
    /// The >= operator (greater than or equal to)
    Ge,
}

/// An error encountered while solving a problem.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Constrains can't simultaneously be satisfied.
    Infeasible,
    /// The objective function is unbounded.
    Unbounded,
    /// The basis became numerically singular and could not be recovered.
    Numerical,
    /// The iteration limit was reached before the solve finished.
    IterationLimit,
    /// The time limit was reached before the solve finished.
    TimeLimit,
    /// A basis snapshot does not describe a basis of the problem.
    InvalidBasis(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Infeasible => f.write_str("problem is infeasible"),
            Error::Unbounded => f.write_str("problem is unbounded"),
            Error::Numerical => f.write_str("numerical difficulties"),
            Error::IterationLimit => f.write_str("iteration limit reached"),
            Error::TimeLimit => f.write_str("time limit reached"),
            Error::InvalidBasis(msg) => write!(f, "invalid basis: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// A linear programming problem description.
#[derive(Clone)]
pub struct Problem {
    direction: OptimizationDirection,
    vars: Vec<StructuralVar>,
    rows: Vec<ModelRow>,
    names: HashSet<String>,
}

impl std::fmt::Debug for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only printing lengths here because actual data is probably huge.
        f.debug_struct("Problem")
            .field("direction", &self.direction)
            .field("num_vars", &self.vars.len())
            .field("num_constraints", &self.rows.len())
            .finish()
    }
}

impl Problem {
    /// Create a new problem instance.
    pub fn new(direction: OptimizationDirection) -> Self {
        Problem {
            direction,
            vars: vec![],
            rows: vec![],
            names: HashSet::new(),
        }
    }

    /// Add a new variable to the problem.
    ///
    /// `obj_coeff` is a coefficient of the term in the objective function corresponding to this
    /// variable, `min` and `max` are the minimum and maximum (inclusive) bounds of this
    /// variable. If one of the bounds is absent, use `f64::NEG_INFINITY` for minimum and
    /// `f64::INFINITY` for maximum.
    ///
    /// The variable is named `x<idx>` in basis snapshots.
    pub fn add_var(&mut self, obj_coeff: f64, bounds: (f64, f64)) -> Variable {
        let name = format!("x{}", self.vars.len());
        self.add_var_named(name, obj_coeff, bounds)
    }

    /// Add a new variable with the given name (used in basis snapshots).
    ///
    /// # Panics
    ///
    /// Will panic if a variable or constraint with the same name already exists.
    pub fn add_var_named(
        &mut self,
        name: impl Into<String>,
        obj_coeff: f64,
        (min, max): (f64, f64),
    ) -> Variable {
        let var = Variable(self.vars.len());
        let cost = match self.direction {
            OptimizationDirection::Minimize => obj_coeff,
            OptimizationDirection::Maximize => -obj_coeff,
        };
        let name = self.claim_name(name.into());
        self.vars.push(StructuralVar {
            cost,
            lower: min,
            upper: max,
            name,
        });
        var
    }

    /// Add a linear constraint to the problem.
    ///
    /// The constraint is named `r<idx>` in basis snapshots.
    ///
    /// # Panics
    ///
    /// Will panic if a variable was added more than once to the left-hand side expression.
    ///
    /// # Examples
    ///
    /// Left-hand side of the constraint can be specified in several ways:
    /// ```
    /// # use pivotal::*;
    /// let mut problem = Problem::new(OptimizationDirection::Minimize);
    /// let x = problem.add_var(1.0, (0.0, f64::INFINITY));
    /// let y = problem.add_var(1.0, (0.0, f64::INFINITY));
    ///
    /// // Add an x + y >= 2 constraint, specifying the left-hand side expression:
    ///
    /// // * by passing a slice of pairs (useful when explicitly enumerating variables)
    /// problem.add_constraint(&[(x, 1.0), (y, 1.0)], ComparisonOp::Ge, 2.0);
    ///
    /// // * by passing an iterator of variable-coefficient pairs.
    /// let vars = [x, y];
    /// problem.add_constraint(vars.iter().map(|&v| (v, 1.0)), ComparisonOp::Ge, 2.0);
    ///
    /// // * by manually constructing a LinearExpr.
    /// let mut lhs = LinearExpr::empty();
    /// for &v in &vars {
    ///     lhs.add(v, 1.0);
    /// }
    /// problem.add_constraint(lhs, ComparisonOp::Ge, 2.0);
    /// ```
    pub fn add_constraint(&mut self, expr: impl Into<LinearExpr>, cmp_op: ComparisonOp, rhs: f64) {
        let bounds = match cmp_op {
            ComparisonOp::Eq => (rhs, rhs),
            ComparisonOp::Le => (f64::NEG_INFINITY, rhs),
            ComparisonOp::Ge => (rhs, f64::INFINITY),
        };
        self.add_range_constraint(expr, bounds);
    }

    /// Add a constraint `min <= expr <= max`.
    ///
    /// # Panics
    ///
    /// Will panic if a variable was added more than once to the left-hand side expression.
    pub fn add_range_constraint(&mut self, expr: impl Into<LinearExpr>, (min, max): (f64, f64)) {
        let name = self.claim_name(format!("r{}", self.rows.len()));
        let coeffs = expr.into().into_sorted_terms();
        self.rows.push(ModelRow {
            coeffs,
            lower: min,
            upper: max,
            name,
        });
    }

    fn claim_name(&mut self, name: String) -> String {
        assert!(self.names.insert(name.clone()), "duplicate name {}", name);
        name
    }

    /// The problem in computational form, with the objective in minimization form.
    pub fn to_model(&self) -> Model {
        Model::new(self.vars.clone(), self.rows.clone())
    }

    /// Solve the problem with default settings, finding the optimal objective function value
    /// and variable values.
    ///
    /// # Errors
    ///
    /// Will return an error, if the problem is infeasible (constraints can't be satisfied)
    /// or if the objective value is unbounded.
    pub fn solve(&self) -> Result<Solution, Error> {
        self.solve_with(SolverConfig::default())
    }

    /// Solve the problem with the given settings.
    ///
    /// # Errors
    ///
    /// Besides infeasibility and unboundedness, reports reaching a configured limit and
    /// unrecoverable numerical trouble.
    pub fn solve_with(&self, config: SolverConfig) -> Result<Solution, Error> {
        let engine = SimplexEngine::new(self.to_model(), config);
        self.finish(engine)
    }

    /// Solve the problem starting from a basis saved by
    /// [`Solution::basis_snapshot`](struct.Solution.html#method.basis_snapshot).
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidBasis` if the snapshot does not fit the problem, otherwise the
    /// same errors as [`solve_with`](#method.solve_with).
    pub fn solve_from(
        &self,
        basis: &BasisSnapshot,
        config: SolverConfig,
    ) -> Result<Solution, Error> {
        let mut engine = SimplexEngine::new(self.to_model(), config);
        engine.load_basis(basis)?;
        self.finish(engine)
    }

    fn finish(&self, mut engine: SimplexEngine) -> Result<Solution, Error> {
        match engine.run() {
            EngineState::Optimal => {}
            EngineState::Infeasible => return Err(Error::Infeasible),
            EngineState::Unbounded => return Err(Error::Unbounded),
            EngineState::Failed(FailureReason::IterationLimit) => return Err(Error::IterationLimit),
            EngineState::Failed(FailureReason::TimeLimit) => return Err(Error::TimeLimit),
            EngineState::Failed(FailureReason::Numerical)
            | EngineState::Phase1
            | EngineState::Phase2 => return Err(Error::Numerical),
        }

        let values = (0..self.vars.len()).map(|var| engine.value(var)).collect();
        Ok(Solution {
            direction: self.direction,
            values,
            engine,
        })
    }
}

/// A solution of a problem: optimal objective function value and variable values.
///
/// Note that a `Solution` instance contains the whole solver machinery which can require
/// a lot of memory for larger problems. Thus saving the `Solution` instance (as opposed
/// to getting the values of interest and discarding the solution) is mainly useful if you
/// want to inspect the final basis.
pub struct Solution {
    direction: OptimizationDirection,
    values: Vec<f64>,
    engine: SimplexEngine,
}

impl std::fmt::Debug for Solution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only printing lengths here because actual data is probably huge.
        f.debug_struct("Solution")
            .field("direction", &self.direction)
            .field("num_vars", &self.values.len())
            .field("num_constraints", &self.engine.model().num_rows())
            .field("objective", &self.objective())
            .finish()
    }
}

impl Solution {
    /// Optimal value of the objective function.
    pub fn objective(&self) -> f64 {
        match self.direction {
            OptimizationDirection::Minimize => self.engine.objective(),
            OptimizationDirection::Maximize => -self.engine.objective(),
        }
    }

    /// Value of the variable at optimum.
    ///
    /// Note that you can use indexing operations to get variable values.
    pub fn var_value(&self, var: Variable) -> &f64 {
        assert!(var.0 < self.values.len());
        &self.values[var.0]
    }

    /// Iterate over the variable-value pairs of the solution.
    pub fn iter(&self) -> SolutionIter {
        SolutionIter {
            solution: self,
            var_idx: 0,
        }
    }

    /// Counters of the solve.
    pub fn statistics(&self) -> Statistics {
        self.engine.statistics()
    }

    /// The optimal basis, for inspection or to warm start a later solve.
    pub fn basis_snapshot(&self) -> BasisSnapshot {
        self.engine.snapshot()
    }

    /// The engine that produced this solution.
    pub fn engine(&self) -> &SimplexEngine {
        &self.engine
    }
}

impl std::ops::Index<Variable> for Solution {
    type Output = f64;

    fn index(&self, var: Variable) -> &Self::Output {
        self.var_value(var)
    }
}

/// An iterator over the variable-value pairs of a [`Solution`].
#[derive(Debug, Clone)]
pub struct SolutionIter<'a> {
    solution: &'a Solution,
    var_idx: usize,
}

impl<'a> Iterator for SolutionIter<'a> {
    type Item = (Variable, &'a f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.var_idx < self.solution.values.len() {
            let var_idx = self.var_idx;
            self.var_idx += 1;
            Some((Variable(var_idx), &self.solution.values[var_idx]))
        } else {
            None
        }
    }
}

impl<'a> IntoIterator for &'a Solution {
    type Item = (Variable, &'a f64);
    type IntoIter = SolutionIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::assert_close;

    fn both_algorithms() -> Vec<SolverConfig> {
        vec![
            SolverConfig {
                algorithm: Algorithm::Primal,
                ..SolverConfig::default()
            },
            SolverConfig {
                algorithm: Algorithm::Dual,
                ..SolverConfig::default()
            },
        ]
    }

    #[test]
    fn optimize() {
        let mut problem = Problem::new(OptimizationDirection::Maximize);
        let v1 = problem.add_var(3.0, (12.0, f64::INFINITY));
        let v2 = problem.add_var(4.0, (5.0, f64::INFINITY));
        problem.add_constraint(&[(v1, 1.0), (v2, 1.0)], ComparisonOp::Le, 20.0);
        problem.add_constraint(&[(v2, -4.0), (v1, 1.0)], ComparisonOp::Ge, -20.0);

        for config in both_algorithms() {
            let sol = problem.solve_with(config).unwrap();
            assert_close(sol[v1], 12.0, 1e-9);
            assert_close(sol[v2], 8.0, 1e-9);
            assert_close(sol.objective(), 68.0, 1e-9);
        }
    }

    #[test]
    fn empty_expr_constraints() {
        let trivial = [
            (LinearExpr::empty(), ComparisonOp::Eq, 0.0),
            (LinearExpr::empty(), ComparisonOp::Ge, -1.0),
            (LinearExpr::empty(), ComparisonOp::Le, 1.0),
        ];

        let mut problem = Problem::new(OptimizationDirection::Minimize);
        let _ = problem.add_var(1.0, (0.0, f64::INFINITY));
        for (expr, op, b) in trivial.iter().cloned() {
            problem.add_constraint(expr, op, b);
        }
        assert_eq!(problem.solve().map(|s| s.objective()), Ok(0.0));

        let infeasible = [
            (LinearExpr::empty(), ComparisonOp::Eq, 12.0),
            (LinearExpr::empty(), ComparisonOp::Ge, 34.0),
            (LinearExpr::empty(), ComparisonOp::Le, -56.0),
        ];

        for (expr, op, b) in infeasible.iter().cloned() {
            let mut cloned = problem.clone();
            cloned.add_constraint(expr, op, b);
            for config in both_algorithms() {
                assert_eq!(
                    cloned.solve_with(config).map(|_| "solved"),
                    Err(Error::Infeasible)
                );
            }
        }

        let _ = problem.add_var(-1.0, (0.0, f64::INFINITY));
        for config in both_algorithms() {
            assert_eq!(
                problem.solve_with(config).map(|_| "solved"),
                Err(Error::Unbounded)
            );
        }
    }

    #[test]
    fn free_variables() {
        let mut problem = Problem::new(OptimizationDirection::Maximize);
        let v1 = problem.add_var(1.0, (0.0, f64::INFINITY));
        let v2 = problem.add_var(2.0, (f64::NEG_INFINITY, f64::INFINITY));
        problem.add_constraint(&[(v1, 1.0), (v2, 1.0)], ComparisonOp::Le, 4.0);
        problem.add_constraint(&[(v1, 1.0), (v2, 1.0)], ComparisonOp::Ge, 2.0);
        problem.add_constraint(&[(v1, 1.0), (v2, -1.0)], ComparisonOp::Ge, 0.0);

        for config in both_algorithms() {
            let sol = problem.solve_with(config).unwrap();
            assert_close(sol[v1], 2.0, 1e-9);
            assert_close(sol[v2], 2.0, 1e-9);
            assert_close(sol.objective(), 6.0, 1e-9);
        }
    }

    #[test]
    fn inconsistent_bounds() {
        let mut problem = Problem::new(OptimizationDirection::Minimize);
        let v = problem.add_var(1.0, (1.0, 0.0));
        problem.add_constraint(&[(v, 1.0)], ComparisonOp::Le, 10.0);
        assert_eq!(problem.solve().map(|_| "solved"), Err(Error::Infeasible));
    }

    #[test]
    fn range_constraints_and_names() {
        let mut problem = Problem::new(OptimizationDirection::Minimize);
        let a = problem.add_var_named("apples", 1.0, (0.0, 10.0));
        let b = problem.add_var_named("bananas", 2.0, (0.0, 10.0));
        problem.add_range_constraint(&[(b, 1.0), (a, 1.0)], (3.0, 5.0));
        problem.add_constraint(&[(a, 1.0), (b, -1.0)], ComparisonOp::Le, 1.0);

        let sol = problem.solve().unwrap();
        assert_close(sol[a], 2.0, 1e-9);
        assert_close(sol[b], 1.0, 1e-9);
        assert_close(sol.objective(), 4.0, 1e-9);
        assert_eq!(
            sol.iter().map(|(v, &val)| (v.idx(), val.round())).collect::<Vec<_>>(),
            vec![(0, 2.0), (1, 1.0)]
        );

        let snapshot = sol.basis_snapshot();
        let mut names = snapshot
            .basic
            .iter()
            .map(|e| e.name.as_str())
            .chain(snapshot.nonbasic.iter().map(|e| e.name.as_str()))
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["apples", "bananas", "r0", "r1"]);
    }

    #[test]
    #[should_panic(expected = "appears twice")]
    fn repeated_term() {
        let mut problem = Problem::new(OptimizationDirection::Minimize);
        let v = problem.add_var(1.0, (0.0, 1.0));
        problem.add_constraint(&[(v, 1.0), (v, 2.0)], ComparisonOp::Le, 1.0);
    }

    #[test]
    #[should_panic(expected = "duplicate name")]
    fn repeated_name() {
        let mut problem = Problem::new(OptimizationDirection::Minimize);
        problem.add_var_named("r0", 1.0, (0.0, 1.0));
        problem.add_constraint(LinearExpr::empty(), ComparisonOp::Le, 1.0);
    }

    #[test]
    fn limits_and_warm_start() {
        let mut problem = Problem::new(OptimizationDirection::Maximize);
        let x = problem.add_var(1.0, (0.0, f64::INFINITY));
        let y = problem.add_var(2.0, (0.0, 3.0));
        problem.add_constraint(&[(x, 1.0), (y, 1.0)], ComparisonOp::Le, 4.0);
        problem.add_constraint(&[(x, 2.0), (y, 1.0)], ComparisonOp::Ge, 2.0);

        let limited = SolverConfig {
            algorithm: Algorithm::Primal,
            iteration_limit: Some(0),
            ..SolverConfig::default()
        };
        assert_eq!(
            problem.solve_with(limited).map(|_| "solved"),
            Err(Error::IterationLimit)
        );

        let sol = problem.solve().unwrap();
        assert!(sol.statistics().iterations > 0);
        let snapshot = sol.basis_snapshot();

        for config in both_algorithms() {
            let warm = problem.solve_from(&snapshot, config).unwrap();
            assert_eq!(warm.statistics().iterations, 0);
            assert_close(warm.objective(), 7.0, 1e-9);
            assert_close(warm[x], 1.0, 1e-9);
            assert_close(warm[y], 3.0, 1e-9);
        }

        let mut other = Problem::new(OptimizationDirection::Minimize);
        other.add_var(1.0, (0.0, 1.0));
        match other.solve_from(&snapshot, SolverConfig::default()) {
            Err(Error::InvalidBasis(_)) => {}
            res => panic!("unexpected result {:?}", res.map(|s| s.objective())),
        }
    }
}
