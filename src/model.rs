//! Computational form of a problem: `A x - y = 0` with bounds on both `x` and `y`.

use crate::helpers::to_dense;
use crate::numeric::Arithmetic;
use crate::partition::PartitionedIndex;
use crate::vector::NumericVector;
use std::collections::HashMap;
use std::ops::Range;

type CsMat = sprs::CsMatI<f64, usize>;

/// Shape of the feasible interval of a variable.
///
/// Always derived from the current bounds, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariableType {
    /// Both bounds infinite.
    Free,
    /// Finite lower bound only.
    Plus,
    /// Finite upper bound only.
    Minus,
    /// Both bounds finite and different.
    Bounded,
    /// Both bounds finite and equal.
    Fixed,
}

impl VariableType {
    /// Classifies the interval `[lb, ub]`.
    pub fn from_bounds(lb: f64, ub: f64) -> VariableType {
        match (lb.is_finite(), ub.is_finite()) {
            (false, false) => VariableType::Free,
            (true, false) => VariableType::Plus,
            (false, true) => VariableType::Minus,
            (true, true) if lb == ub => VariableType::Fixed,
            (true, true) => VariableType::Bounded,
        }
    }

    /// True for `Bounded` and `Fixed` variables.
    pub fn is_boxed(self) -> bool {
        match self {
            VariableType::Bounded | VariableType::Fixed => true,
            _ => false,
        }
    }
}

/// Partition a variable belongs to. The discriminant is the partition number used in
/// [`VariableStates`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariableState {
    /// In the basis.
    Basic = 0,
    /// Nonbasic at its lower bound.
    AtLower = 1,
    /// Nonbasic at its upper bound.
    AtUpper = 2,
    /// Nonbasic with equal bounds.
    Fixed = 3,
    /// Nonbasic free variable, kept at zero.
    Free = 4,
}

impl VariableState {
    /// Number of partitions.
    pub const COUNT: usize = 5;

    /// Partitions holding nonbasic variables.
    pub const NONBASIC: Range<usize> = 1..5;

    /// Partition number.
    pub fn partition(self) -> usize {
        self as usize
    }

    /// Inverse of [`partition`](#method.partition).
    pub fn from_partition(p: usize) -> VariableState {
        match p {
            0 => VariableState::Basic,
            1 => VariableState::AtLower,
            2 => VariableState::AtUpper,
            3 => VariableState::Fixed,
            4 => VariableState::Free,
            _ => panic!("invalid variable state partition {}", p),
        }
    }

    /// Nonbasic state for a variable with bounds `[lb, ub]`, preferring the lower bound.
    pub fn nonbasic_for(lb: f64, ub: f64) -> (VariableState, f64) {
        match VariableType::from_bounds(lb, ub) {
            VariableType::Fixed => (VariableState::Fixed, lb),
            VariableType::Free => (VariableState::Free, 0.0),
            VariableType::Minus => (VariableState::AtUpper, ub),
            VariableType::Plus | VariableType::Bounded => (VariableState::AtLower, lb),
        }
    }
}

/// Basic/nonbasic partition of all variables. The attached value of a nonbasic variable is its
/// current value (a bound, or zero for free variables).
pub type VariableStates = PartitionedIndex<f64>;

/// Returns the state of `var`.
pub fn state_of(states: &VariableStates, var: usize) -> VariableState {
    VariableState::from_partition(states.where_is(var))
}

/// Linear program in computational form.
///
/// Variables `0..num_structural` are the structural ones, variable `num_structural + i` is the
/// logical variable of row `i` with column `-e_i` and the row bounds as its bounds.
#[derive(Clone)]
pub struct Model {
    num_structural: usize,
    costs: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    names: Vec<String>,
    name_index: HashMap<String, usize>,
    rows: CsMat,
    cols: CsMat,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Model({} structural, {} rows, nnz {})",
            self.num_structural,
            self.num_rows(),
            self.rows.nnz()
        )?;
        writeln!(f, "costs: {:?}", self.costs)?;
        for row in self.rows.outer_iterator() {
            writeln!(f, "{:?}", to_dense(&row))?;
        }
        writeln!(f, "lower: {:?}", self.lower)?;
        writeln!(f, "upper: {:?}", self.upper)
    }
}

/// A structural variable of a [`Model`].
#[derive(Clone, Debug)]
pub struct StructuralVar {
    /// Objective coefficient (minimization).
    pub cost: f64,
    /// Lower bound, possibly `-inf`.
    pub lower: f64,
    /// Upper bound, possibly `+inf`.
    pub upper: f64,
    /// Unique name.
    pub name: String,
}

/// A row `lower <= sum coeffs * x <= upper` of a [`Model`].
#[derive(Clone, Debug)]
pub struct ModelRow {
    /// Coefficients by structural variable index, sorted and without duplicates.
    pub coeffs: Vec<(usize, f64)>,
    /// Lower bound, possibly `-inf`.
    pub lower: f64,
    /// Upper bound, possibly `+inf`.
    pub upper: f64,
    /// Unique name, also the name of the logical variable.
    pub name: String,
}

impl Model {
    /// Builds the computational form. Row coefficients must be sorted by variable index.
    pub fn new(vars: Vec<StructuralVar>, rows: Vec<ModelRow>) -> Model {
        let num_structural = vars.len();
        let num_rows = rows.len();
        let num_vars = num_structural + num_rows;

        let mut costs = Vec::with_capacity(num_vars);
        let mut lower = Vec::with_capacity(num_vars);
        let mut upper = Vec::with_capacity(num_vars);
        let mut names = Vec::with_capacity(num_vars);
        for var in vars {
            costs.push(var.cost);
            lower.push(var.lower);
            upper.push(var.upper);
            names.push(var.name);
        }

        let mut indptr = Vec::with_capacity(num_rows + 1);
        let mut indices = vec![];
        let mut data = vec![];
        indptr.push(0);
        for (r, row) in rows.into_iter().enumerate() {
            debug_assert!(row.coeffs.windows(2).all(|w| w[0].0 < w[1].0));
            for (v, coeff) in row.coeffs {
                assert!(v < num_structural, "unknown variable {} in row {}", v, r);
                if coeff != 0.0 {
                    indices.push(v);
                    data.push(coeff);
                }
            }
            indices.push(num_structural + r);
            data.push(-1.0);
            indptr.push(indices.len());

            costs.push(0.0);
            lower.push(row.lower);
            upper.push(row.upper);
            names.push(row.name);
        }

        let rows = CsMat::new((num_rows, num_vars), indptr, indices, data);
        let cols = rows.to_csc();

        let name_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Model {
            num_structural,
            costs,
            lower,
            upper,
            names,
            name_index,
            rows,
            cols,
        }
    }

    /// Number of rows (and logical variables).
    pub fn num_rows(&self) -> usize {
        self.rows.rows()
    }

    /// Number of structural plus logical variables.
    pub fn num_vars(&self) -> usize {
        self.costs.len()
    }

    /// Number of structural variables.
    pub fn num_structural(&self) -> usize {
        self.num_structural
    }

    /// True if `var` is the logical variable of some row.
    pub fn is_logical(&self, var: usize) -> bool {
        var >= self.num_structural
    }

    /// Logical variable of row `row`.
    pub fn logical_of(&self, row: usize) -> usize {
        self.num_structural + row
    }

    /// Objective coefficients of all variables (zero for logicals).
    pub fn costs(&self) -> &[f64] {
        &self.costs
    }

    /// Lower bounds of all variables.
    pub fn lower_bounds(&self) -> &[f64] {
        &self.lower
    }

    /// Upper bounds of all variables.
    pub fn upper_bounds(&self) -> &[f64] {
        &self.upper
    }

    /// Type of `var` according to its bounds.
    pub fn var_type(&self, var: usize) -> VariableType {
        VariableType::from_bounds(self.lower[var], self.upper[var])
    }

    /// Name of `var`.
    pub fn name(&self, var: usize) -> &str {
        &self.names[var]
    }

    /// Variable with the given name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    /// Column-major copy of `[A | -I]`.
    pub(crate) fn csc(&self) -> &CsMat {
        &self.cols
    }

    /// Nonzeros of the column of `var`.
    pub fn column_iter(&self, var: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let (rows, vals): (&[usize], &[f64]) = match self.cols.outer_view(var) {
            Some(col) => col.into_raw_storage(),
            None => (&[], &[]),
        };
        rows.iter().copied().zip(vals.iter().copied())
    }

    /// Column of `var` as a vector of length `num_rows`.
    pub fn column(&self, var: usize, arithmetic: Arithmetic) -> NumericVector {
        NumericVector::from_entries(self.num_rows(), self.column_iter(var))
            .with_arithmetic(arithmetic)
    }

    /// Row `row` (logical column included) as a vector of length `num_vars`.
    pub fn row(&self, row: usize, arithmetic: Arithmetic) -> NumericVector {
        let entries = self
            .rows
            .outer_view(row)
            .map(|view| view.iter().map(|(v, &val)| (v, val)).collect::<Vec<_>>())
            .unwrap_or_default();
        NumericVector::from_entries(self.num_vars(), entries).with_arithmetic(arithmetic)
    }

    /// Computes `rho^T [A | -I]`, a vector of length `num_vars`.
    pub fn transposed_product(&self, rho: &NumericVector, arithmetic: Arithmetic) -> NumericVector {
        assert_eq!(rho.len(), self.num_rows());
        let mut res = vec![0.0; self.num_vars()];
        for (r, rho_val) in rho.nonzero_iter() {
            if let Some(row) = self.rows.outer_view(r) {
                for (v, &coeff) in row.iter() {
                    res[v] = arithmetic.add_scaled(res[v], rho_val, coeff);
                }
            }
        }
        NumericVector::from_dense(&res).with_arithmetic(arithmetic)
    }

    /// Computes `[A | -I] x` for a full vector of variable values.
    pub fn row_activities(&self, values: &[f64]) -> Vec<f64> {
        assert_eq!(values.len(), self.num_vars());
        self.rows
            .outer_iterator()
            .map(|row| row.iter().map(|(v, &coeff)| coeff * values[v]).sum::<f64>())
            .collect()
    }
}
