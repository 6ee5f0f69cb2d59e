//! Representation of the basis inverse.

use crate::lu::{factorize, LuFactors, LuWorkspace};
use crate::model::Model;
use crate::sparse::{ScatteredVec, SparseMat};
use crate::vector::NumericVector;
use crate::Error;
use std::fmt;

/// Operations with the inverse of the current basis matrix `B`.
///
/// `B` consists of the columns of `[A | -I]` listed in the basis head, in row order.
pub trait Basis: fmt::Debug {
    /// Computes a fresh representation of `B^-1` for the given basis head and forgets all
    /// updates.
    fn invert(&mut self, model: &Model, basis_head: &[usize]) -> Result<(), Error>;

    /// Replaces `vec` with `B^-1 vec`.
    fn ftran(&mut self, vec: &mut NumericVector) -> Result<(), Error>;

    /// Replaces `vec` with `B^-T vec`.
    fn btran(&mut self, vec: &mut NumericVector) -> Result<(), Error>;

    /// Records the replacement of the basic variable of `row` by the variable whose
    /// ftran-transformed column is `column`.
    fn update(&mut self, row: usize, column: &NumericVector) -> Result<(), Error>;

    /// Number of updates since the last inversion.
    fn update_count(&self) -> usize;

    /// True if the accumulated updates make a fresh inversion worthwhile.
    fn wants_reinversion(&self) -> bool;

    /// Switches to numerically safer (and slower) settings for the following inversions.
    /// Returns `false` if the settings are already the safest ones.
    fn increase_stability(&mut self) -> bool;
}

/// Smallest pivot magnitude accepted by a basis update.
const MIN_UPDATE_PIVOT: f64 = 1e-11;

/// LU factors of the basis at the last inversion followed by a file of eta matrices (product
/// form of the inverse), one per basis change.
pub struct LuBasis {
    factors: Option<(LuFactors, LuFactors)>,
    workspace: LuWorkspace,
    etas: EtaFile,
    rhs: ScatteredVec,
    pivot_threshold: f64,
}

impl fmt::Debug for LuBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuBasis")
            .field("lu_nnz", &self.factors.as_ref().map(|(lu, _)| lu.nnz()))
            .field("etas", &self.etas.len())
            .field("eta_nnz", &self.etas.coeff_cols.nnz())
            .field("pivot_threshold", &self.pivot_threshold)
            .finish()
    }
}

impl LuBasis {
    /// Creates an uninverted basis representation with the given LU pivot threshold.
    pub fn new(pivot_threshold: f64) -> LuBasis {
        LuBasis {
            factors: None,
            workspace: LuWorkspace::with_capacity(0),
            etas: EtaFile::new(0),
            rhs: ScatteredVec::empty(0),
            pivot_threshold,
        }
    }

    /// Current LU pivot threshold.
    pub fn pivot_threshold(&self) -> f64 {
        self.pivot_threshold
    }

    fn load_rhs(&mut self, vec: &NumericVector) {
        assert_eq!(vec.len(), self.rhs.len(), "vector length differs from basis size");
        self.rhs.set(vec.nonzero_iter());
    }

    fn store_rhs(&self, vec: &mut NumericVector) -> Result<(), Error> {
        let arithmetic = vec.arithmetic();
        if self.rhs.iter().any(|(_, val)| !val.is_finite()) {
            warn!("non-finite value in basis solve");
            return Err(Error::Numerical);
        }
        vec.assign_entries(
            self.rhs
                .iter()
                .map(|(i, val)| (i, arithmetic.snap(val)))
                .filter(|&(_, val)| val != 0.0),
        );
        Ok(())
    }
}

impl Basis for LuBasis {
    fn invert(&mut self, model: &Model, basis_head: &[usize]) -> Result<(), Error> {
        let n = basis_head.len();
        self.etas.clear_and_resize(n);
        self.rhs.clear_and_resize(n);
        self.factors = None;

        let lu = factorize(
            model.csc(),
            basis_head,
            self.pivot_threshold,
            &mut self.workspace,
        )?;
        let lu_transp = lu.transpose();
        self.factors = Some((lu, lu_transp));
        Ok(())
    }

    fn ftran(&mut self, vec: &mut NumericVector) -> Result<(), Error> {
        self.load_rhs(vec);
        {
            let (lu, _) = match &self.factors {
                Some(factors) => factors,
                None => panic!("basis used before inversion"),
            };
            lu.solve(&mut self.rhs, &mut self.workspace);
        }

        for idx in 0..self.etas.len() {
            let row = self.etas.rows[idx];
            let coeff = self.rhs.get(row);
            if coeff == 0.0 {
                continue;
            }
            for (r, &val) in self.etas.coeff_cols.col_iter(idx) {
                *self.rhs.get_mut(r) -= coeff * val;
            }
        }

        self.store_rhs(vec)
    }

    fn btran(&mut self, vec: &mut NumericVector) -> Result<(), Error> {
        self.load_rhs(vec);
        for idx in (0..self.etas.len()).rev() {
            let coeff = self
                .etas
                .coeff_cols
                .col_iter(idx)
                .map(|(r, &val)| val * self.rhs.get(r))
                .sum::<f64>();
            if coeff != 0.0 {
                *self.rhs.get_mut(self.etas.rows[idx]) -= coeff;
            }
        }

        {
            let (_, lu_transp) = match &self.factors {
                Some(factors) => factors,
                None => panic!("basis used before inversion"),
            };
            lu_transp.solve(&mut self.rhs, &mut self.workspace);
        }

        self.store_rhs(vec)
    }

    fn update(&mut self, row: usize, column: &NumericVector) -> Result<(), Error> {
        let pivot = column.at(row);
        if !(pivot.abs() >= MIN_UPDATE_PIVOT) {
            warn!("rejecting basis update with pivot {:e} in row {}", pivot, row);
            return Err(Error::Numerical);
        }

        let mut entries = column
            .nonzero_iter()
            .map(|(r, val)| {
                if r == row {
                    (r, (val - 1.0) / pivot)
                } else {
                    (r, val / pivot)
                }
            })
            .filter(|&(_, val)| val != 0.0)
            .collect::<Vec<_>>();
        entries.sort_unstable_by_key(|&(r, _)| r);
        self.etas.push(row, entries);
        Ok(())
    }

    fn update_count(&self) -> usize {
        self.etas.len()
    }

    fn wants_reinversion(&self) -> bool {
        self.factors.as_ref().map_or(true, |(lu, _)| {
            self.etas.len() > 0 && self.etas.coeff_cols.nnz() >= lu.nnz() / 2
        })
    }

    fn increase_stability(&mut self) -> bool {
        let stricter = if self.pivot_threshold < 0.5 {
            0.5
        } else if self.pivot_threshold < 0.9 {
            0.9
        } else {
            return false;
        };
        debug!(
            "raising LU pivot threshold from {} to {}",
            self.pivot_threshold, stricter
        );
        self.pivot_threshold = stricter;
        true
    }
}

/// Columns `(alpha - e_r) / alpha_r` of the basis changes, in order of creation. Applying the
/// inverse of change `k` to `x` subtracts `x_r` times its column.
#[derive(Clone, Debug)]
struct EtaFile {
    rows: Vec<usize>,
    coeff_cols: SparseMat,
}

impl EtaFile {
    fn new(n_rows: usize) -> EtaFile {
        EtaFile {
            rows: vec![],
            coeff_cols: SparseMat::new(n_rows),
        }
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn clear_and_resize(&mut self, n_rows: usize) {
        self.rows.clear();
        self.coeff_cols.clear_and_resize(n_rows);
    }

    fn push(&mut self, row: usize, coeffs: Vec<(usize, f64)>) {
        self.rows.push(row);
        self.coeff_cols.append_col(coeffs);
    }
}
