//! Sparse LU factorization of basis matrices (left-looking, threshold partial pivoting).

use crate::sparse::{Perm, ScatteredVec, SparseMat};
use crate::Error;

type CsMat = sprs::CsMatI<f64, usize>;

/// Pivots with smaller magnitude make the matrix numerically singular.
const SINGULAR_PIVOT: f64 = 1e-11;

/// Triangular factor with the diagonal kept apart from the off-diagonal entries.
#[derive(Clone, Debug)]
struct TriangularMat {
    off_diag: SparseMat,
    diag: Vec<f64>,
}

impl TriangularMat {
    fn nnz(&self) -> usize {
        self.off_diag.nnz() + self.diag.len()
    }

    fn transpose(&self) -> TriangularMat {
        TriangularMat {
            off_diag: self.off_diag.transpose(),
            diag: self.diag.clone(),
        }
    }

    /// Solves for column `col` once `rhs[col]` is final and propagates it to the other rows.
    fn eliminate_col(&self, col: usize, rhs: &mut [f64]) {
        let x = rhs[col] / self.diag[col];
        rhs[col] = x;
        for (r, &coeff) in self.off_diag.col_iter(col) {
            rhs[r] -= x * coeff;
        }
    }
}

/// `P B Q = L U` for a basis matrix `B`.
#[derive(Clone, Debug)]
pub(crate) struct LuFactors {
    lower: TriangularMat,
    upper: TriangularMat,
    row_perm: Perm,
    col_perm: Perm,
}

/// Buffers reused between factorizations and solves.
#[derive(Clone, Debug)]
pub(crate) struct LuWorkspace {
    rhs: ScatteredVec,
    reach: Reach,
}

impl LuWorkspace {
    pub fn with_capacity(n: usize) -> LuWorkspace {
        LuWorkspace {
            rhs: ScatteredVec::empty(n),
            reach: Reach::with_capacity(n),
        }
    }

    fn reset(&mut self, n: usize) {
        self.rhs.clear_and_resize(n);
        self.reach.clear_and_resize(n);
    }
}

impl LuFactors {
    pub fn nnz(&self) -> usize {
        self.lower.nnz() + self.upper.nnz()
    }

    /// Solves `B x = rhs` in place for a dense right-hand side.
    #[cfg(test)]
    pub fn solve_dense(&self, rhs: &mut [f64]) {
        let n = rhs.len();
        let mut permuted = vec![0.0; n];
        for (i, &val) in rhs.iter().enumerate() {
            permuted[self.row_perm.orig2new[i]] = val;
        }

        for col in 0..n {
            self.lower.eliminate_col(col, &mut permuted);
        }
        for col in (0..n).rev() {
            self.upper.eliminate_col(col, &mut permuted);
        }

        for (i, &val) in permuted.iter().enumerate() {
            rhs[self.col_perm.new2orig[i]] = val;
        }
    }

    /// Solves `B x = rhs` in place, touching only the entries reachable from the nonzeros of
    /// `rhs`.
    pub fn solve(&self, rhs: &mut ScatteredVec, ws: &mut LuWorkspace) {
        ws.reset(rhs.len());
        for &i in &rhs.nonzero {
            *ws.rhs.get_mut(self.row_perm.orig2new[i]) = rhs.values[i];
        }

        solve_sparse(&self.lower, ws);
        solve_sparse(&self.upper, ws);

        rhs.clear();
        for &i in &ws.rhs.nonzero {
            *rhs.get_mut(self.col_perm.new2orig[i]) = ws.rhs.values[i];
        }
    }

    /// Factors of `B^T`.
    pub fn transpose(&self) -> LuFactors {
        LuFactors {
            lower: self.upper.transpose(),
            upper: self.lower.transpose(),
            row_perm: self.col_perm.clone(),
            col_perm: self.row_perm.clone(),
        }
    }
}

fn solve_sparse(tri: &TriangularMat, ws: &mut LuWorkspace) {
    debug_assert_eq!(tri.diag.len(), ws.rhs.len());
    let off_diag = &tri.off_diag;
    ws.reach.run(
        &mut ws.rhs,
        |col| off_diag.col_rows(col),
        |_| true,
        |i| i,
    );

    // The DFS finishes nodes in reverse topological order.
    for &col in ws.reach.finished.iter().rev() {
        tri.eliminate_col(col, &mut ws.rhs.values);
    }
}

/// Factorizes the square matrix formed by the columns `basis_cols` of `mat` (stored by
/// columns).
///
/// Columns are processed in order of increasing nonzero count. Among the candidate pivots of a
/// column, those within `pivot_threshold` of the largest magnitude are eligible and the one in
/// the sparsest row wins.
///
/// # Errors
///
/// Returns `Error::Numerical` if the matrix is (numerically) singular.
pub(crate) fn factorize(
    mat: &CsMat,
    basis_cols: &[usize],
    pivot_threshold: f64,
    ws: &mut LuWorkspace,
) -> Result<LuFactors, Error> {
    assert!(mat.is_csc());
    let n = mat.rows();
    assert_eq!(n, basis_cols.len());

    let col_nnz = |c: usize| mat.outer_view(c).map_or(0, |col| col.nnz());
    trace!(
        "factorize: starting, basis nnz: {}",
        basis_cols.iter().map(|&c| col_nnz(c)).sum::<usize>()
    );

    let mut order = (0..n).collect::<Vec<_>>();
    order.sort_by_key(|&i| col_nnz(basis_cols[i]));
    let col_perm = Perm::from_new2orig(order);

    let mut row_counts = vec![0; n];
    for &c in basis_cols {
        if let Some(col) = mat.outer_view(c) {
            for (r, _) in col.iter() {
                row_counts[r] += 1;
            }
        }
    }

    ws.reset(n);

    // Rows of `lower` stay in original numbering until the end.
    let mut lower = SparseMat::new(n);
    let mut upper = SparseMat::new(n);
    let mut upper_diag = Vec::with_capacity(n);

    let mut new2orig_row = (0..n).collect::<Vec<_>>();
    let mut orig2new_row = new2orig_row.clone();

    for k in 0..n {
        let col = match mat.outer_view(basis_cols[col_perm.new2orig[k]]) {
            Some(col) => col,
            None => return Err(Error::Numerical),
        };

        // Solve L u = b restricted to the already pivoted rows.
        ws.rhs.clear();
        for (r, &val) in col.iter() {
            if orig2new_row[r] < k {
                *ws.rhs.get_mut(r) = val;
            }
        }
        ws.reach.run(
            &mut ws.rhs,
            |j| lower.col_rows(j),
            |j| j < k,
            |r| orig2new_row[r],
        );
        for &r in ws.reach.finished.iter().rev() {
            let x = ws.rhs.values[r];
            let j = orig2new_row[r];
            for (lr, coeff) in lower.col_iter(j) {
                let new_lr = orig2new_row[lr];
                if new_lr < k && new_lr > j {
                    ws.rhs.values[lr] -= x * coeff;
                }
            }
        }

        // The remaining rows get b minus the contribution of the new U column.
        let pivoted_len = ws.rhs.nonzero.len();
        for (r, &val) in col.iter() {
            if orig2new_row[r] >= k {
                *ws.rhs.get_mut(r) = val;
            }
        }
        for idx in 0..pivoted_len {
            let r = ws.rhs.nonzero[idx];
            let u = ws.rhs.values[r];
            if u == 0.0 {
                continue;
            }
            let j = orig2new_row[r];
            upper.push(j, u);
            for (lr, coeff) in lower.col_iter(j) {
                if orig2new_row[lr] >= k {
                    *ws.rhs.get_mut(lr) -= coeff * u;
                }
            }
        }

        let candidates = &ws.rhs.nonzero[pivoted_len..];
        let max_abs = candidates
            .iter()
            .map(|&r| ws.rhs.values[r].abs())
            .fold(0.0, f64::max);
        if !(max_abs >= SINGULAR_PIVOT) {
            debug!(
                "factorize: singular at column {} of {} (max candidate {:e})",
                k, n, max_abs
            );
            return Err(Error::Numerical);
        }

        let mut pivot_row = None;
        for &r in candidates {
            if ws.rhs.values[r].abs() >= pivot_threshold * max_abs {
                match pivot_row {
                    Some(best) if row_counts[best] <= row_counts[r] => {}
                    _ => pivot_row = Some(r),
                }
            }
        }
        let pivot_row = match pivot_row {
            Some(r) => r,
            None => return Err(Error::Numerical),
        };
        let pivot_val = ws.rhs.values[pivot_row];

        let displaced = new2orig_row[k];
        let pivot_new = orig2new_row[pivot_row];
        new2orig_row.swap(k, pivot_new);
        orig2new_row.swap(displaced, pivot_row);

        upper.seal_column();
        upper_diag.push(pivot_val);

        for idx in pivoted_len..ws.rhs.nonzero.len() {
            let r = ws.rhs.nonzero[idx];
            let val = ws.rhs.values[r];
            if r != pivot_row && val != 0.0 {
                lower.push(r, val / pivot_val);
            }
        }
        lower.seal_column();
    }

    for j in 0..lower.cols() {
        for r in lower.col_rows_mut(j) {
            *r = orig2new_row[*r];
        }
    }

    trace!(
        "factorize: done, lower nnz: {}, upper nnz: {}",
        lower.nnz(),
        upper.nnz()
    );

    Ok(LuFactors {
        lower: TriangularMat {
            off_diag: lower,
            diag: vec![1.0; n],
        },
        upper: TriangularMat {
            off_diag: upper,
            diag: upper_diag,
        },
        row_perm: Perm {
            orig2new: orig2new_row,
            new2orig: new2orig_row,
        },
        col_perm,
    })
}

/// Depth-first search computing which entries of a triangular solve become nonzero.
#[derive(Clone, Debug)]
struct Reach {
    stack: Vec<Frame>,
    is_visited: Vec<bool>,
    /// Nodes in the order they were finished (reverse topological order).
    finished: Vec<usize>,
}

#[derive(Clone, Copy, Debug)]
struct Frame {
    node: usize,
    child: usize,
}

impl Reach {
    fn with_capacity(n: usize) -> Reach {
        Reach {
            stack: Vec::with_capacity(n),
            is_visited: vec![false; n],
            finished: vec![],
        }
    }

    fn clear(&mut self) {
        debug_assert!(self.stack.is_empty());
        for &i in &self.finished {
            self.is_visited[i] = false;
        }
        self.finished.clear();
    }

    fn clear_and_resize(&mut self, n: usize) {
        self.clear();
        self.is_visited.resize(n, false);
    }

    /// Marks as nonzero in `rhs` every node reachable from its current nonzeros. Nodes are
    /// visited in original numbering, `children` and `keep` take the permuted one.
    fn run<'a>(
        &mut self,
        rhs: &mut ScatteredVec,
        children: impl Fn(usize) -> &'a [usize],
        keep: impl Fn(usize) -> bool,
        permuted: impl Fn(usize) -> usize,
    ) {
        self.clear();

        for &start in &rhs.nonzero {
            if self.is_visited[start] || !keep(permuted(start)) {
                continue;
            }

            self.stack.push(Frame {
                node: start,
                child: 0,
            });
            while let Some(frame) = self.stack.last_mut() {
                let node = frame.node;
                let node_children = children(permuted(node));
                if self.is_visited[node] {
                    // back from a child
                    frame.child += 1;
                } else {
                    self.is_visited[node] = true;
                }

                while frame.child < node_children.len() {
                    let c = node_children[frame.child];
                    if !self.is_visited[c] && keep(permuted(c)) {
                        break;
                    }
                    frame.child += 1;
                }

                if frame.child < node_children.len() {
                    let next = node_children[frame.child];
                    self.stack.push(Frame {
                        node: next,
                        child: 0,
                    });
                } else {
                    self.finished.push(node);
                    self.stack.pop();
                }
            }
        }

        for &i in &self.finished {
            if !rhs.is_nonzero[i] {
                rhs.is_nonzero[i] = true;
                rhs.nonzero.push(i);
            }
        }
    }
}
