use sprs::CsVecBase;
use std::ops::Deref;

/// Marks "no index" in index arrays (detached list nodes, nonbasic entries of `basis_pos`).
pub(crate) const SENTINEL: usize = 0usize.wrapping_sub(1);

pub(crate) fn to_dense<IStorage, DStorage>(vec: &CsVecBase<IStorage, DStorage>) -> Vec<f64>
where
    IStorage: Deref<Target = [usize]>,
    DStorage: Deref<Target = [f64]>,
{
    let mut dense = vec![0.0; vec.dim()];
    vec.scatter(&mut dense);
    dense
}

/// Distance from `val` to the interval `[lb, ub]`.
pub(crate) fn bound_violation(val: f64, lb: f64, ub: f64) -> f64 {
    if val < lb {
        lb - val
    } else if val > ub {
        val - ub
    } else {
        0.0
    }
}

#[cfg(test)]
use sprs::CsMat;

#[cfg(test)]
pub(crate) fn assert_matrix_eq(mat: &CsMat<f64>, reference: &[Vec<f64>]) {
    let mat = mat.to_csr();
    assert_eq!(mat.rows(), reference.len());
    for (r, row) in mat.outer_iterator().enumerate() {
        assert_eq!(to_dense(&row), reference[r], "matrices differ in row {}", r);
    }
}

#[cfg(test)]
pub(crate) fn assert_close(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol,
        "{} differs from {} by more than {}",
        actual,
        expected,
        tol
    );
}
