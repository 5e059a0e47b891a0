//! Dense‐matrix API on top of Faer.
//!
//! Besides the core trait impls for `Mat`, this module carries the small
//! dense kernels the local subdomain work is built from: submatrix extraction,
//! slice products, rank-revealing orthonormalisation and the singularity check
//! used before a local factorization is trusted.

use crate::core::traits::{Diagonal, MatShape, SubmatrixExtract};
use crate::error::KError;
use faer::{Mat, MatRef};
use num_traits::Float;

impl<T: Copy + num_traits::Float> SubmatrixExtract for Mat<T> {
    type Output = Mat<T>;

    fn extract_submatrix(&self, rows: &[usize], cols: &[usize]) -> Mat<T> {
        Mat::from_fn(rows.len(), cols.len(), |i, j| self[(rows[i], cols[j])])
    }
}

impl<T: Copy + num_traits::Float> MatShape for Mat<T> {
    fn nrows(&self) -> usize {
        Mat::nrows(self)
    }
    fn ncols(&self) -> usize {
        Mat::ncols(self)
    }
}

impl<T: Copy + num_traits::Float> Diagonal<T> for Mat<T> {
    fn assembled_diagonal(&self) -> Vec<T> {
        (0..Mat::nrows(self).min(Mat::ncols(self))).map(|i| self[(i, i)]).collect()
    }
}

/// y = A x on plain slices, walking A by columns.
pub fn gemv<T: Float>(a: MatRef<'_, T>, x: &[T], y: &mut [T]) {
    debug_assert_eq!(a.ncols(), x.len());
    debug_assert_eq!(a.nrows(), y.len());
    y.iter_mut().for_each(|yi| *yi = T::zero());
    for (j, &xj) in x.iter().enumerate() {
        if xj == T::zero() {
            continue;
        }
        for (i, yi) in y.iter_mut().enumerate() {
            *yi = *yi + a[(i, j)] * xj;
        }
    }
}

/// y = Aᵀ x on plain slices.
pub fn gemv_transpose<T: Float>(a: MatRef<'_, T>, x: &[T], y: &mut [T]) {
    debug_assert_eq!(a.nrows(), x.len());
    debug_assert_eq!(a.ncols(), y.len());
    for (j, yj) in y.iter_mut().enumerate() {
        *yj = x.iter().enumerate().fold(T::zero(), |acc, (i, &xi)| acc + a[(i, j)] * xi);
    }
}

/// Largest absolute entry, or zero for an empty matrix.
pub fn max_abs(a: MatRef<'_, f64>) -> f64 {
    let mut m = 0.0f64;
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            m = m.max(a[(i, j)].abs());
        }
    }
    m
}

/// Orthonormal basis (as rows) for the row space of `rows`, dropping
/// directions whose singular value falls below `rtol * σ_max`.
pub fn orthonormal_rows(rows: MatRef<'_, f64>, rtol: f64) -> Result<Mat<f64>, KError> {
    let (k, m) = (rows.nrows(), rows.ncols());
    if k == 0 || m == 0 {
        return Ok(Mat::zeros(0, m));
    }
    // Rows of `rows` are the columns of its transpose, whose left singular
    // vectors span the same space.
    let svd = rows.transpose().to_owned().svd().map_err(|_| KError::SolveError("SVD did not converge".into()))?;
    let sigma = svd.S().column_vector();
    let smax = sigma.iter().copied().fold(0.0f64, f64::max);
    if smax == 0.0 {
        return Ok(Mat::zeros(0, m));
    }
    let rank = sigma.iter().filter(|&&s| s > rtol * smax).count();
    let u = svd.U();
    Ok(Mat::from_fn(rank, m, |r, i| u[(i, r)]))
}

/// Numerical rank through the singular values.
pub fn numerical_rank(a: MatRef<'_, f64>, rtol: f64) -> Result<usize, KError> {
    if a.nrows() == 0 || a.ncols() == 0 {
        return Ok(0);
    }
    let svd = a.to_owned().svd().map_err(|_| KError::SolveError("SVD did not converge".into()))?;
    let sigma = svd.S().column_vector();
    let smax = sigma.iter().copied().fold(0.0f64, f64::max);
    Ok(sigma.iter().filter(|&&s| smax > 0.0 && s > rtol * smax).count())
}

/// Completes `q` (m×k, orthonormal columns) to an m×m orthogonal matrix whose
/// leading k columns are exactly `q`.
pub fn orthonormal_completion(q: MatRef<'_, f64>) -> Result<Mat<f64>, KError> {
    let (m, k) = (q.nrows(), q.ncols());
    let mut full = Mat::<f64>::zeros(m, m);
    for j in 0..k {
        full.col_mut(j).copy_from(q.col(j));
    }
    if k == m {
        return Ok(full);
    }
    let svd = q.to_owned().svd().map_err(|_| KError::SolveError("SVD did not converge".into()))?;
    let u = svd.U();
    for j in k..m {
        full.col_mut(j).copy_from(u.col(j));
    }
    Ok(full)
}

/// Rejects numerically singular square matrices before they are factored.
///
/// The check is a column-pivoted QR: a trailing diagonal entry of R below
/// `n·ε·|R₀₀|` is reported as a zero pivot at its position.
pub fn check_nonsingular(a: MatRef<'_, f64>, context: &'static str) -> Result<(), KError> {
    let n = a.nrows();
    if n == 0 {
        return Ok(());
    }
    let qr = a.to_owned().col_piv_qr();
    let r = qr.thin_R();
    let r00 = r.get(0, 0).abs();
    if r00 == 0.0 {
        return Err(KError::SingularFactorization { context, pivot: 0 });
    }
    let thresh = (n as f64) * f64::EPSILON * 1e2 * r00;
    let diag = r.diagonal().column_vector();
    match diag.iter().position(|v| v.abs() <= thresh) {
        Some(pivot) => Err(KError::SingularFactorization { context, pivot }),
        None => Ok(()),
    }
}
