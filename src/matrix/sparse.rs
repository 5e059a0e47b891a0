// SparseMatrix trait and the CSR storage used for local subdomain blocks.

use crate::core::traits::{Diagonal, MatShape, MatTransVec, MatVec, SubmatrixExtract};
use crate::error::KError;
use faer::Mat;
use num_traits::Float;

/// A read‐only sparse matrix supporting y = A * x.
pub trait SparseMatrix<T>: MatShape {
    /// Compute y = A * x.  `x.len() == ncols()`, `y.len() == nrows()`.
    fn spmv(&self, x: &[T], y: &mut [T]);
    /// Compute y = Aᵀ * x.  `x.len() == nrows()`, `y.len() == ncols()`.
    fn spmv_transpose(&self, x: &[T], y: &mut [T]);
}

/// Compressed sparse row matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct CsrMatrix<T> {
    nrows: usize,
    ncols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<T>,
}

impl<T: Float> CsrMatrix<T> {
    /// Build a CSR from raw row‐ptr, col‐idx, and values.
    ///
    /// Column indices inside a row need not be sorted; duplicates are kept
    /// and summed by every product.
    pub fn from_csr(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<T>,
    ) -> Result<Self, KError> {
        KError::check_dim("CSR row pointer", nrows + 1, row_ptr.len())?;
        KError::check_dim("CSR values", col_idx.len(), values.len())?;
        if row_ptr[0] != 0 || row_ptr[nrows] != col_idx.len() {
            return Err(KError::config("CSR row pointer must start at 0 and end at nnz"));
        }
        if row_ptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(KError::config("CSR row pointer must be non-decreasing"));
        }
        if let Some(&c) = col_idx.iter().find(|&&c| c >= ncols) {
            return Err(KError::DimensionMismatch { what: "CSR column index", expected: ncols, found: c });
        }
        Ok(Self { nrows, ncols, row_ptr, col_idx, values })
    }

    /// Build from (row, col, value) triplets; duplicates are summed.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, T)]) -> Result<Self, KError> {
        let mut rows: Vec<Vec<(usize, T)>> = vec![Vec::new(); nrows];
        for &(i, j, v) in triplets {
            if i >= nrows || j >= ncols {
                return Err(KError::DimensionMismatch {
                    what: "triplet index",
                    expected: nrows.max(ncols),
                    found: i.max(j),
                });
            }
            rows[i].push((j, v));
        }
        let mut row_ptr = Vec::with_capacity(nrows + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for mut row in rows {
            row.sort_by_key(|&(j, _)| j);
            let mut k = 0;
            while k < row.len() {
                let j = row[k].0;
                let mut v = T::zero();
                while k < row.len() && row[k].0 == j {
                    v = v + row[k].1;
                    k += 1;
                }
                col_idx.push(j);
                values.push(v);
            }
            row_ptr.push(col_idx.len());
        }
        Ok(Self { nrows, ncols, row_ptr, col_idx, values })
    }

    /// Drop-zero conversion from a dense faer matrix.
    pub fn from_dense(a: &Mat<T>) -> Self {
        let (m, n) = (a.nrows(), a.ncols());
        let mut row_ptr = vec![0; m + 1];
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        for i in 0..m {
            for j in 0..n {
                let v = a[(i, j)];
                if v != T::zero() {
                    col_idx.push(j);
                    values.push(v);
                }
            }
            row_ptr[i + 1] = col_idx.len();
        }
        Self { nrows: m, ncols: n, row_ptr, col_idx, values }
    }

    pub fn identity(n: usize) -> Self {
        Self {
            nrows: n,
            ncols: n,
            row_ptr: (0..=n).collect(),
            col_idx: (0..n).collect(),
            values: vec![T::one(); n],
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[T]) {
        let (s, e) = (self.row_ptr[i], self.row_ptr[i + 1]);
        (&self.col_idx[s..e], &self.values[s..e])
    }

    /// Dense copy, used for small local blocks.
    pub fn to_dense(&self) -> Mat<T> {
        let mut dense = Mat::from_fn(self.nrows, self.ncols, |_, _| T::zero());
        for i in 0..self.nrows {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                dense[(i, j)] = dense[(i, j)] + v;
            }
        }
        dense
    }

    /// Symmetrised nonzero pattern without the diagonal, as adjacency lists.
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        let n = self.nrows.max(self.ncols);
        let mut adj = vec![Vec::new(); n];
        for i in 0..self.nrows {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                if i != j && v != T::zero() {
                    adj[i].push(j);
                    adj[j].push(i);
                }
            }
        }
        for nbrs in adj.iter_mut() {
            nbrs.sort_unstable();
            nbrs.dedup();
        }
        adj
    }

    /// Numerical symmetry check on the stored entries.
    pub fn is_symmetric(&self, tol: T) -> bool {
        if self.nrows != self.ncols {
            return false;
        }
        let dense = self.to_dense();
        let scale = self.values.iter().fold(T::zero(), |m, v| m.max(v.abs())).max(T::one());
        (0..self.nrows).all(|i| (0..i).all(|j| (dense[(i, j)] - dense[(j, i)]).abs() <= tol * scale))
    }
}

impl<T: Float> SparseMatrix<T> for CsrMatrix<T> {
    fn spmv(&self, x: &[T], y: &mut [T]) {
        assert_eq!(x.len(), self.ncols);
        assert_eq!(y.len(), self.nrows);
        for (i, yi) in y.iter_mut().enumerate() {
            let (cols, vals) = self.row(i);
            *yi = cols.iter().zip(vals).fold(T::zero(), |acc, (&j, &v)| acc + v * x[j]);
        }
    }
    fn spmv_transpose(&self, x: &[T], y: &mut [T]) {
        assert_eq!(x.len(), self.nrows);
        assert_eq!(y.len(), self.ncols);
        y.iter_mut().for_each(|yi| *yi = T::zero());
        for (i, &xi) in x.iter().enumerate() {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                y[j] = y[j] + v * xi;
            }
        }
    }
}

impl<T: Float> MatShape for CsrMatrix<T> {
    fn nrows(&self) -> usize {
        self.nrows
    }
    fn ncols(&self) -> usize {
        self.ncols
    }
}

impl<T: Float> MatVec<Vec<T>> for CsrMatrix<T> {
    fn matvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        self.spmv(x, y);
    }
}

impl<T: Float> MatTransVec<Vec<T>> for CsrMatrix<T> {
    fn mattransvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        self.spmv_transpose(x, y);
    }
}

impl<T: Float> Diagonal<T> for CsrMatrix<T> {
    fn assembled_diagonal(&self) -> Vec<T> {
        let mut d = vec![T::zero(); self.nrows.min(self.ncols)];
        for (i, di) in d.iter_mut().enumerate() {
            let (cols, vals) = self.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                if j == i {
                    *di = *di + v;
                }
            }
        }
        d
    }
}

impl<T: Float> SubmatrixExtract for CsrMatrix<T> {
    type Output = Mat<T>;

    /// Dense A[rows, cols]; the local blocks this is used on are small.
    fn extract_submatrix(&self, rows: &[usize], cols: &[usize]) -> Mat<T> {
        let mut col_pos = vec![usize::MAX; self.ncols];
        for (jj, &j) in cols.iter().enumerate() {
            col_pos[j] = jj;
        }
        let mut sub = Mat::from_fn(rows.len(), cols.len(), |_, _| T::zero());
        for (ii, &i) in rows.iter().enumerate() {
            let (c, v) = self.row(i);
            for (&j, &val) in c.iter().zip(v) {
                let jj = col_pos[j];
                if jj != usize::MAX {
                    sub[(ii, jj)] = sub[(ii, jj)] + val;
                }
            }
        }
        sub
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_spmv() {
        // 3×3 identity in CSR: row_ptr=[0,1,2,3], col_idx=[0,1,2], vals=[1,1,1]
        let m = CsrMatrix::from_csr(3, 3, vec![0, 1, 2, 3], vec![0, 1, 2], vec![1.0, 1.0, 1.0]).unwrap();
        let x = vec![2.0, 3.0, 5.0];
        let mut y = vec![0.0; 3];
        m.spmv(&x, &mut y);
        assert_eq!(y, x);
    }

    #[test]
    fn simple_pattern() {
        // 2×3 matrix [[1,2,0],[0,3,4]]
        let m = CsrMatrix::from_csr(2, 3, vec![0, 2, 4], vec![0, 1, 1, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let x = vec![1.0, 1.0, 1.0];
        let mut y = vec![0.0; 2];
        m.spmv(&x, &mut y);
        assert_eq!(y, vec![3.0, 7.0]);
        let mut yt = vec![0.0; 3];
        m.spmv_transpose(&[1.0, 1.0], &mut yt);
        assert_eq!(yt, vec![1.0, 5.0, 4.0]);
    }

    #[test]
    fn triplets_sum_duplicates_and_extract() {
        let m = CsrMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 0, 2.0), (1, 0, -1.0), (1, 1, 4.0)]).unwrap();
        assert_eq!(m.nnz(), 3);
        assert_eq!(m.assembled_diagonal(), vec![3.0, 4.0]);
        let sub = m.extract_submatrix(&[1], &[0, 1]);
        assert_eq!((sub[(0, 0)], sub[(0, 1)]), (-1.0, 4.0));
        assert_eq!(m.adjacency(), vec![vec![1], vec![0]]);
        assert!(!m.is_symmetric(1e-12));
    }

    #[test]
    fn malformed_csr_is_rejected() {
        let err = CsrMatrix::<f64>::from_csr(2, 2, vec![0, 1], vec![0], vec![1.0]).unwrap_err();
        assert!(matches!(err, KError::DimensionMismatch { .. }));
        let err = CsrMatrix::<f64>::from_csr(1, 2, vec![0, 1], vec![5], vec![1.0]).unwrap_err();
        assert!(matches!(err, KError::DimensionMismatch { .. }));
    }
}
