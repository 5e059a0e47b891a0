//! Direct dense solver using Faer: LU with partial (row) pivoting.
//!
//! `LuSolver` is the factor-once, solve-many handle behind every local
//! Dirichlet and Neumann problem and the direct coarse solve. A factorization
//! is refused when the matrix is numerically singular, so a cached handle is
//! always usable for both `A x = b` and `Aᵀ x = b`.
//!
//! # References
//! - Faer documentation: https://github.com/sarah-ek/faer-rs
//! - Golub & Van Loan, Matrix Computations

use crate::error::KError;
use crate::matrix::dense::check_nonsingular;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::SolveStats;
use faer::linalg::solvers::{PartialPivLu, SolveCore};
use faer::{Conj, Mat, MatMut, MatRef};

/// LU solver using partial pivoting from Faer.
///
/// Stores the LU factorization for reuse.
pub struct LuSolver {
    n: usize,
    /// Cached LU factorization (if computed)
    factor: Option<PartialPivLu<f64>>,
}

impl LuSolver {
    /// Create a new LU solver (no factorization yet).
    pub fn new() -> Self {
        LuSolver { n: 0, factor: None }
    }

    /// Factor `a`, naming `context` in the error if it is singular.
    pub fn factor(a: MatRef<'_, f64>, context: &'static str) -> Result<Self, KError> {
        KError::check_dim("LU operand columns", a.nrows(), a.ncols())?;
        if a.nrows() == 0 {
            return Ok(LuSolver { n: 0, factor: None });
        }
        check_nonsingular(a, context)?;
        Ok(LuSolver { n: a.nrows(), factor: Some(PartialPivLu::new(a)) })
    }

    fn cached(&self) -> Result<&PartialPivLu<f64>, KError> {
        self.factor.as_ref().ok_or(KError::NotSetUp)
    }

    /// Solve in place using the cached LU factorization.
    pub fn solve_in_place(&self, x: &mut [f64]) -> Result<(), KError> {
        KError::check_dim("LU right-hand side", self.n, x.len())?;
        if self.n == 0 {
            return Ok(());
        }
        let n = x.len();
        self.cached()?.solve_in_place_with_conj(Conj::No, MatMut::from_column_major_slice_mut(x, n, 1));
        Ok(())
    }

    /// Aᵀ x = b in place.
    pub fn solve_transpose_in_place(&self, x: &mut [f64]) -> Result<(), KError> {
        KError::check_dim("LU right-hand side", self.n, x.len())?;
        if self.n == 0 {
            return Ok(());
        }
        let n = x.len();
        self.cached()?
            .solve_transpose_in_place_with_conj(Conj::No, MatMut::from_column_major_slice_mut(x, n, 1));
        Ok(())
    }

    /// Solve for every column of `rhs` in place.
    pub fn solve_mat_in_place(&self, rhs: &mut Mat<f64>, transpose: bool) -> Result<(), KError> {
        KError::check_dim("LU right-hand side", self.n, rhs.nrows())?;
        if self.n == 0 || rhs.ncols() == 0 {
            return Ok(());
        }
        let f = self.cached()?;
        if transpose {
            f.solve_transpose_in_place_with_conj(Conj::No, rhs.as_mut());
        } else {
            f.solve_in_place_with_conj(Conj::No, rhs.as_mut());
        }
        Ok(())
    }

    /// Dense inverse.
    pub fn inverse(&self) -> Result<Mat<f64>, KError> {
        let mut inv = Mat::<f64>::identity(self.n, self.n);
        self.solve_mat_in_place(&mut inv, false)?;
        Ok(inv)
    }
}

impl Default for LuSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearSolver<Mat<f64>, Vec<f64>> for LuSolver {
    type Error = KError;
    type Scalar = f64;

    /// Solve Ax = b, refactoring `a`. The preconditioner is ignored.
    fn solve(
        &mut self,
        a: &Mat<f64>,
        _pc: Option<&mut dyn Preconditioner<Mat<f64>, Vec<f64>>>,
        b: &Vec<f64>,
        x: &mut Vec<f64>,
    ) -> Result<SolveStats<f64>, KError> {
        *self = LuSolver::factor(a.as_ref(), "dense system")?;
        x.clone_from(b);
        self.solve_in_place(x)?;
        // For direct solvers, always converged in 1 iteration
        Ok(SolveStats { iterations: 1, final_residual: 0.0, converged: true })
    }
}
