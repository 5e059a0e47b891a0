//! Krylov solve driver (KSP).
//!
//! `KspContext` owns the operator and an optional preconditioner, selects a
//! Krylov method and runs one solve as
//!
//! 1. `pre_solve`: the preconditioner may rewrite the right-hand side and
//!    compute an initial guess,
//! 2. the iteration itself,
//! 3. `post_solve`: the right-hand side is restored and removed offsets are
//!    added back to the solution.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems. SIAM.

use crate::core::traits::{InnerProduct, MatVec};
use crate::error::KError;
use crate::preconditioner::{KrylovInfo, Preconditioner};
use crate::solver::{CgSolver, LinearSolver, PcgSolver};
use crate::utils::convergence::SolveStats;
use tracing::debug;

/// Available Krylov methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    /// Conjugate Gradient without preconditioning
    Cg,
    /// Preconditioned Conjugate Gradient
    Pcg,
}

pub struct KspContext<M, V, T> {
    pub kind: SolverKind,
    pub a: M,
    pub pc: Option<Box<dyn Preconditioner<M, V>>>,
    pub tol: T,
    pub max_it: usize,
    /// `x` holds an initial guess when `solve` is called
    pub initial_guess_nonzero: bool,
}

impl<M, V, T> KspContext<M, V, T>
where
    M: MatVec<V>,
    (): InnerProduct<V, Scalar = T>,
    V: AsMut<[T]> + AsRef<[T]> + From<Vec<T>> + Clone,
    T: num_traits::Float + From<f64>,
{
    pub fn new(kind: SolverKind, a: M, tol: T, max_it: usize) -> Self {
        Self { kind, a, pc: None, tol, max_it, initial_guess_nonzero: false }
    }

    pub fn with_preconditioner(mut self, pc: Box<dyn Preconditioner<M, V>>) -> Self {
        self.pc = Some(pc);
        self
    }

    /// Sets the preconditioner up on the current operator.
    pub fn setup(&mut self) -> Result<(), KError> {
        match self.pc.as_mut() {
            Some(pc) => pc.setup(&self.a),
            None => Ok(()),
        }
    }

    /// Solves `A x = b`. `b` is left as it was handed in.
    pub fn solve(&mut self, b: &V, x: &mut V) -> Result<SolveStats<T>, KError> {
        let mut info = KrylovInfo { is_cg: true, initial_guess_nonzero: self.initial_guess_nonzero };
        let mut rhs = b.clone();
        if let Some(pc) = self.pc.as_mut() {
            pc.pre_solve(&self.a, &mut rhs, x, &mut info)?;
        }
        if !info.initial_guess_nonzero {
            x.as_mut().iter_mut().for_each(|v| *v = T::zero());
        }
        let stats = match self.kind {
            SolverKind::Cg => CgSolver::new(self.tol, self.max_it).solve(&self.a, None, &rhs, x)?,
            SolverKind::Pcg => {
                let pc = self.pc.as_mut().map(|p| p.as_mut() as &mut dyn Preconditioner<M, V>);
                PcgSolver::new(self.tol, self.max_it).solve(&self.a, pc, &rhs, x)?
            }
        };
        if let Some(pc) = self.pc.as_mut() {
            pc.post_solve(&self.a, &mut rhs, x, &mut info)?;
        }
        debug!(iterations = stats.iterations, converged = stats.converged, "krylov solve");
        Ok(stats)
    }
}
