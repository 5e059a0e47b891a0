//! Conjugate Gradient (unpreconditioned) per Saad §6.7.
//!
//! Any preconditioner handed in is ignored; use `PcgSolver` for that.

use crate::core::traits::{InnerProduct, MatVec};
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::solver::LinearSolver;
use crate::utils::convergence::{Convergence, SolveStats};
use tracing::trace;

pub struct CgSolver<T> {
    pub conv: Convergence<T>,
}

impl<T: Copy + num_traits::Float> CgSolver<T> {
    pub fn new(tol: T, max_iters: usize) -> Self {
        Self { conv: Convergence { tol, max_iters } }
    }
}

/// y += alpha * x
fn axpy<T: num_traits::Float>(alpha: T, x: &[T], y: &mut [T]) {
    y.iter_mut().zip(x).for_each(|(yi, &xi)| *yi = *yi + alpha * xi);
}

impl<M, V, T> LinearSolver<M, V> for CgSolver<T>
where
    M: MatVec<V>,
    (): InnerProduct<V, Scalar = T>,
    V: AsMut<[T]> + AsRef<[T]> + From<Vec<T>> + Clone,
    T: num_traits::Float + From<f64>,
{
    type Error = KError;
    type Scalar = T;

    fn solve(
        &mut self,
        a: &M,
        _pc: Option<&mut dyn Preconditioner<M, V>>,
        b: &V,
        x: &mut V,
    ) -> Result<SolveStats<T>, KError> {
        let n = b.as_ref().len();
        KError::check_dim("CG initial guess", n, x.as_ref().len())?;
        let ip = ();
        let mut ap = V::from(vec![T::zero(); n]);
        a.matvec(x, &mut ap);
        let mut r = b.clone();
        axpy(-T::one(), ap.as_ref(), r.as_mut());
        let mut p = r.clone();
        let mut rr = ip.dot(&r, &r);
        let res0 = rr.sqrt();
        let mut stats = SolveStats { iterations: 0, final_residual: res0, converged: res0 == T::zero() };
        if stats.converged {
            return Ok(stats);
        }

        for i in 1..=self.conv.max_iters {
            a.matvec(&p, &mut ap);
            let pap = ip.dot(&p, &ap);
            if pap <= T::zero() {
                return Err(KError::IndefiniteMatrix);
            }
            let alpha = rr / pap;
            axpy(alpha, p.as_ref(), x.as_mut());
            axpy(-alpha, ap.as_ref(), r.as_mut());
            let rr_new = ip.dot(&r, &r);
            let (stop, s) = self.conv.check(rr_new.sqrt(), res0, i);
            stats = s;
            if stop {
                break;
            }
            let beta = rr_new / rr;
            for (pj, &rj) in p.as_mut().iter_mut().zip(r.as_ref()) {
                *pj = rj + beta * *pj;
            }
            rr = rr_new;
        }
        trace!(iterations = stats.iterations, converged = stats.converged, "cg");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;

    #[test]
    fn cg_solves_small_spd() {
        // [[4,1],[1,3]] x = [1,2]
        let a = Mat::from_fn(2, 2, |i, j| [[4.0, 1.0], [1.0, 3.0]][i][j]);
        let b = vec![1.0, 2.0];
        let mut x = vec![0.0, 0.0];
        let stats = CgSolver::new(1e-10, 20).solve(&a, None, &b, &mut x).unwrap();
        assert!(stats.converged);
        assert!(stats.iterations <= 2);
        for (xi, ei) in x.iter().zip([1.0f64 / 11.0, 7.0 / 11.0]) {
            assert!((xi - ei).abs() < 1e-8, "xi = {xi}, expected = {ei}");
        }
    }

    #[test]
    fn cg_starts_from_the_given_guess() {
        let a = Mat::from_fn(3, 3, |i, j| [[4.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 2.0]][i][j]);
        let x_true = vec![1.0, 2.0, 3.0];
        let mut b = vec![0.0; 3];
        a.matvec(&x_true, &mut b);
        // the exact solution as initial guess needs no iteration
        let mut x = x_true.clone();
        let stats = CgSolver::new(1e-10, 100).solve(&a, None, &b, &mut x).unwrap();
        assert_eq!(stats.iterations, 0);
        assert!(stats.converged);
    }

    #[test]
    fn indefinite_operator_is_reported() {
        let a = Mat::from_fn(2, 2, |i, j| if i == j { -1.0 } else { 0.0 });
        let mut x = vec![0.0; 2];
        let err = CgSolver::new(1e-10, 10).solve(&a, None, &vec![1.0, 1.0], &mut x).unwrap_err();
        assert_eq!(err, KError::IndefiniteMatrix);
    }
}
