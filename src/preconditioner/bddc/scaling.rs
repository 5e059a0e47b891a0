//! Partition of unity on the interface.
//!
//! `restrict` maps an assembled interface vector to this subdomain's share
//! (`Dᵀ x`) and `extend` maps a local correction back (`D w`); summing the
//! extensions of all sharing subdomains reproduces a consistent vector.

use crate::error::KError;
use crate::solver::LuSolver;
use faer::Mat;

#[derive(Clone, Debug)]
pub struct DeluxeBlock {
    /// Positions in the local interface vector
    pub positions: Vec<usize>,
    /// (Σ_k S_k)⁻¹ S_s
    pub d: Mat<f64>,
}

#[derive(Clone, Debug)]
pub enum LocalScaling {
    Simple { weights: Vec<f64> },
    /// Weights apply outside the blocks
    Deluxe { weights: Vec<f64>, blocks: Vec<DeluxeBlock> },
}

impl LocalScaling {
    /// Multiplicity weights for the interface dofs of one subdomain.
    pub fn simple(multiplicity: &[usize]) -> Self {
        LocalScaling::Simple { weights: multiplicity.iter().map(|&m| 1.0 / m as f64).collect() }
    }

    /// Deluxe blocks from the local minors and their sums.
    pub fn deluxe(multiplicity: &[usize], minors: &[(Vec<usize>, &Mat<f64>, &Mat<f64>)]) -> Result<Self, KError> {
        let weights = multiplicity.iter().map(|&m| 1.0 / m as f64).collect();
        let mut blocks = Vec::with_capacity(minors.len());
        for (positions, s_local, s_sum) in minors {
            let lu = LuSolver::factor(s_sum.as_ref(), "sum of Schur minors")?;
            let mut d = (*s_local).clone();
            lu.solve_mat_in_place(&mut d, false)?;
            blocks.push(DeluxeBlock { positions: positions.clone(), d });
        }
        Ok(LocalScaling::Deluxe { weights, blocks })
    }

    pub fn is_deluxe(&self) -> bool {
        matches!(self, LocalScaling::Deluxe { .. })
    }

    pub fn weights(&self) -> &[f64] {
        match self {
            LocalScaling::Simple { weights } | LocalScaling::Deluxe { weights, .. } => weights,
        }
    }

    /// w = Dᵀ x
    pub fn restrict(&self, x: &[f64], w: &mut [f64]) {
        for ((wi, &xi), &di) in w.iter_mut().zip(x).zip(self.weights()) {
            *wi = di * xi;
        }
        if let LocalScaling::Deluxe { blocks, .. } = self {
            for b in blocks {
                for (j, &pj) in b.positions.iter().enumerate() {
                    w[pj] = b.positions.iter().enumerate().map(|(i, &pi)| b.d[(i, j)] * x[pi]).sum();
                }
            }
        }
    }

    /// y = D w
    pub fn extend(&self, w: &[f64], y: &mut [f64]) {
        for ((yi, &wi), &di) in y.iter_mut().zip(w).zip(self.weights()) {
            *yi = di * wi;
        }
        if let LocalScaling::Deluxe { blocks, .. } = self {
            for b in blocks {
                for (i, &pi) in b.positions.iter().enumerate() {
                    y[pi] = b.positions.iter().enumerate().map(|(j, &pj)| b.d[(i, j)] * w[pj]).sum();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn deluxe_weights_sum_to_identity() {
        let s1 = Mat::from_fn(2, 2, |i, j| if i == j { 2.0 } else { -0.5 });
        let s2 = Mat::from_fn(2, 2, |i, j| if i == j { 1.0 } else { 0.25 });
        let sum = Mat::from_fn(2, 2, |i, j| s1[(i, j)] + s2[(i, j)]);
        let d1 = LocalScaling::deluxe(&[2, 2, 3], &[(vec![0, 1], &s1, &sum)]).unwrap();
        let d2 = LocalScaling::deluxe(&[2, 2], &[(vec![0, 1], &s2, &sum)]).unwrap();
        let w = [1.0, -2.0, 3.0];
        let (mut y1, mut y2) = ([0.0; 3], [0.0; 2]);
        d1.extend(&w, &mut y1);
        d2.extend(&w[..2], &mut y2);
        assert_abs_diff_eq!(y1[0] + y2[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y1[1] + y2[1], -2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y1[2], 1.0, epsilon = 1e-12);
        assert!(d1.is_deluxe());
    }

    #[test]
    fn simple_restriction_is_transpose_of_extension() {
        let s = LocalScaling::simple(&[2, 4]);
        let mut w = [0.0; 2];
        s.restrict(&[2.0, 4.0], &mut w);
        assert_eq!(w, [1.0, 1.0]);
        let mut y = [0.0; 2];
        s.extend(&w, &mut y);
        assert_eq!(y, [0.5, 0.25]);
    }
}
