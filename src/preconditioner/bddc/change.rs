//! Change of basis between the user's dofs and the basis the two-level
//! correction works in.
//!
//! The global transform is a product of stages `T = S₀ S₁ ⋯`, each either a
//! set of dense blocks acting on disjoint dof sets or a user supplied sparse
//! matrix. Every stage maps the dofs of a subdomain onto dofs of the same
//! subdomain, so restricting `T` to a subdomain gives its local transform.

use crate::error::KError;
use crate::matrix::sparse::CsrMatrix;
use faer::Mat;
use std::collections::HashMap;

/// `x[dofs] = q · x̂[dofs]`
#[derive(Clone, Debug)]
pub struct DenseBlock {
    pub dofs: Vec<usize>,
    pub q: Mat<f64>,
}

#[derive(Clone, Debug)]
pub enum ChangeStage {
    Blocks(Vec<DenseBlock>),
    Matrix(CsrMatrix<f64>),
}

impl ChangeStage {
    fn apply(&self, x: &mut [f64]) {
        match self {
            ChangeStage::Blocks(blocks) => {
                for b in blocks {
                    let xb: Vec<f64> = b.dofs.iter().map(|&g| x[g]).collect();
                    for (i, &g) in b.dofs.iter().enumerate() {
                        x[g] = (0..xb.len()).map(|j| b.q[(i, j)] * xb[j]).sum();
                    }
                }
            }
            ChangeStage::Matrix(m) => {
                let mut y = vec![0.0; x.len()];
                for (i, yi) in y.iter_mut().enumerate() {
                    let (cols, vals) = m.row(i);
                    *yi = cols.iter().zip(vals).map(|(&j, &v)| v * x[j]).sum();
                }
                x.copy_from_slice(&y);
            }
        }
    }

    fn apply_transpose(&self, x: &mut [f64]) {
        match self {
            ChangeStage::Blocks(blocks) => {
                for b in blocks {
                    let xb: Vec<f64> = b.dofs.iter().map(|&g| x[g]).collect();
                    for (j, &g) in b.dofs.iter().enumerate() {
                        x[g] = (0..xb.len()).map(|i| b.q[(i, j)] * xb[i]).sum();
                    }
                }
            }
            ChangeStage::Matrix(m) => {
                let mut y = vec![0.0; x.len()];
                for i in 0..m.nrows() {
                    let (cols, vals) = m.row(i);
                    for (&j, &v) in cols.iter().zip(vals) {
                        y[j] += v * x[i];
                    }
                }
                x.copy_from_slice(&y);
            }
        }
    }

    /// Restriction of the stage to the dofs listed in `l2g`.
    fn local(&self, l2g: &[usize], g2l: &HashMap<usize, usize>) -> Result<Mat<f64>, KError> {
        let n = l2g.len();
        let mut t = Mat::<f64>::identity(n, n);
        match self {
            ChangeStage::Blocks(blocks) => {
                for b in blocks {
                    let pos: Vec<Option<usize>> = b.dofs.iter().map(|g| g2l.get(g).copied()).collect();
                    let present = pos.iter().filter(|p| p.is_some()).count();
                    if present == 0 {
                        continue;
                    }
                    if present != pos.len() {
                        return Err(KError::config("change of basis block straddles a subdomain boundary"));
                    }
                    let pos: Vec<usize> = pos.into_iter().flatten().collect();
                    for (i, &li) in pos.iter().enumerate() {
                        for (j, &lj) in pos.iter().enumerate() {
                            t[(li, lj)] = b.q[(i, j)];
                        }
                    }
                }
            }
            ChangeStage::Matrix(m) => {
                for (li, &g) in l2g.iter().enumerate() {
                    t[(li, li)] = 0.0;
                    let (cols, vals) = m.row(g);
                    for (&j, &v) in cols.iter().zip(vals) {
                        match g2l.get(&j) {
                            Some(&lj) => t[(li, lj)] = v,
                            None => {
                                return Err(KError::config(format!(
                                    "change of basis couples dof {g} to dof {j} outside its subdomain"
                                )))
                            }
                        }
                    }
                }
            }
        }
        Ok(t)
    }
}

#[derive(Clone, Debug)]
pub struct ChangeOfBasis {
    n: usize,
    stages: Vec<ChangeStage>,
}

impl ChangeOfBasis {
    pub fn new(n: usize) -> Self {
        Self { n, stages: Vec::new() }
    }

    /// Appends a stage on the right: `T ← T · S`.
    pub fn push(&mut self, stage: ChangeStage) -> Result<(), KError> {
        match &stage {
            ChangeStage::Blocks(blocks) if blocks.is_empty() => return Ok(()),
            ChangeStage::Blocks(blocks) => {
                for b in blocks {
                    KError::check_dim("change block rows", b.dofs.len(), b.q.nrows())?;
                    KError::check_dim("change block columns", b.dofs.len(), b.q.ncols())?;
                    if let Some(&g) = b.dofs.iter().find(|&&g| g >= self.n) {
                        return Err(KError::DimensionMismatch { what: "change block dof", expected: self.n, found: g });
                    }
                }
            }
            ChangeStage::Matrix(m) => {
                KError::check_dim("change of basis rows", self.n, m.nrows())?;
                KError::check_dim("change of basis columns", self.n, m.ncols())?;
            }
        }
        self.stages.push(stage);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }

    /// x = T x̂
    pub fn apply(&self, x_hat: &[f64], x: &mut [f64]) {
        x.copy_from_slice(x_hat);
        for s in self.stages.iter().rev() {
            s.apply(x);
        }
    }

    /// x̂ = Tᵀ x
    pub fn apply_transpose(&self, x: &[f64], x_hat: &mut [f64]) {
        x_hat.copy_from_slice(x);
        for s in &self.stages {
            s.apply_transpose(x_hat);
        }
    }

    /// Local transform of the subdomain with map `l2g`.
    pub fn local_matrix(&self, l2g: &[usize]) -> Result<Mat<f64>, KError> {
        let g2l: HashMap<usize, usize> = l2g.iter().enumerate().map(|(l, &g)| (g, l)).collect();
        let n = l2g.len();
        let mut t = Mat::<f64>::identity(n, n);
        for s in &self.stages {
            let ts = s.local(l2g, &g2l)?;
            t = t.as_ref() * ts.as_ref();
        }
        Ok(t)
    }
}

/// Tᵀ A T for a dense local block.
pub fn transform_local(a: &Mat<f64>, t: &Mat<f64>) -> Mat<f64> {
    let at = a.as_ref() * t.as_ref();
    t.as_ref().transpose() * at.as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn rotation(theta: f64) -> Mat<f64> {
        let (s, c) = theta.sin_cos();
        Mat::from_fn(2, 2, |i, j| match (i, j) {
            (0, 0) | (1, 1) => c,
            (0, 1) => -s,
            _ => s,
        })
    }

    #[test]
    fn stages_compose_in_order() {
        let mut t = ChangeOfBasis::new(3);
        t.push(ChangeStage::Blocks(vec![DenseBlock { dofs: vec![0, 1], q: rotation(0.3) }])).unwrap();
        t.push(ChangeStage::Blocks(vec![DenseBlock { dofs: vec![1, 2], q: rotation(-0.7) }])).unwrap();
        let x_hat = [1.0, 2.0, 3.0];
        let mut x = [0.0; 3];
        t.apply(&x_hat, &mut x);
        // T is orthogonal, so Tᵀ undoes it
        let mut back = [0.0; 3];
        t.apply_transpose(&x, &mut back);
        for i in 0..3 {
            assert_abs_diff_eq!(back[i], x_hat[i], epsilon = 1e-14);
        }
        let tl = t.local_matrix(&[0, 1, 2]).unwrap();
        for i in 0..3 {
            let v: f64 = (0..3).map(|j| tl[(i, j)] * x_hat[j]).sum();
            assert_abs_diff_eq!(v, x[i], epsilon = 1e-14);
        }
    }

    #[test]
    fn straddling_block_is_rejected() {
        let mut t = ChangeOfBasis::new(3);
        t.push(ChangeStage::Blocks(vec![DenseBlock { dofs: vec![1, 2], q: rotation(0.1) }])).unwrap();
        assert!(t.local_matrix(&[0, 1]).is_err());
        assert!(t.local_matrix(&[0]).is_ok());
        let bad = CsrMatrix::<f64>::identity(2);
        assert!(matches!(t.push(ChangeStage::Matrix(bad)), Err(KError::DimensionMismatch { .. })));
    }
}
