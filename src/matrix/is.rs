//! Subassembled (unassembled across subdomains) operator.
//!
//! Every subdomain owns a local CSR block and a local-to-global map; the
//! global operator is the sum of the local contributions scattered through
//! the maps. Change detection for the pattern, the values and an attached
//! near-null space goes through monotonically increasing state tokens.

use crate::core::traits::{Diagonal, MatShape, MatTransVec, MatVec};
use crate::error::KError;
use crate::matrix::sparse::{CsrMatrix, SparseMatrix};
use faer::Mat;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STATE: AtomicU64 = AtomicU64::new(1);

/// Change-detection token. Two tokens compare equal only if no mutation
/// happened in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectState(u64);

impl ObjectState {
    pub fn fresh() -> Self {
        ObjectState(NEXT_STATE.fetch_add(1, Ordering::Relaxed))
    }
}

/// Global vectors spanning the near-kernel of the operator (rigid body
/// modes, constants per field, ...).
#[derive(Clone, Debug)]
pub struct NearNullSpace {
    vectors: Vec<Vec<f64>>,
    state: ObjectState,
}

impl NearNullSpace {
    pub fn vectors(&self) -> &[Vec<f64>] {
        &self.vectors
    }

    pub fn state(&self) -> ObjectState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// One subdomain: its local block and where its rows live globally.
#[derive(Clone, Debug)]
pub struct LocalBlock {
    pub l2g: Vec<usize>,
    pub mat: CsrMatrix<f64>,
}

impl LocalBlock {
    pub fn new(l2g: Vec<usize>, mat: CsrMatrix<f64>) -> Self {
        Self { l2g, mat }
    }
}

#[derive(Clone, Debug)]
pub struct IsMatrix {
    n_global: usize,
    subdomains: Vec<LocalBlock>,
    near_null_space: Option<NearNullSpace>,
    symmetric: Option<bool>,
    pattern_state: ObjectState,
    value_state: ObjectState,
}

impl IsMatrix {
    /// Checks that every local block is square, matches its map, maps inside
    /// `0..n_global` without repeated indices, and that the maps cover every
    /// global row.
    pub fn new(n_global: usize, subdomains: Vec<LocalBlock>) -> Result<Self, KError> {
        let mut covered = vec![false; n_global];
        for sd in &subdomains {
            KError::check_dim("local block rows", sd.l2g.len(), sd.mat.nrows())?;
            KError::check_dim("local block columns", sd.l2g.len(), sd.mat.ncols())?;
            let mut seen = sd.l2g.clone();
            seen.sort_unstable();
            if seen.windows(2).any(|w| w[0] == w[1]) {
                return Err(KError::config("local-to-global map repeats a global index"));
            }
            for &g in &sd.l2g {
                if g >= n_global {
                    return Err(KError::DimensionMismatch { what: "local-to-global index", expected: n_global, found: g });
                }
                covered[g] = true;
            }
        }
        if let Some(g) = covered.iter().position(|c| !c) {
            return Err(KError::config(format!("global dof {g} is not owned by any subdomain")));
        }
        Ok(Self {
            n_global,
            subdomains,
            near_null_space: None,
            symmetric: None,
            pattern_state: ObjectState::fresh(),
            value_state: ObjectState::fresh(),
        })
    }

    pub fn n_global(&self) -> usize {
        self.n_global
    }

    pub fn n_subdomains(&self) -> usize {
        self.subdomains.len()
    }

    pub fn subdomains(&self) -> &[LocalBlock] {
        &self.subdomains
    }

    pub fn local_to_global(&self, sub: usize) -> &[usize] {
        &self.subdomains[sub].l2g
    }

    pub fn local_matrix(&self, sub: usize) -> &CsrMatrix<f64> {
        &self.subdomains[sub].mat
    }

    /// Replaces the values of one local block. Keeping the sparsity pattern
    /// only refreshes the value token; a new pattern refreshes both.
    pub fn update_local_matrix(&mut self, sub: usize, mat: CsrMatrix<f64>) -> Result<(), KError> {
        let old = self
            .subdomains
            .get(sub)
            .ok_or_else(|| KError::config(format!("no subdomain {sub}")))?;
        KError::check_dim("local block rows", old.l2g.len(), mat.nrows())?;
        KError::check_dim("local block columns", old.l2g.len(), mat.ncols())?;
        let same_pattern = old.mat.nnz() == mat.nnz() && (0..mat.nrows()).all(|i| old.mat.row(i).0 == mat.row(i).0);
        self.subdomains[sub].mat = mat;
        if !same_pattern {
            self.pattern_state = ObjectState::fresh();
        }
        self.value_state = ObjectState::fresh();
        Ok(())
    }

    pub fn pattern_state(&self) -> ObjectState {
        self.pattern_state
    }

    pub fn value_state(&self) -> ObjectState {
        self.value_state
    }

    /// Attaches a near-null space; every call yields a fresh state token,
    /// even for identical vectors.
    pub fn set_near_null_space(&mut self, vectors: Vec<Vec<f64>>) -> Result<(), KError> {
        for v in &vectors {
            KError::check_dim("near-null-space vector", self.n_global, v.len())?;
        }
        self.near_null_space = Some(NearNullSpace { vectors, state: ObjectState::fresh() });
        Ok(())
    }

    pub fn clear_near_null_space(&mut self) {
        self.near_null_space = None;
    }

    pub fn near_null_space(&self) -> Option<&NearNullSpace> {
        self.near_null_space.as_ref()
    }

    pub fn set_symmetric(&mut self, flag: bool) {
        self.symmetric = Some(flag);
    }

    /// Symmetry as declared, otherwise detected on the local blocks.
    pub fn is_symmetric(&self) -> bool {
        match self.symmetric {
            Some(flag) => flag,
            None => self.subdomains.iter().all(|sd| sd.mat.is_symmetric(1e-12)),
        }
    }

    /// Number of subdomains touching each global dof.
    pub fn multiplicity(&self) -> Vec<usize> {
        let mut mult = vec![0usize; self.n_global];
        for sd in &self.subdomains {
            for &g in &sd.l2g {
                mult[g] += 1;
            }
        }
        mult
    }

    /// Dense assembled operator (tests and small coarse problems only).
    pub fn to_dense(&self) -> Mat<f64> {
        let mut a = Mat::<f64>::zeros(self.n_global, self.n_global);
        for sd in &self.subdomains {
            for i in 0..sd.mat.nrows() {
                let (cols, vals) = sd.mat.row(i);
                for (&j, &v) in cols.iter().zip(vals) {
                    a[(sd.l2g[i], sd.l2g[j])] += v;
                }
            }
        }
        a
    }

    fn apply_local(&self, x: &[f64], y: &mut [f64], transpose: bool) {
        let local = |sd: &LocalBlock| {
            let xl: Vec<f64> = sd.l2g.iter().map(|&g| x[g]).collect();
            let mut yl = vec![0.0; xl.len()];
            if transpose {
                sd.mat.spmv_transpose(&xl, &mut yl);
            } else {
                sd.mat.spmv(&xl, &mut yl);
            }
            yl
        };
        #[cfg(feature = "rayon")]
        let contributions: Vec<Vec<f64>> = {
            use rayon::prelude::*;
            self.subdomains.par_iter().map(local).collect()
        };
        #[cfg(not(feature = "rayon"))]
        let contributions: Vec<Vec<f64>> = self.subdomains.iter().map(local).collect();
        y.iter_mut().for_each(|v| *v = 0.0);
        for (sd, yl) in self.subdomains.iter().zip(contributions) {
            for (&g, v) in sd.l2g.iter().zip(yl) {
                y[g] += v;
            }
        }
    }
}

impl MatShape for IsMatrix {
    fn nrows(&self) -> usize {
        self.n_global
    }
    fn ncols(&self) -> usize {
        self.n_global
    }
}

impl MatVec<Vec<f64>> for IsMatrix {
    fn matvec(&self, x: &Vec<f64>, y: &mut Vec<f64>) {
        assert_eq!(x.len(), self.n_global);
        assert_eq!(y.len(), self.n_global);
        self.apply_local(x, y, false);
    }
}

impl MatTransVec<Vec<f64>> for IsMatrix {
    fn mattransvec(&self, x: &Vec<f64>, y: &mut Vec<f64>) {
        assert_eq!(x.len(), self.n_global);
        assert_eq!(y.len(), self.n_global);
        self.apply_local(x, y, true);
    }
}

impl Diagonal<f64> for IsMatrix {
    fn assembled_diagonal(&self) -> Vec<f64> {
        let mut d = vec![0.0; self.n_global];
        for sd in &self.subdomains {
            for (l, dl) in sd.mat.assembled_diagonal().into_iter().enumerate() {
                d[sd.l2g[l]] += dl;
            }
        }
        d
    }
}
