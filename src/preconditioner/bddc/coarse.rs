//! Coarse (primal) problem: assembly from the local coarse matrices and its
//! solver, either a dense LU or a nested BDDC instance on aggregated coarse
//! subdomains.

use crate::config::BddcConfig;
use crate::error::KError;
use crate::matrix::is::{IsMatrix, LocalBlock};
use crate::matrix::sparse::CsrMatrix;
use crate::parallel::VecScatter;
use crate::preconditioner::{Bddc, Preconditioner};
use crate::solver::LuSolver;
use faer::Mat;
use std::collections::HashMap;
use tracing::{debug, info};

pub enum CoarseSolver {
    /// No primal unknowns
    Empty,
    Direct(LuSolver),
    Nested { pc: Box<Bddc>, mat: IsMatrix },
}

pub struct CoarseProblem {
    n_primal: usize,
    /// Local primal unknowns of every fine subdomain ↔ global primal numbering
    scatter: VecScatter,
    solver: CoarseSolver,
}

/// Local coarse contribution of one fine subdomain.
pub struct CoarseContribution<'a> {
    pub primal_l2g: &'a [usize],
    pub matrix: &'a Mat<f64>,
}

impl CoarseProblem {
    /// `nnsp` holds the primal values of the fine near-null space; it is
    /// attached to the nested operator.
    pub fn build(
        n_primal: usize,
        parts: &[CoarseContribution<'_>],
        cfg: &BddcConfig,
        nnsp: Option<Vec<Vec<f64>>>,
        symmetric: bool,
    ) -> Result<Self, KError> {
        let scatter = VecScatter::new("coarse_to_primal", n_primal, parts.iter().map(|p| p.primal_l2g.to_vec()).collect())?;
        let n_sub = parts.len();
        let ratio = cfg.opts.coarsening_ratio;
        let n_coarse_subs = n_sub.div_ceil(ratio).min((n_primal / cfg.opts.coarse_eqs_per_proc).max(1));
        let solver = if n_primal == 0 {
            CoarseSolver::Empty
        } else if cfg.allow_nested_coarse && n_coarse_subs > 1 {
            let mut mat = aggregate(n_primal, parts, n_coarse_subs)?;
            mat.set_symmetric(symmetric);
            if let Some(v) = nnsp.filter(|v| !v.is_empty()) {
                mat.set_near_null_space(v)?;
            }
            info!(
                level = cfg.level + 1,
                n_primal,
                coarse_subdomains = mat.n_subdomains(),
                "nested coarse problem"
            );
            let mut pc = Box::new(Bddc::with_level(cfg.coarse_options(), cfg.level + 1));
            pc.setup(&mat)?;
            CoarseSolver::Nested { pc, mat }
        } else {
            let mut dense = Mat::<f64>::zeros(n_primal, n_primal);
            for p in parts {
                for (i, &gi) in p.primal_l2g.iter().enumerate() {
                    for (j, &gj) in p.primal_l2g.iter().enumerate() {
                        dense[(gi, gj)] += p.matrix[(i, j)];
                    }
                }
            }
            debug!(level = cfg.level, n_primal, "direct coarse problem");
            CoarseSolver::Direct(LuSolver::factor(dense.as_ref(), "coarse problem")?)
        };
        Ok(Self { n_primal, scatter, solver })
    }

    pub fn n_primal(&self) -> usize {
        self.n_primal
    }

    pub fn scatter(&self) -> &VecScatter {
        &self.scatter
    }

    pub fn solver(&self) -> &CoarseSolver {
        &self.solver
    }

    /// Number of levels below this one, this one included.
    pub fn depth(&self) -> usize {
        match &self.solver {
            CoarseSolver::Nested { pc, .. } => 1 + pc.coarse().map_or(0, CoarseProblem::depth),
            _ => 1,
        }
    }

    /// out = S_c⁻¹ rhs (or S_c⁻ᵀ rhs)
    pub fn solve(&mut self, rhs: &[f64], out: &mut [f64], transpose: bool) -> Result<(), KError> {
        KError::check_dim("coarse right-hand side", self.n_primal, rhs.len())?;
        match &mut self.solver {
            CoarseSolver::Empty => Ok(()),
            CoarseSolver::Direct(lu) => {
                out.copy_from_slice(rhs);
                if transpose {
                    lu.solve_transpose_in_place(out)
                } else {
                    lu.solve_in_place(out)
                }
            }
            CoarseSolver::Nested { pc, .. } => {
                let r = rhs.to_vec();
                let mut z = vec![0.0; self.n_primal];
                if transpose {
                    pc.apply_transpose(&r, &mut z)?;
                } else {
                    pc.apply(&r, &mut z)?;
                }
                out.copy_from_slice(&z);
                Ok(())
            }
        }
    }
}

/// Fine subdomain `s` joins coarse subdomain `s·n_c/P`; coarse subdomains
/// without primal unknowns are dropped.
fn aggregate(n_primal: usize, parts: &[CoarseContribution<'_>], n_coarse_subs: usize) -> Result<IsMatrix, KError> {
    let n_sub = parts.len();
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); n_coarse_subs];
    for s in 0..n_sub {
        members[s * n_coarse_subs / n_sub].push(s);
    }
    let mut blocks = Vec::new();
    for subs in members {
        let mut l2g: Vec<usize> = subs.iter().flat_map(|&s| parts[s].primal_l2g.iter().copied()).collect();
        l2g.sort_unstable();
        l2g.dedup();
        if l2g.is_empty() {
            continue;
        }
        let pos: HashMap<usize, usize> = l2g.iter().enumerate().map(|(l, &g)| (g, l)).collect();
        let mut local = Mat::<f64>::zeros(l2g.len(), l2g.len());
        for &s in &subs {
            let p = &parts[s];
            for (i, gi) in p.primal_l2g.iter().enumerate() {
                for (j, gj) in p.primal_l2g.iter().enumerate() {
                    local[(pos[gi], pos[gj])] += p.matrix[(i, j)];
                }
            }
        }
        blocks.push(LocalBlock::new(l2g, CsrMatrix::from_dense(&local)));
    }
    IsMatrix::new(n_primal, blocks)
}
