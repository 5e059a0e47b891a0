//! Application of the two-level operator and the Krylov bracket around it.
//!
//! One application, in the basis of the change of basis `T`:
//!
//! 1. `r̂ = Tᵀ r`, benign pressures read from `r̂`
//! 2. first interior solve, its coupling added to the interface residual,
//!    restriction by the partition of unity
//! 3. local constrained Neumann solves plus one coarse solve
//! 4. extension back to a consistent interface vector
//! 5. second interior solve, benign pressures written, `z = T ẑ`

use super::{Bddc, SetupStage};
use crate::core::traits::{Diagonal, MatVec};
use crate::error::KError;
use crate::matrix::is::IsMatrix;
use crate::parallel::{map_subdomains, InsertMode, VecScatter};
use crate::preconditioner::bddc::local::LocalProblem;
use crate::preconditioner::KrylovInfo;
use tracing::debug;

/// Per-subdomain vectors of the last application.
#[derive(Clone, Debug, Default)]
pub(crate) struct ApplyWork {
    pub vec1_d: Vec<Vec<f64>>,
    pub vec2_d: Vec<Vec<f64>>,
    pub vec1_b: Vec<Vec<f64>>,
}

/// What `pre_solve` changed and `post_solve` has to undo.
#[derive(Clone, Debug, Default)]
pub(crate) struct PreSolveState {
    saved_rhs: Option<Vec<f64>>,
    saved_guess: bool,
    rhs_changed: bool,
    /// Initial guess removed from the iteration
    offset: Option<Vec<f64>>,
    benign_correction: Option<Vec<f64>>,
    pub trick_applied: bool,
}

fn scatter_forward(sc: &VecScatter, global: &[f64]) -> Result<Vec<Vec<f64>>, KError> {
    let mut locals: Vec<Vec<f64>> = (0..sc.n_subdomains()).map(|s| vec![0.0; sc.local_size(s)]).collect();
    sc.forward(global, &mut locals, InsertMode::Insert)?;
    Ok(locals)
}

/// Dᵀ R_B x for every subdomain.
fn restriction(global_to_b: &VecScatter, locals: &[LocalProblem], x: &[f64]) -> Result<Vec<Vec<f64>>, KError> {
    let xb = scatter_forward(global_to_b, x)?;
    Ok(locals
        .iter()
        .zip(xb)
        .map(|(lp, xs)| {
            let mut w = vec![0.0; xs.len()];
            lp.scaling.restrict(&xs, &mut w);
            w
        })
        .collect())
}

fn zeros(sizes: impl Iterator<Item = usize>) -> Vec<Vec<f64>> {
    sizes.map(|n| vec![0.0; n]).collect()
}

impl Bddc {
    pub(super) fn apply_core(&mut self, r: &[f64], z: &mut [f64], transpose: bool) -> Result<(), KError> {
        if self.stage != SetupStage::Ready {
            return Err(KError::NotSetUp);
        }
        let (Some(topo), Some(coarse), Some(cfg)) = (self.topo.as_ref(), self.coarse.as_mut(), self.cfg.as_ref()) else {
            return Err(KError::NotSetUp);
        };
        let n = topo.graph.n_global;
        KError::check_dim("preconditioner input", n, r.len())?;
        KError::check_dim("preconditioner output", n, z.len())?;
        let switch_static = cfg.opts.switch_static;
        let coarse_only = self.coarse_only;
        let trick_applied = self.presolve.trick_applied;
        let locals = &self.locals;
        let work = &mut self.work;

        let mut r_hat = vec![0.0; n];
        self.change.apply_transpose(r, &mut r_hat);
        for (p, &g) in topo.benign_dofs.iter().enumerate() {
            self.p0[p] = r_hat[g];
        }

        let mut zh = r_hat.clone();
        if !trick_applied && !coarse_only {
            let rd = scatter_forward(&topo.global_to_d, &r_hat)?;
            let first = map_subdomains(locals, |s, lp| lp.first_dirichlet(&rd[s], switch_static, transpose))?;
            work.vec1_d.clear();
            work.vec2_d.clear();
            work.vec1_b.clear();
            for (d1, d2, b1) in first {
                work.vec1_d.push(d1);
                work.vec2_d.push(d2);
                work.vec1_b.push(b1);
            }
            topo.global_to_b.reverse(&work.vec1_b, &mut zh, InsertMode::Add)?;
            work.vec1_b = restriction(&topo.global_to_b, locals, &zh)?;
        } else {
            work.vec1_d = zeros(locals.iter().map(LocalProblem::n_d));
            work.vec2_d = zeros(locals.iter().map(LocalProblem::n_d));
            work.vec1_b = if coarse_only {
                zeros(locals.iter().map(LocalProblem::n_b))
            } else {
                restriction(&topo.global_to_b, locals, &r_hat)?
            };
        }

        // interface preconditioner
        let p0 = &self.p0;
        let f: Vec<Vec<f64>> = locals
            .iter()
            .enumerate()
            .map(|(s, lp)| {
                if coarse_only {
                    let mut f = vec![0.0; lp.n()];
                    for &(piece, pos) in &lp.benign {
                        f[pos] = p0[piece];
                    }
                    f
                } else {
                    lp.interface_rhs(&work.vec1_d[s], &work.vec1_b[s], switch_static)
                }
            })
            .collect();
        let g: Vec<Vec<f64>> = locals.iter().zip(&f).map(|(lp, fs)| lp.coarse_rhs(fs, transpose)).collect();
        let msg = coarse.scatter().begin_reverse(&g)?;
        let mut x_loc = if coarse_only {
            zeros(locals.iter().map(LocalProblem::n))
        } else {
            map_subdomains(locals, |s, lp| lp.solve_neumann(&f[s], transpose))?
        };
        let mut coarse_rhs = vec![0.0; coarse.n_primal()];
        coarse.scatter().end_reverse(msg, &mut coarse_rhs, InsertMode::Add)?;
        let mut u = vec![0.0; coarse.n_primal()];
        coarse.solve(&coarse_rhs, &mut u, transpose)?;
        for (p, &c) in self.benign_primals.iter().enumerate() {
            self.p0[p] = u[c];
        }
        let u_loc = scatter_forward(coarse.scatter(), &u)?;
        for (s, lp) in locals.iter().enumerate() {
            lp.add_coarse_correction(&u_loc[s], &mut x_loc[s], transpose);
            work.vec1_b[s] = lp.idx_b.iter().map(|&i| x_loc[s][i]).collect();
            if switch_static {
                work.vec1_d[s] = lp.idx_d.iter().map(|&i| x_loc[s][i]).collect();
            }
        }

        // extension
        zh.iter_mut().for_each(|v| *v = 0.0);
        let extended: Vec<Vec<f64>> = locals
            .iter()
            .zip(&work.vec1_b)
            .map(|(lp, w)| {
                let mut y = vec![0.0; w.len()];
                lp.scaling.extend(w, &mut y);
                y
            })
            .collect();
        topo.global_to_b.reverse(&extended, &mut zh, InsertMode::Add)?;

        // second interior solve
        let zb = scatter_forward(&topo.global_to_b, &zh)?;
        let full = !trick_applied && !coarse_only;
        let (vec1_d, vec2_d) = (&work.vec1_d, &work.vec2_d);
        let interior = map_subdomains(locals, |s, lp| {
            let vec4_d = lp.second_dirichlet(&vec1_d[s], &zb[s], switch_static, transpose)?;
            let (d1, d2) = (&vec1_d[s], &vec2_d[s]);
            Ok(match (full, switch_static) {
                (true, true) => vec4_d.iter().zip(d1).zip(d2).map(|((v4, v1), v2)| v1 - v4 - v2).collect(),
                (true, false) => vec4_d.iter().zip(d2).map(|(v4, v2)| -v4 - v2).collect(),
                (false, true) => vec4_d.iter().zip(d1).map(|(v4, v1)| v1 - v4).collect(),
                (false, false) => vec4_d.iter().map(|v| -v).collect::<Vec<f64>>(),
            })
        })?;
        topo.global_to_d.reverse(&interior, &mut zh, InsertMode::Insert)?;

        if coarse_only {
            self.p0.iter_mut().for_each(|v| *v = 0.0);
        }
        for (p, &g) in topo.benign_dofs.iter().enumerate() {
            zh[g] = self.p0[p];
        }
        self.change.apply(&zh, z);
        if !self.p0_persistent {
            self.p0.iter_mut().for_each(|v| *v = 0.0);
        }
        Ok(())
    }

    pub(super) fn pre_solve_core(
        &mut self,
        a: &IsMatrix,
        b: &mut Vec<f64>,
        x: &mut Vec<f64>,
        info: &mut KrylovInfo,
    ) -> Result<(), KError> {
        if self.stage != SetupStage::Ready {
            return Err(KError::NotSetUp);
        }
        let (Some(topo), Some(cfg)) = (self.topo.as_ref(), self.cfg.as_ref()) else {
            return Err(KError::NotSetUp);
        };
        let n = topo.graph.n_global;
        KError::check_dim("right-hand side", n, b.len())?;
        KError::check_dim("solution", n, x.len())?;
        let opts = &cfg.opts;
        // the options themselves are left untouched
        let use_trick = opts.use_exact_dirichlet_trick && info.is_cg && !opts.switch_static;
        let compute_benign = opts.benign_compute_correction && !topo.benign_dofs.is_empty();
        let dirichlet = topo.graph.dirichlet.clone();

        self.presolve.trick_applied = false;
        let mut st = PreSolveState { saved_rhs: Some(b.clone()), saved_guess: info.initial_guess_nonzero, ..Default::default() };
        if !info.initial_guess_nonzero {
            x.iter_mut().for_each(|v| *v = 0.0);
        }
        if opts.eliminate_dirichlet && !dirichlet.is_empty() {
            let diag = a.assembled_diagonal();
            for &g in &dirichlet {
                if diag[g] != 0.0 {
                    x[g] = b[g] / diag[g];
                }
            }
            st.rhs_changed = true;
        }
        if st.rhs_changed || info.initial_guess_nonzero {
            let mut ax = vec![0.0; n];
            a.matvec(x, &mut ax);
            b.iter_mut().zip(&ax).for_each(|(bi, ai)| *bi -= ai);
            st.offset = Some(std::mem::replace(x, vec![0.0; n]));
            info.initial_guess_nonzero = false;
            st.rhs_changed = true;
        }

        if compute_benign {
            self.coarse_only = true;
            let mut correction = vec![0.0; n];
            let res = self.apply_core(b, &mut correction, false);
            self.coarse_only = false;
            res?;
            if let Some(offset) = st.offset.as_mut() {
                offset.iter_mut().zip(&correction).for_each(|(o, c)| *o += c);
            }
            correction.iter_mut().for_each(|c| *c = -*c);
            let mut ac = vec![0.0; n];
            a.matvec(&correction, &mut ac);
            b.iter_mut().zip(&ac).for_each(|(bi, ai)| *bi += ai);
            st.rhs_changed = true;
            st.benign_correction = Some(correction);
        }

        if use_trick {
            let (Some(topo), Some(_)) = (self.topo.as_ref(), self.cfg.as_ref()) else {
                return Err(KError::NotSetUp);
            };
            let mut b_hat = vec![0.0; n];
            self.change.apply_transpose(b, &mut b_hat);
            let rd = scatter_forward(&topo.global_to_d, &b_hat)?;
            let xd = map_subdomains(&self.locals, |s, lp| {
                let mut v = rd[s].clone();
                lp.dirichlet.solve_in_place(&mut v, false)?;
                Ok(v)
            })?;
            let mut x_hat = vec![0.0; n];
            topo.global_to_d.reverse(&xd, &mut x_hat, InsertMode::Insert)?;
            self.change.apply(&x_hat, x);
            info.initial_guess_nonzero = true;
            st.trick_applied = true;
        }
        debug!(
            rhs_changed = st.rhs_changed,
            benign = st.benign_correction.is_some(),
            exact_dirichlet = st.trick_applied,
            "pre-solve"
        );
        self.presolve = st;
        Ok(())
    }

    pub(super) fn post_solve_core(&mut self, b: &mut Vec<f64>, x: &mut [f64], info: &mut KrylovInfo) -> Result<(), KError> {
        let st = std::mem::take(&mut self.presolve);
        if st.rhs_changed {
            if let Some(offset) = &st.offset {
                x.iter_mut().zip(offset).for_each(|(xi, o)| *xi += o);
            } else if let Some(c) = &st.benign_correction {
                x.iter_mut().zip(c).for_each(|(xi, ci)| *xi -= ci);
            }
        }
        if let Some(rhs) = st.saved_rhs {
            KError::check_dim("right-hand side", rhs.len(), b.len())?;
            *b = rhs;
        }
        info.initial_guess_nonzero = st.saved_guess;
        Ok(())
    }
}
