//! Per-subdomain solver state: the interior (Dirichlet) solver, the
//! constrained Neumann problem, the primal basis functions and the local
//! coarse matrix.
//!
//! Everything here works on the local matrix in the final basis and on the
//! local numbering of the subdomain. Interior dofs (D) are the ones owned by
//! this subdomain alone; interface dofs (B) are shared ones plus the benign
//! pressure dofs.

use crate::error::KError;
use crate::matrix::dense::{gemv, gemv_transpose, orthonormal_rows};
use crate::preconditioner::bddc::scaling::LocalScaling;
use crate::preconditioner::bddc::sub_schurs::sub_block;
use crate::preconditioner::{Jacobi, Preconditioner};
use crate::solver::{LinearSolver, LuSolver, PcgSolver};
use faer::Mat;

/// Relative tolerance of the inner iteration of approximate interior solves.
const APPROX_DIRICHLET_RTOL: f64 = 1e-10;

pub enum DirichletSolver {
    /// No interior dofs
    Empty,
    Exact(LuSolver),
    /// Independent factorizations of uncoupled interior pieces (positions in
    /// the interior numbering)
    Blocks(Vec<(Vec<usize>, LuSolver)>),
    /// Jacobi-preconditioned CG followed by a Galerkin correction on the
    /// interior near-null space
    Approximate { a_ii: Mat<f64>, jacobi: Jacobi<f64>, max_iters: usize, null: Mat<f64>, correction: LuSolver },
}

impl DirichletSolver {
    pub fn build(a_ii: Mat<f64>, blocks: Option<Vec<Vec<usize>>>, null_rows: Option<Mat<f64>>) -> Result<Self, KError> {
        let n = a_ii.nrows();
        if n == 0 {
            return Ok(DirichletSolver::Empty);
        }
        if let Some(rows) = null_rows {
            let symmetric = (0..n).all(|i| (0..i).all(|j| (a_ii[(i, j)] - a_ii[(j, i)]).abs() <= 1e-12 * (1.0 + a_ii[(i, j)].abs())));
            if !symmetric {
                return Err(KError::config("approximate interior solves need a symmetric interior block"));
            }
            let ortho = orthonormal_rows(rows.as_ref(), 1e-10)?;
            if ortho.nrows() == 0 {
                return Err(KError::config("approximate interior solves need a near-null space"));
            }
            let null = ortho.as_ref().transpose().to_owned();
            let an = a_ii.as_ref() * null.as_ref();
            let coarse = null.as_ref().transpose() * an.as_ref();
            let correction = LuSolver::factor(coarse.as_ref(), "near-null-space correction of the interior solver")?;
            let mut jacobi = Jacobi::new();
            Preconditioner::<Mat<f64>, Vec<f64>>::setup(&mut jacobi, &a_ii)?;
            let max_iters = 10 * n.max(10);
            return Ok(DirichletSolver::Approximate { a_ii, jacobi, max_iters, null, correction });
        }
        match blocks {
            Some(blocks) if blocks.len() > 1 => {
                let solvers = blocks
                    .into_iter()
                    .map(|b| {
                        let lu = LuSolver::factor(sub_block(&a_ii, &b, &b).as_ref(), "local Dirichlet problem")?;
                        Ok((b, lu))
                    })
                    .collect::<Result<Vec<_>, KError>>()?;
                Ok(DirichletSolver::Blocks(solvers))
            }
            _ => Ok(DirichletSolver::Exact(LuSolver::factor(a_ii.as_ref(), "local Dirichlet problem")?)),
        }
    }

    pub fn n_blocks(&self) -> usize {
        match self {
            DirichletSolver::Empty => 0,
            DirichletSolver::Blocks(b) => b.len(),
            _ => 1,
        }
    }

    pub fn is_approximate(&self) -> bool {
        matches!(self, DirichletSolver::Approximate { .. })
    }

    /// x = A_II⁻¹ x (or A_II⁻ᵀ x) in place.
    pub fn solve_in_place(&self, x: &mut [f64], transpose: bool) -> Result<(), KError> {
        match self {
            DirichletSolver::Empty => Ok(()),
            DirichletSolver::Exact(lu) if transpose => lu.solve_transpose_in_place(x),
            DirichletSolver::Exact(lu) => lu.solve_in_place(x),
            DirichletSolver::Blocks(blocks) => {
                for (idx, lu) in blocks {
                    let mut xb: Vec<f64> = idx.iter().map(|&i| x[i]).collect();
                    if transpose {
                        lu.solve_transpose_in_place(&mut xb)?;
                    } else {
                        lu.solve_in_place(&mut xb)?;
                    }
                    for (&i, v) in idx.iter().zip(xb) {
                        x[i] = v;
                    }
                }
                Ok(())
            }
            // symmetric, so the transpose solve is the same
            DirichletSolver::Approximate { a_ii, jacobi, max_iters, null, correction } => {
                if x.iter().all(|&v| v == 0.0) {
                    return Ok(());
                }
                let n = x.len();
                let b = x.to_vec();
                let mut pc = jacobi.clone();
                let mut pcg = PcgSolver::new(APPROX_DIRICHLET_RTOL, *max_iters);
                let mut y = vec![0.0; n];
                let stats = LinearSolver::<Mat<f64>, Vec<f64>>::solve(&mut pcg, a_ii, Some(&mut pc), &b, &mut y)?;
                if !stats.converged {
                    return Err(KError::SolveError(format!(
                        "approximate interior solve stopped after {} iterations (residual {:.3e})",
                        stats.iterations, stats.final_residual
                    )));
                }
                let mut ay = vec![0.0; n];
                gemv(a_ii.as_ref(), &y, &mut ay);
                let r: Vec<f64> = b.iter().zip(&ay).map(|(bi, ai)| bi - ai).collect();
                let mut t = vec![0.0; null.ncols()];
                gemv_transpose(null.as_ref(), &r, &mut t);
                correction.solve_in_place(&mut t)?;
                let mut nt = vec![0.0; n];
                gemv(null.as_ref(), &t, &mut nt);
                for ((xi, yi), ci) in x.iter_mut().zip(&y).zip(&nt) {
                    *xi = yi + ci;
                }
                Ok(())
            }
        }
    }
}

/// What `LocalProblem::build` needs for one subdomain.
#[derive(Clone)]
pub struct LocalInput {
    pub sub: usize,
    pub l2g: Vec<usize>,
    /// Local matrix in the final basis
    pub a: Mat<f64>,
    pub is_b: Vec<bool>,
    /// Multiplicity of every local dof
    pub multiplicity: Vec<usize>,
    pub constraints: Mat<f64>,
    pub primal_l2g: Vec<usize>,
    /// Reuse Φ as Ψ
    pub symmetric_primal: bool,
    /// Uncoupled interior pieces in interior numbering
    pub d_blocks: Option<Vec<Vec<usize>>>,
    /// Near-null-space rows on the interior dofs, for approximate solves
    pub null_rows: Option<Mat<f64>>,
    /// (benign piece, local position)
    pub benign: Vec<(usize, usize)>,
}

pub struct LocalProblem {
    pub sub: usize,
    pub l2g: Vec<usize>,
    pub a: Mat<f64>,
    pub idx_d: Vec<usize>,
    pub idx_b: Vec<usize>,
    pub dirichlet: DirichletSolver,
    pub a_ib: Mat<f64>,
    pub a_bi: Mat<f64>,
    pub constraints: Mat<f64>,
    pub primal_l2g: Vec<usize>,
    pub neumann: LuSolver,
    pub phi: Mat<f64>,
    pub psi: Mat<f64>,
    /// Ψᵀ A Φ
    pub coarse_local: Mat<f64>,
    pub scaling: LocalScaling,
    pub benign: Vec<(usize, usize)>,
}

impl LocalProblem {
    pub fn build(input: LocalInput) -> Result<Self, KError> {
        let LocalInput { sub, l2g, a, is_b, multiplicity, constraints, primal_l2g, symmetric_primal, d_blocks, null_rows, benign } =
            input;
        let n = l2g.len();
        KError::check_dim("local matrix", n, a.nrows())?;
        KError::check_dim("local constraints", n, constraints.ncols())?;
        let idx_d: Vec<usize> = (0..n).filter(|&i| !is_b[i]).collect();
        let idx_b: Vec<usize> = (0..n).filter(|&i| is_b[i]).collect();

        let a_ii = sub_block(&a, &idx_d, &idx_d);
        let dirichlet = DirichletSolver::build(a_ii, d_blocks, null_rows)?;
        let a_ib = sub_block(&a, &idx_d, &idx_b);
        let a_bi = sub_block(&a, &idx_b, &idx_d);

        let n_c = constraints.nrows();
        let nk = n + n_c;
        let k = Mat::from_fn(nk, nk, |i, j| match (i < n, j < n) {
            (true, true) => a[(i, j)],
            (true, false) => constraints[(j - n, i)],
            (false, true) => constraints[(i - n, j)],
            (false, false) => 0.0,
        });
        let neumann = LuSolver::factor(k.as_ref(), "local Neumann problem")?;

        let unit_rhs = || Mat::from_fn(nk, n_c, |i, j| if i == n + j { 1.0 } else { 0.0 });
        let mut sol = unit_rhs();
        neumann.solve_mat_in_place(&mut sol, false)?;
        let phi = Mat::from_fn(n, n_c, |i, j| sol[(i, j)]);
        let symmetric = (0..n).all(|i| (0..i).all(|j| a[(i, j)] == a[(j, i)]));
        let psi = if symmetric_primal && symmetric {
            phi.clone()
        } else {
            let mut sol_t = unit_rhs();
            neumann.solve_mat_in_place(&mut sol_t, true)?;
            Mat::from_fn(n, n_c, |i, j| sol_t[(i, j)])
        };
        let a_phi = a.as_ref() * phi.as_ref();
        let coarse_local = psi.as_ref().transpose() * a_phi.as_ref();

        let b_mult: Vec<usize> = idx_b.iter().map(|&i| multiplicity[i]).collect();
        Ok(Self {
            sub,
            l2g,
            a,
            idx_d,
            idx_b,
            dirichlet,
            a_ib,
            a_bi,
            constraints,
            primal_l2g,
            neumann,
            phi,
            psi,
            coarse_local,
            scaling: LocalScaling::simple(&b_mult),
            benign,
        })
    }

    pub fn n(&self) -> usize {
        self.l2g.len()
    }

    pub fn n_d(&self) -> usize {
        self.idx_d.len()
    }

    pub fn n_b(&self) -> usize {
        self.idx_b.len()
    }

    pub fn n_c(&self) -> usize {
        self.constraints.nrows()
    }

    fn matvec(&self, x: &[f64], y: &mut [f64], transpose: bool) {
        if transpose {
            gemv_transpose(self.a.as_ref(), x, y);
        } else {
            gemv(self.a.as_ref(), x, y);
        }
    }

    fn assemble_n(&self, d: Option<&[f64]>, b: Option<&[f64]>) -> Vec<f64> {
        let mut v = vec![0.0; self.n()];
        if let Some(d) = d {
            for (&i, &x) in self.idx_d.iter().zip(d) {
                v[i] = x;
            }
        }
        if let Some(b) = b {
            for (&i, &x) in self.idx_b.iter().zip(b) {
                v[i] = x;
            }
        }
        v
    }

    /// First interior solve: returns the updated `vec1_d`, `vec2_d = −A_II⁻¹ r_D`
    /// and its interface contribution `vec1_b`.
    pub fn first_dirichlet(
        &self,
        vec1_d: &[f64],
        switch_static: bool,
        transpose: bool,
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), KError> {
        let mut d = vec1_d.to_vec();
        if self.n_d() == 0 {
            return Ok((d, Vec::new(), vec![0.0; self.n_b()]));
        }
        let mut vec2_d = vec1_d.to_vec();
        self.dirichlet.solve_in_place(&mut vec2_d, transpose)?;
        vec2_d.iter_mut().for_each(|v| *v = -*v);
        let mut vec1_b = vec![0.0; self.n_b()];
        if switch_static {
            let vec1_n = self.assemble_n(Some(&vec2_d), None);
            let mut vec2_n = vec![0.0; self.n()];
            self.matvec(&vec1_n, &mut vec2_n, transpose);
            for (k, &i) in self.idx_d.iter().enumerate() {
                d[k] += vec2_n[i];
            }
            for (k, &i) in self.idx_b.iter().enumerate() {
                vec1_b[k] = vec2_n[i];
            }
        } else if transpose {
            gemv_transpose(self.a_ib.as_ref(), &vec2_d, &mut vec1_b);
        } else {
            gemv(self.a_bi.as_ref(), &vec2_d, &mut vec1_b);
        }
        Ok((d, vec2_d, vec1_b))
    }

    /// Second interior solve: `A_II⁻¹ (A_IB z_B)`, with the interior part of
    /// the interface correction folded in under static condensation.
    pub fn second_dirichlet(
        &self,
        vec1_d: &[f64],
        vec1_b: &[f64],
        switch_static: bool,
        transpose: bool,
    ) -> Result<Vec<f64>, KError> {
        let mut vec3_d = vec![0.0; self.n_d()];
        if self.n_b() > 0 {
            if switch_static {
                let vec1_n = self.assemble_n(Some(vec1_d), Some(vec1_b));
                let mut vec2_n = vec![0.0; self.n()];
                self.matvec(&vec1_n, &mut vec2_n, transpose);
                for (k, &i) in self.idx_d.iter().enumerate() {
                    vec3_d[k] = vec2_n[i];
                }
            } else if transpose {
                gemv_transpose(self.a_bi.as_ref(), vec1_b, &mut vec3_d);
            } else {
                gemv(self.a_ib.as_ref(), vec1_b, &mut vec3_d);
            }
        } else if switch_static {
            let vec1_n = self.assemble_n(Some(vec1_d), None);
            let mut vec2_n = vec![0.0; self.n()];
            self.matvec(&vec1_n, &mut vec2_n, transpose);
            for (k, &i) in self.idx_d.iter().enumerate() {
                vec3_d[k] = vec2_n[i];
            }
        }
        self.dirichlet.solve_in_place(&mut vec3_d, transpose)?;
        Ok(vec3_d)
    }

    /// Local right-hand side of the interface problem.
    pub fn interface_rhs(&self, vec1_d: &[f64], vec1_b: &[f64], switch_static: bool) -> Vec<f64> {
        self.assemble_n(if switch_static { Some(vec1_d) } else { None }, Some(vec1_b))
    }

    /// Ψᵀ f (Φᵀ f for the transpose)
    pub fn coarse_rhs(&self, f: &[f64], transpose: bool) -> Vec<f64> {
        let basis = if transpose { &self.phi } else { &self.psi };
        let mut g = vec![0.0; self.n_c()];
        gemv_transpose(basis.as_ref(), f, &mut g);
        g
    }

    /// Constrained Neumann solve `[A Cᵀ; C 0] [w; μ] = [f; 0]`.
    pub fn solve_neumann(&self, f: &[f64], transpose: bool) -> Result<Vec<f64>, KError> {
        let n = self.n();
        let mut rhs = vec![0.0; n + self.n_c()];
        rhs[..n].copy_from_slice(f);
        if transpose {
            self.neumann.solve_transpose_in_place(&mut rhs)?;
        } else {
            self.neumann.solve_in_place(&mut rhs)?;
        }
        rhs.truncate(n);
        Ok(rhs)
    }

    /// x += Φ u (Ψ u for the transpose)
    pub fn add_coarse_correction(&self, u: &[f64], x: &mut [f64], transpose: bool) {
        let basis = if transpose { &self.psi } else { &self.phi };
        let mut c = vec![0.0; self.n()];
        gemv(basis.as_ref(), u, &mut c);
        for (xi, ci) in x.iter_mut().zip(c) {
            *xi += ci;
        }
    }
}
